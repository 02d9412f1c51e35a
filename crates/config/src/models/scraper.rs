use harvest_domain::{JurisdictionLevel, PipelineConfig, ScraperDescriptor};
use serde::{Deserialize, Serialize};

use crate::validation::ValidationUtils;
use crate::ConfigResult;

/// 配置文件中的采集器条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScraperEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source_url: String,
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction_level: JurisdictionLevel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_jurisdiction() -> JurisdictionLevel {
    JurisdictionLevel::Other
}

fn default_enabled() -> bool {
    true
}

fn default_data_type() -> String {
    "generic".to_string()
}

impl ScraperEntry {
    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.id, &format!("scrapers[{index}].id"))?;
        ValidationUtils::validate_not_empty(
            &self.source_url,
            &format!("scrapers[{index}].source_url"),
        )?;
        ValidationUtils::validate_not_empty(
            &self.data_type,
            &format!("scrapers[{index}].data_type"),
        )?;
        Ok(())
    }

    pub fn to_descriptor(&self) -> ScraperDescriptor {
        ScraperDescriptor {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            source_url: self.source_url.clone(),
            jurisdiction_level: self.jurisdiction_level,
            enabled: self.enabled,
            data_type: self.data_type.clone(),
            last_status: None,
            last_run_at: None,
            pipeline: self.pipeline.clone(),
        }
    }
}

impl From<&ScraperDescriptor> for ScraperEntry {
    fn from(descriptor: &ScraperDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: Some(descriptor.name.clone()),
            source_url: descriptor.source_url.clone(),
            jurisdiction_level: descriptor.jurisdiction_level,
            enabled: descriptor.enabled,
            data_type: descriptor.data_type.clone(),
            pipeline: descriptor.pipeline.clone(),
        }
    }
}
