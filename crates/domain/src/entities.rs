use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::pipeline::PipelineConfig;

/// 采集器所属的行政层级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JurisdictionLevel {
    Federal,
    State,
    County,
    Municipal,
    Other,
}

/// 采集器描述
///
/// 由配置创建和更新，对引擎只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperDescriptor {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub jurisdiction_level: JurisdictionLevel,
    pub enabled: bool,
    /// 采集的数据类型，用于选择数据类型专用的抽取策略
    pub data_type: String,
    pub last_status: Option<JobStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ScraperDescriptor {
    pub fn new<I: Into<String>, U: Into<String>>(id: I, source_url: U) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source_url: source_url.into(),
            jurisdiction_level: JurisdictionLevel::Other,
            enabled: true,
            data_type: "generic".to_string(),
            last_status: None,
            last_run_at: None,
            pipeline: PipelineConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn entity_description(&self) -> String {
        format!(
            "采集器 '{}' (ID: {}, 数据类型: {})",
            self.name, self.id, self.data_type
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScraperFilter {
    pub enabled: Option<bool>,
    pub jurisdiction_level: Option<JurisdictionLevel>,
    pub data_type: Option<String>,
    pub name_pattern: Option<String>,
}

impl ScraperFilter {
    pub fn matches(&self, scraper: &ScraperDescriptor) -> bool {
        if let Some(enabled) = self.enabled {
            if scraper.enabled != enabled {
                return false;
            }
        }
        if let Some(level) = self.jurisdiction_level {
            if scraper.jurisdiction_level != level {
                return false;
            }
        }
        if let Some(data_type) = &self.data_type {
            if &scraper.data_type != data_type {
                return false;
            }
        }
        if let Some(pattern) = &self.name_pattern {
            if !scraper.name.contains(pattern.as_str()) {
                return false;
            }
        }
        true
    }
}
