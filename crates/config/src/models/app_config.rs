use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use harvest_domain::ScraperDescriptor;
use serde::{Deserialize, Serialize};

use super::{
    database::DatabaseConfig,
    engine::{EngineConfig, PipelineExecutorConfig},
    health::HealthMonitorConfig,
    observability::ObservabilityConfig,
    scraper::ScraperEntry,
    workflow::WorkflowEngineConfig,
};
use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

/// 默认配置文件搜索路径，按顺序取第一个存在的
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/harvest.toml",
    "harvest.toml",
    "/etc/harvest/config.toml",
];

/// 环境变量前缀，例如 `HARVEST_ENGINE__MAX_CONCURRENT_JOBS=10`
pub const ENV_PREFIX: &str = "HARVEST";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub pipeline: PipelineExecutorConfig,
    pub workflow: WorkflowEngineConfig,
    pub health: HealthMonitorConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityConfig,
    pub scrapers: Vec<ScraperEntry>,
}

impl AppConfig {
    /// 依次叠加：内置默认值、配置文件、环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn scraper_descriptors(&self) -> Vec<ScraperDescriptor> {
        self.scrapers.iter().map(ScraperEntry::to_descriptor).collect()
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.pipeline.validate()?;
        self.workflow.validate()?;
        self.health.validate()?;
        self.database.validate()?;
        self.observability.validate()?;

        let mut seen = HashSet::new();
        for (index, scraper) in self.scrapers.iter().enumerate() {
            scraper.validate(index)?;
            if !seen.insert(scraper.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "采集器ID重复: {}",
                    scraper.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_concurrent_jobs, 5);
        assert!(config.scrapers.is_empty());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [engine]
            max_concurrent_jobs = 2

            [health]
            cpu_degraded_percent = 70.0
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.max_concurrent_jobs, 2);
        assert_eq!(config.engine.job_history_limit, 1000);
        assert_eq!(config.health.cpu_degraded_percent, 70.0);
        assert_eq!(config.health.memory_degraded_percent, 85.0);
    }

    #[test]
    fn test_duplicate_scraper_ids_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [[scrapers]]
            id = "ca-bills"
            source_url = "https://example.org/a"

            [[scrapers]]
            id = "ca-bills"
            source_url = "https://example.org/b"
            "#,
        );
        assert!(result.is_err());
    }
}
