use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 作业注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 同时处于运行状态的作业上限
    pub max_concurrent_jobs: usize,
    pub stuck_job_threshold_seconds: u64,
    /// 保留的已结束作业数量
    pub job_history_limit: usize,
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            stuck_job_threshold_seconds: 3600,
            job_history_limit: 1000,
            event_buffer_size: 256,
        }
    }
}

impl EngineConfig {
    pub fn stuck_job_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_job_threshold_seconds)
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_count(self.max_concurrent_jobs, "engine.max_concurrent_jobs")?;
        ValidationUtils::validate_positive(
            self.stuck_job_threshold_seconds,
            "engine.stuck_job_threshold_seconds",
        )?;
        ValidationUtils::validate_count(self.job_history_limit, "engine.job_history_limit")?;
        ValidationUtils::validate_count(self.event_buffer_size, "engine.event_buffer_size")?;
        Ok(())
    }
}

/// 流水线执行器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineExecutorConfig {
    pub extract_timeout_seconds: u64,
    pub transform_timeout_seconds: u64,
    pub load_timeout_seconds: u64,
    /// 写入 `_metadata.pipeline_version`
    pub pipeline_version: String,
    /// 文件加载策略的默认输出目录
    pub output_dir: String,
    pub http_timeout_seconds: u64,
}

impl Default for PipelineExecutorConfig {
    fn default() -> Self {
        Self {
            extract_timeout_seconds: 300,
            transform_timeout_seconds: 60,
            load_timeout_seconds: 300,
            pipeline_version: "1.0.0".to_string(),
            output_dir: "data/output".to_string(),
            http_timeout_seconds: 30,
        }
    }
}

impl PipelineExecutorConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_seconds)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_seconds)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

impl ConfigValidator for PipelineExecutorConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.extract_timeout_seconds,
            "pipeline.extract_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.transform_timeout_seconds,
            "pipeline.transform_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.load_timeout_seconds,
            "pipeline.load_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.http_timeout_seconds,
            "pipeline.http_timeout_seconds",
        )?;
        ValidationUtils::validate_not_empty(&self.pipeline_version, "pipeline.pipeline_version")?;
        ValidationUtils::validate_not_empty(&self.output_dir, "pipeline.output_dir")?;
        Ok(())
    }
}
