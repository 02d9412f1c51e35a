use std::time::Duration;

use harvest_domain::MAX_WORKFLOW_RETRIES;
use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 工作流引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowEngineConfig {
    /// 定义未指定 `max_retries` 时使用
    pub default_max_retries: u32,
    pub retry_base_interval_ms: u64,
    pub retry_max_interval_ms: u64,
    pub backoff_multiplier: f64,
    /// 0.0 ~ 1.0
    pub jitter_factor: f64,
    pub step_timeout_seconds: u64,
    pub scheduler_enabled: bool,
    pub scheduler_interval_seconds: u64,
    /// 每个工作流保留的执行记录数
    pub execution_history_limit: usize,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_base_interval_ms: 500,
            retry_max_interval_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            step_timeout_seconds: 600,
            scheduler_enabled: true,
            scheduler_interval_seconds: 30,
            execution_history_limit: 100,
        }
    }
}

impl WorkflowEngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_seconds)
    }
}

impl ConfigValidator for WorkflowEngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.default_max_retries > MAX_WORKFLOW_RETRIES {
            return Err(ConfigError::Validation(format!(
                "workflow.default_max_retries 不能超过{MAX_WORKFLOW_RETRIES}"
            )));
        }
        ValidationUtils::validate_positive(
            self.retry_base_interval_ms,
            "workflow.retry_base_interval_ms",
        )?;
        if self.retry_max_interval_ms < self.retry_base_interval_ms {
            return Err(ConfigError::Validation(
                "workflow.retry_max_interval_ms 不能小于 retry_base_interval_ms".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "workflow.backoff_multiplier 必须不小于1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Validation(
                "workflow.jitter_factor 必须在 0.0 到 1.0 之间".to_string(),
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.step_timeout_seconds,
            "workflow.step_timeout_seconds",
        )?;
        ValidationUtils::validate_positive(
            self.scheduler_interval_seconds,
            "workflow.scheduler_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.execution_history_limit,
            "workflow.execution_history_limit",
        )?;
        Ok(())
    }
}
