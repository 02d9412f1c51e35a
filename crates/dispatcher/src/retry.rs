use std::time::Duration;

use harvest_config::WorkflowEngineConfig;

/// 工作流步骤重试策略
///
/// 指数退避，上限封顶，并叠加随机抖动避免同时重试。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 基础重试间隔（毫秒）
    pub base_interval_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_interval_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowEngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkflowEngineConfig) -> Self {
        Self {
            base_interval_ms: config.retry_base_interval_ms,
            max_interval_ms: config.retry_max_interval_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// 不等待的策略，测试中使用
    pub fn immediate() -> Self {
        Self {
            base_interval_ms: 0,
            max_interval_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// 第 `retry` 次重试（从0开始）前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_interval_ms as f64;
        let exponential = base * self.backoff_multiplier.powi(retry as i32);
        let capped = exponential.min(self.max_interval_ms as f64);

        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(0.0, self.max_interval_ms as f64);
        Duration::from_millis(delay as u64)
    }
}
