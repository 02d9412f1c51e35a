use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 健康监控配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub enabled: bool,
    /// 资源采样周期
    pub resource_check_interval_seconds: u64,
    /// 数据库探测与卡住作业扫描周期
    pub dependency_check_interval_seconds: u64,
    pub cpu_degraded_percent: f32,
    pub memory_degraded_percent: f32,
    pub disk_degraded_percent: f32,
    /// 任一资源超过该值即判定为不健康
    pub unhealthy_percent: f32,
    pub history_size: usize,
    /// 磁盘使用率按该路径所在的挂载点计算
    pub disk_path: String,
    pub persist_snapshots: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resource_check_interval_seconds: 30,
            dependency_check_interval_seconds: 120,
            cpu_degraded_percent: 80.0,
            memory_degraded_percent: 85.0,
            disk_degraded_percent: 90.0,
            unhealthy_percent: 95.0,
            history_size: 120,
            disk_path: "/".to_string(),
            persist_snapshots: true,
        }
    }
}

impl HealthMonitorConfig {
    pub fn resource_check_interval(&self) -> Duration {
        Duration::from_secs(self.resource_check_interval_seconds)
    }

    pub fn dependency_check_interval(&self) -> Duration {
        Duration::from_secs(self.dependency_check_interval_seconds)
    }
}

impl ConfigValidator for HealthMonitorConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_positive(
            self.resource_check_interval_seconds,
            "health.resource_check_interval_seconds",
        )?;
        ValidationUtils::validate_positive(
            self.dependency_check_interval_seconds,
            "health.dependency_check_interval_seconds",
        )?;
        ValidationUtils::validate_percent(self.cpu_degraded_percent, "health.cpu_degraded_percent")?;
        ValidationUtils::validate_percent(
            self.memory_degraded_percent,
            "health.memory_degraded_percent",
        )?;
        ValidationUtils::validate_percent(
            self.disk_degraded_percent,
            "health.disk_degraded_percent",
        )?;
        ValidationUtils::validate_percent(self.unhealthy_percent, "health.unhealthy_percent")?;

        let highest_degraded = self
            .cpu_degraded_percent
            .max(self.memory_degraded_percent)
            .max(self.disk_degraded_percent);
        if self.unhealthy_percent < highest_degraded {
            return Err(ConfigError::Validation(
                "health.unhealthy_percent 不能低于任何降级阈值".to_string(),
            ));
        }

        ValidationUtils::validate_count(self.history_size, "health.history_size")?;
        ValidationUtils::validate_not_empty(&self.disk_path, "health.disk_path")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = HealthMonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resource_check_interval(), Duration::from_secs(30));
        assert_eq!(config.dependency_check_interval(), Duration::from_secs(120));
        assert_eq!(config.cpu_degraded_percent, 80.0);
        assert_eq!(config.memory_degraded_percent, 85.0);
        assert_eq!(config.disk_degraded_percent, 90.0);
        assert_eq!(config.unhealthy_percent, 95.0);
    }

    #[test]
    fn test_unhealthy_below_degraded_rejected() {
        let config = HealthMonitorConfig {
            unhealthy_percent: 70.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
