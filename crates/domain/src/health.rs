use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// 健康状态，按严重程度排序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// 指标上报用的数值
    pub fn as_gauge(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Unhealthy => 2.0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn with_status<S: Into<String>>(status: HealthStatus, message: S) -> Self {
        Self {
            status,
            message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }
}

/// 主机资源采样
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub sampled_at: DateTime<Utc>,
}

/// 一次轮询得出的健康快照，由下一次快照整体取代
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub overall: HealthStatus,
    pub database: ComponentHealth,
    pub job_registry: ComponentHealth,
    pub resources: ComponentHealth,
    pub resource_usage: Option<ResourceUsage>,
    pub active_jobs: usize,
    pub stuck_jobs: Vec<JobId>,
    pub warnings: Vec<String>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_ordering() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
        assert!(HealthStatus::Healthy < HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1.0);
    }
}
