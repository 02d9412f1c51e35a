use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use harvest_errors::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// 作业状态
///
/// 状态机: `Pending → Running → {Completed, Failed, Cancelled, Stopped}`，
/// 另有 `Running ⇄ Paused`。Pending 也可以直接被停止或取消。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Stopped
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Stopped | Cancelled)
                | (Running, Completed | Failed | Cancelled | Stopped | Paused)
                | (Paused, Running | Stopped | Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Stopped => "STOPPED",
        }
    }

    pub fn all() -> [JobStatus; 7] {
        [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Stopped,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::all()
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarvestError::invalid_field("status", format!("未知的作业状态: {s}")))
    }
}

/// 一次状态变更记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// 作业运行指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobMetrics {
    pub records_extracted: Option<u64>,
    pub records_transformed: Option<u64>,
    pub records_loaded: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl JobMetrics {
    /// 用另一份指标中已有的值覆盖当前值
    pub fn merge(&mut self, other: &JobMetrics) {
        if other.records_extracted.is_some() {
            self.records_extracted = other.records_extracted;
        }
        if other.records_transformed.is_some() {
            self.records_transformed = other.records_transformed;
        }
        if other.records_loaded.is_some() {
            self.records_loaded = other.records_loaded;
        }
        if other.duration_ms.is_some() {
            self.duration_ms = other.duration_ms;
        }
    }
}

/// 作业：单个采集器流水线的一次执行实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub scraper_id: String,
    pub data_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub metrics: JobMetrics,
    pub pipeline_run_id: Option<Uuid>,
    pub history: Vec<StatusChange>,
}

impl Job {
    pub fn new<S: Into<String>, D: Into<String>>(scraper_id: S, data_type: D) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scraper_id: scraper_id.into(),
            data_type: data_type.into(),
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            // 采集作业不自动重试，由操作员重新提交
            max_retries: 0,
            last_error: None,
            metrics: JobMetrics::default(),
            pipeline_run_id: None,
            history: vec![StatusChange {
                status: JobStatus::Pending,
                at: now,
                reason: None,
            }],
        }
    }

    /// 按状态机执行一次状态转换
    pub fn transition(&mut self, next: JobStatus, reason: Option<String>) -> HarvestResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(HarvestError::invalid_transition(self.status, next));
        }

        let now = Utc::now();
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            if let (Some(started), None) = (self.started_at, self.metrics.duration_ms) {
                self.metrics.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
            }
        }
        if next == JobStatus::Failed {
            if let Some(reason) = &reason {
                self.last_error = Some(reason.clone());
            }
        }

        self.status = next;
        self.history.push(StatusChange {
            status: next,
            at: now,
            reason,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 运行时长超过阈值即视为卡住
    pub fn is_stuck(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (JobStatus::Running, Some(started)) => now - started > threshold,
            _ => false,
        }
    }

    pub fn status_path(&self) -> Vec<JobStatus> {
        self.history.iter().map(|change| change.status).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub scraper_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(scraper_id) = &self.scraper_id {
            if &job.scraper_id != scraper_id {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_starts_pending() {
        let job = Job::new("s1", "bills");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.status_path(), vec![JobStatus::Pending]);
        assert_eq!(job.max_retries, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_valid_transitions() {
        let mut job = Job::new("s1", "bills");
        job.transition(JobStatus::Running, None).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Paused, None).unwrap();
        job.transition(JobStatus::Running, None).unwrap();
        job.transition(JobStatus::Completed, None).unwrap();

        assert!(job.completed_at.is_some());
        assert!(job.metrics.duration_ms.is_some());
        assert_eq!(
            job.status_path(),
            vec![
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Paused,
                JobStatus::Running,
                JobStatus::Completed
            ]
        );
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut job = Job::new("s1", "bills");
        let err = job.transition(JobStatus::Completed, None).unwrap_err();
        assert!(matches!(err, HarvestError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.history.len(), 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Stopped,
        ] {
            assert!(terminal.is_terminal());
            for next in JobStatus::all() {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_paused_only_returns_to_running_or_ends() {
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Stopped));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Paused));
    }

    #[test]
    fn test_failed_transition_records_error() {
        let mut job = Job::new("s1", "bills");
        job.transition(JobStatus::Running, None).unwrap();
        job.transition(JobStatus::Failed, Some("load failed".to_string()))
            .unwrap();
        assert_eq!(job.last_error.as_deref(), Some("load failed"));
    }

    #[test]
    fn test_stuck_detection() {
        let mut job = Job::new("s1", "bills");
        let now = Utc::now();
        assert!(!job.is_stuck(Duration::seconds(1), now));

        job.transition(JobStatus::Running, None).unwrap();
        job.started_at = Some(now - Duration::hours(2));
        assert!(job.is_stuck(Duration::hours(1), now));
        assert!(!job.is_stuck(Duration::hours(3), now));
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!(JobStatus::Stopped.to_string(), "STOPPED");
        assert!("unknown".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_metrics_merge_keeps_existing_values() {
        let mut metrics = JobMetrics {
            records_extracted: Some(10),
            ..Default::default()
        };
        metrics.merge(&JobMetrics {
            records_loaded: Some(8),
            ..Default::default()
        });
        assert_eq!(metrics.records_extracted, Some(10));
        assert_eq!(metrics.records_loaded, Some(8));
    }
}
