//! 引擎事件
//!
//! 通过广播通道发布，订阅者之间互不影响

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::health::HealthStatus;
use crate::job::{JobId, JobStatus};
use crate::pipeline::PipelineStatus;
use crate::workflow::WorkflowId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    JobStatusChanged {
        job_id: JobId,
        scraper_id: String,
        from: JobStatus,
        to: JobStatus,
        occurred_at: DateTime<Utc>,
    },
    PipelineFinished {
        job_id: Option<JobId>,
        run_id: Uuid,
        status: PipelineStatus,
        total_duration_ms: u64,
        occurred_at: DateTime<Utc>,
    },
    WorkflowFinished {
        workflow_id: WorkflowId,
        execution_id: Uuid,
        success: bool,
        steps_completed: usize,
        occurred_at: DateTime<Utc>,
    },
    HealthReported {
        status: HealthStatus,
        warnings: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::JobStatusChanged { .. } => "JobStatusChanged",
            EngineEvent::PipelineFinished { .. } => "PipelineFinished",
            EngineEvent::WorkflowFinished { .. } => "WorkflowFinished",
            EngineEvent::HealthReported { .. } => "HealthReported",
        }
    }
}

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 没有订阅者时事件被丢弃
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
