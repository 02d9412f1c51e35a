//! 调度核心
//!
//! 作业注册表负责并发准入与作业状态机，工作流引擎负责多步骤编排与调度，
//! 健康监控在后台周期性地汇总系统健康状况。

pub mod cron_utils;
pub mod health_monitor;
pub mod job_registry;
pub mod retry;
pub mod scheduler;
pub mod workflow_engine;

pub use cron_utils::{next_run_at, CronScheduler};
pub use health_monitor::{evaluate_resources, health_channel, HealthMonitor, HealthMonitorDeps};
pub use job_registry::{HealthFeed, InMemoryJobRegistry, JobRegistry, JobRegistryDeps, SystemStatus};
pub use retry::RetryPolicy;
pub use scheduler::WorkflowScheduler;
pub use workflow_engine::{StepHandler, StepInput, StepOutput, WorkflowEngine, WorkflowStatusReport};
