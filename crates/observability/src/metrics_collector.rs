use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{info, warn};

use harvest_domain::{HealthStatus, JobStatus, PipelineStage, PipelineStatus, ResourceUsage};

/// 引擎指标
///
/// 未安装全局记录器时所有句柄都是空操作，测试中可以直接构造。
#[derive(Clone)]
pub struct MetricsCollector {
    // Job metrics
    jobs_started_total: Counter,
    jobs_rejected_total: Counter,
    active_jobs: Gauge,
    stuck_jobs: Gauge,

    // Workflow metrics
    workflow_execution_duration: Histogram,
    workflow_step_retries_total: Counter,
    workflows_registered: Gauge,

    // Health metrics
    health_status: Gauge,
    system_cpu_usage: Gauge,
    system_memory_usage: Gauge,
    system_disk_usage: Gauge,

    persistence_failures_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_started_total: counter!("harvest_jobs_started_total"),
            jobs_rejected_total: counter!("harvest_jobs_rejected_total"),
            active_jobs: gauge!("harvest_active_jobs"),
            stuck_jobs: gauge!("harvest_stuck_jobs"),
            workflow_execution_duration: histogram!(
                "harvest_workflow_execution_duration_seconds"
            ),
            workflow_step_retries_total: counter!("harvest_workflow_step_retries_total"),
            workflows_registered: gauge!("harvest_workflows_registered"),
            health_status: gauge!("harvest_health_status"),
            system_cpu_usage: gauge!("harvest_system_cpu_usage_percent"),
            system_memory_usage: gauge!("harvest_system_memory_usage_percent"),
            system_disk_usage: gauge!("harvest_system_disk_usage_percent"),
            persistence_failures_total: counter!("harvest_persistence_failures_total"),
        }
    }

    pub fn record_job_started(&self, scraper_id: &str) {
        self.jobs_started_total.increment(1);
        info!(scraper_id = scraper_id, "Job started");
    }

    pub fn record_job_rejected(&self, scraper_id: &str) {
        self.jobs_rejected_total.increment(1);
        warn!(scraper_id = scraper_id, "Job rejected: concurrency limit reached");
    }

    pub fn record_job_finished(&self, status: JobStatus) {
        counter!("harvest_jobs_finished_total", "status" => status.as_str()).increment(1);
    }

    pub fn update_active_jobs(&self, count: usize) {
        self.active_jobs.set(count as f64);
    }

    pub fn update_stuck_jobs(&self, count: usize) {
        self.stuck_jobs.set(count as f64);
    }

    pub fn record_stage(&self, stage: PipelineStage, duration_ms: u64, records: Option<u64>) {
        histogram!("harvest_pipeline_stage_duration_seconds", "stage" => stage.as_str())
            .record(duration_ms as f64 / 1000.0);
        if let Some(records) = records {
            counter!("harvest_pipeline_records_total", "stage" => stage.as_str())
                .increment(records);
        }
    }

    pub fn record_pipeline_finished(&self, status: PipelineStatus, total_duration_ms: u64) {
        counter!("harvest_pipeline_runs_total", "status" => status.as_str()).increment(1);
        histogram!("harvest_pipeline_duration_seconds").record(total_duration_ms as f64 / 1000.0);
    }

    pub fn record_workflow_execution(&self, success: bool, duration_ms: u64) {
        let result = if success { "success" } else { "failure" };
        counter!("harvest_workflow_executions_total", "result" => result).increment(1);
        self.workflow_execution_duration
            .record(duration_ms as f64 / 1000.0);
    }

    pub fn record_step_retry(&self, workflow: &str, step: &str, attempt: u32) {
        self.workflow_step_retries_total.increment(1);
        info!(
            workflow = workflow,
            step = step,
            attempt = attempt,
            "Workflow step retry scheduled"
        );
    }

    pub fn update_workflows_registered(&self, count: usize) {
        self.workflows_registered.set(count as f64);
    }

    pub fn record_health(&self, status: HealthStatus) {
        self.health_status.set(status.as_gauge());
    }

    pub fn record_resource_usage(&self, usage: &ResourceUsage) {
        self.system_cpu_usage.set(usage.cpu_percent as f64);
        self.system_memory_usage.set(usage.memory_percent as f64);
        self.system_disk_usage.set(usage.disk_percent as f64);
    }

    pub fn record_persistence_failure(&self, operation: &str) {
        self.persistence_failures_total.increment(1);
        warn!(operation = operation, "Persistence write failed");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
