//! 作业注册表
//!
//! 持有所有活跃作业，执行并发上限检查并驱动作业状态转换。准入检查与状态修改
//! 在同一把互斥锁内完成，流水线本身在独立任务中运行。

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use harvest_config::EngineConfig;
use harvest_domain::{
    EngineEvent, EventBus, HealthSnapshot, HealthStatus, Job, JobFilter, JobId, JobMetrics,
    JobStatus, PersistenceSink, PipelineRun, PipelineStatus, ScraperSource,
};
use harvest_errors::{HarvestError, HarvestResult};
use harvest_observability::MetricsCollector;
use harvest_pipeline::{JobControl, PipelineExecutor, PipelineRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 最新健康快照的订阅端
pub type HealthFeed = watch::Receiver<Option<HealthSnapshot>>;

/// 系统状态概览
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStatus {
    /// 处于 Running 状态的作业数
    pub active_jobs: usize,
    pub paused_jobs: usize,
    pub capacity: usize,
    pub available_slots: usize,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// 作业注册表接口
///
/// 调用方只依赖此接口，便于替换为数据库或分布式锁实现。
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// 准入并启动采集作业，作业进入 Running 后立即返回
    async fn run_scraper(&self, scraper_id: &str) -> HarvestResult<Job>;

    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        metrics: Option<JobMetrics>,
    ) -> HarvestResult<bool>;

    /// 已处于终态的作业返回 `false`
    async fn stop_job(&self, job_id: JobId) -> HarvestResult<bool>;
    async fn cancel_job(&self, job_id: JobId) -> HarvestResult<bool>;
    async fn pause_job(&self, job_id: JobId) -> HarvestResult<bool>;
    /// 恢复时重新检查并发上限
    async fn resume_job(&self, job_id: JobId) -> HarvestResult<bool>;

    /// 同时查询活跃作业与已归档作业
    async fn get_job_status(&self, job_id: JobId) -> HarvestResult<Job>;
    async fn list_jobs(&self, filter: &JobFilter) -> HarvestResult<Vec<Job>>;
    async fn get_system_status(&self) -> SystemStatus;

    async fn active_job_count(&self) -> usize;
    async fn stuck_jobs(&self, threshold: Duration) -> Vec<Job>;
}

/// 流水线结束时作业处于暂停状态，结果暂存到恢复时再应用
#[derive(Debug, Clone)]
struct PipelineOutcome {
    status: JobStatus,
    reason: Option<String>,
    metrics: JobMetrics,
    run_id: Option<Uuid>,
}

impl PipelineOutcome {
    fn from_result(result: HarvestResult<PipelineRun>) -> Self {
        match result {
            Ok(run) => Self {
                status: match run.status {
                    PipelineStatus::Completed => JobStatus::Completed,
                    PipelineStatus::Cancelled => JobStatus::Cancelled,
                    PipelineStatus::Failed | PipelineStatus::Running => JobStatus::Failed,
                },
                reason: run.error.clone(),
                metrics: run.to_job_metrics(),
                run_id: Some(run.id),
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            status: JobStatus::Failed,
            reason: Some(reason),
            metrics: JobMetrics::default(),
            run_id: None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知原因".to_string()
    }
}

struct JobEntry {
    job: Job,
    control: JobControl,
    deferred: Option<PipelineOutcome>,
}

impl JobEntry {
    /// 作业已终止且流水线任务已结束，可以归档
    fn is_settled(&self) -> bool {
        self.job.is_terminal() && self.deferred.is_some()
    }
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<JobId, JobEntry>,
    archive: VecDeque<Job>,
}

impl RegistryState {
    fn running_count(&self) -> usize {
        self.active
            .values()
            .filter(|entry| entry.job.status == JobStatus::Running)
            .count()
    }

    fn count_status(&self, status: JobStatus) -> usize {
        self.active
            .values()
            .filter(|entry| entry.job.status == status)
            .count()
    }

    fn archived(&self, job_id: JobId) -> Option<&Job> {
        self.archive.iter().find(|job| job.id == job_id)
    }

    fn archive_job(&mut self, job_id: JobId, limit: usize) {
        if let Some(entry) = self.active.remove(&job_id) {
            self.archive.push_back(entry.job);
            while self.archive.len() > limit {
                self.archive.pop_front();
            }
        }
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    scrapers: Arc<dyn ScraperSource>,
    executor: Arc<PipelineExecutor>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    config: EngineConfig,
    health: Option<HealthFeed>,
    tasks: Mutex<JoinSet<()>>,
}

/// 单进程内存作业注册表
#[derive(Clone)]
pub struct InMemoryJobRegistry {
    inner: Arc<RegistryInner>,
}

/// 构建注册表所需的依赖
pub struct JobRegistryDeps {
    pub scrapers: Arc<dyn ScraperSource>,
    pub executor: Arc<PipelineExecutor>,
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    pub metrics: Arc<MetricsCollector>,
    pub events: EventBus,
    pub health: Option<HealthFeed>,
}

impl InMemoryJobRegistry {
    pub fn new(config: EngineConfig, deps: JobRegistryDeps) -> Self {
        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            "初始化作业注册表"
        );
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                scrapers: deps.scrapers,
                executor: deps.executor,
                persistence: deps.persistence,
                metrics: deps.metrics,
                events: deps.events,
                config,
                health: deps.health,
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.max_concurrent_jobs
    }

    /// 停止所有未结束的作业并等待流水线任务退出
    pub async fn shutdown(&self, grace: Duration) {
        let job_ids: Vec<JobId> = {
            let state = self.inner.state.lock().await;
            state
                .active
                .values()
                .filter(|entry| !entry.job.is_terminal())
                .map(|entry| entry.job.id)
                .collect()
        };
        for job_id in job_ids {
            if let Err(e) = self
                .inner
                .terminate(job_id, JobStatus::Stopped, "系统关闭")
                .await
            {
                warn!(job_id = %job_id, error = %e, "关闭时停止作业失败");
            }
        }

        let mut tasks = self.inner.tasks.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "等待流水线任务退出超时，强制中止");
            tasks.abort_all();
        }
        info!("作业注册表已关闭");
    }
}

impl RegistryInner {
    fn publish_transition(&self, job: &Job, from: JobStatus) {
        self.events.publish(EngineEvent::JobStatusChanged {
            job_id: job.id,
            scraper_id: job.scraper_id.clone(),
            from,
            to: job.status,
            occurred_at: Utc::now(),
        });
    }

    async fn persist(&self, job: &Job) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_job(job).await {
                self.metrics.record_persistence_failure("save_job");
                warn!(job_id = %job.id, error = %e, "保存作业失败，内存状态保持不变");
            }
        }
    }

    /// 对活跃作业执行一次转换，返回转换后的快照
    fn apply_transition(
        &self,
        state: &mut RegistryState,
        job_id: JobId,
        next: JobStatus,
        reason: Option<String>,
    ) -> HarvestResult<Job> {
        let entry = state
            .active
            .get_mut(&job_id)
            .ok_or_else(|| HarvestError::job_not_found(job_id))?;
        let from = entry.job.status;
        entry.job.transition(next, reason)?;
        self.publish_transition(&entry.job, from);
        if next.is_terminal() {
            self.metrics.record_job_finished(next);
            entry.control.cancel();
        }
        debug!(job_id = %job_id, from = %from, to = %next, "作业状态转换");
        Ok(entry.job.clone())
    }

    fn settle(&self, state: &mut RegistryState, job_id: JobId) {
        let settled = state
            .active
            .get(&job_id)
            .map(JobEntry::is_settled)
            .unwrap_or(false);
        if settled {
            state.archive_job(job_id, self.config.job_history_limit);
        }
        self.metrics.update_active_jobs(state.running_count());
    }

    /// 停止或取消：活跃作业转入终态并触发取消令牌
    async fn terminate(&self, job_id: JobId, status: JobStatus, reason: &str) -> HarvestResult<bool> {
        let job = {
            let mut state = self.state.lock().await;
            match state.active.get(&job_id) {
                Some(entry) if entry.job.is_terminal() => return Ok(false),
                Some(_) => {}
                None if state.archived(job_id).is_some() => return Ok(false),
                None => return Err(HarvestError::job_not_found(job_id)),
            }
            let job = self.apply_transition(&mut state, job_id, status, Some(reason.to_string()))?;
            self.settle(&mut state, job_id);
            job
        };

        info!(job_id = %job_id, status = %status, reason, "作业已终止");
        self.persist(&job).await;
        Ok(true)
    }

    /// 流水线任务结束
    async fn complete_job(&self, job_id: JobId, outcome: PipelineOutcome) {
        let job = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.active.get_mut(&job_id) else {
                warn!(job_id = %job_id, "流水线结束时作业已不在注册表中");
                return;
            };

            entry.job.metrics.merge(&outcome.metrics);
            if entry.job.pipeline_run_id.is_none() {
                entry.job.pipeline_run_id = outcome.run_id;
            }

            let current = entry.job.status;
            match current {
                JobStatus::Running => {
                    entry.deferred = Some(outcome.clone());
                    if let Err(e) =
                        self.apply_transition(&mut state, job_id, outcome.status, outcome.reason)
                    {
                        error!(job_id = %job_id, error = %e, "应用流水线结果失败");
                    }
                }
                JobStatus::Paused => {
                    info!(job_id = %job_id, "作业处于暂停状态，流水线结果待恢复后应用");
                    entry.deferred = Some(outcome);
                }
                _ => {
                    // 已被停止或取消，只保留指标
                    entry.deferred = Some(outcome);
                }
            }

            let job = state.active.get(&job_id).map(|entry| entry.job.clone());
            self.settle(&mut state, job_id);
            job
        };

        if let Some(job) = job {
            info!(
                job_id = %job.id,
                scraper_id = %job.scraper_id,
                status = %job.status,
                records_loaded = ?job.metrics.records_loaded,
                "作业结束"
            );
            self.persist(&job).await;
        }
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn run_scraper(&self, scraper_id: &str) -> HarvestResult<Job> {
        let inner = &self.inner;
        let scraper = inner.scrapers.get_scraper_by_id(scraper_id).await?;
        if !scraper.is_enabled() {
            return Err(HarvestError::InvalidState(format!(
                "采集器 {scraper_id} 已禁用"
            )));
        }

        let (job, control) = {
            let mut state = inner.state.lock().await;
            let running = state.running_count();
            if running >= inner.config.max_concurrent_jobs {
                inner.metrics.record_job_rejected(scraper_id);
                warn!(
                    scraper_id,
                    running,
                    capacity = inner.config.max_concurrent_jobs,
                    "并发作业已达上限，拒绝准入"
                );
                return Err(HarvestError::ResourceExhausted(format!(
                    "运行中的作业数已达上限 {}",
                    inner.config.max_concurrent_jobs
                )));
            }

            let mut job = Job::new(scraper.id.clone(), scraper.data_type.clone());
            job.transition(JobStatus::Running, None)?;
            let control = JobControl::new();
            state.active.insert(
                job.id,
                JobEntry {
                    job: job.clone(),
                    control: control.clone(),
                    deferred: None,
                },
            );
            inner.publish_transition(&job, JobStatus::Pending);
            inner.metrics.record_job_started(scraper_id);
            inner.metrics.update_active_jobs(state.running_count());
            (job, control)
        };

        info!(job_id = %job.id, scraper_id, "作业已准入，开始执行流水线");
        inner.persist(&job).await;

        let task_inner = Arc::clone(inner);
        let request = PipelineRequest::for_scraper(job.id, &scraper);
        let job_id = job.id;
        {
            let mut tasks = inner.tasks.lock().await;
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                let run = AssertUnwindSafe(task_inner.executor.execute(request, &control));
                let outcome = match run.catch_unwind().await {
                    Ok(result) => PipelineOutcome::from_result(result),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(job_id = %job_id, panic = %message, "流水线任务异常终止");
                        PipelineOutcome::failed(format!("流水线任务异常终止: {message}"))
                    }
                };
                task_inner.complete_job(job_id, outcome).await;
            });
        }

        Ok(job)
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        metrics: Option<JobMetrics>,
    ) -> HarvestResult<bool> {
        let inner = &self.inner;
        let current = self.get_job_status(job_id).await?;

        match (current.status, status) {
            (JobStatus::Running, JobStatus::Paused) => return self.pause_job(job_id).await,
            (JobStatus::Paused, JobStatus::Running) => return self.resume_job(job_id).await,
            _ => {}
        }

        let job = {
            let mut state = inner.state.lock().await;
            if !state.active.contains_key(&job_id) {
                return Err(HarvestError::invalid_transition(current.status, status));
            }
            if let (Some(metrics), Some(entry)) = (&metrics, state.active.get_mut(&job_id)) {
                entry.job.metrics.merge(metrics);
            }
            let job = inner.apply_transition(&mut state, job_id, status, None)?;
            inner.settle(&mut state, job_id);
            job
        };

        inner.persist(&job).await;
        Ok(true)
    }

    async fn stop_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.inner
            .terminate(job_id, JobStatus::Stopped, "操作员停止")
            .await
    }

    async fn cancel_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.inner
            .terminate(job_id, JobStatus::Cancelled, "操作员取消")
            .await
    }

    async fn pause_job(&self, job_id: JobId) -> HarvestResult<bool> {
        let inner = &self.inner;
        let job = {
            let mut state = inner.state.lock().await;
            let status = match state.active.get(&job_id) {
                Some(entry) => entry.job.status,
                None => {
                    return match state.archived(job_id) {
                        Some(job) => Err(HarvestError::invalid_transition(
                            job.status,
                            JobStatus::Paused,
                        )),
                        None => Err(HarvestError::job_not_found(job_id)),
                    }
                }
            };
            if status == JobStatus::Paused {
                return Ok(false);
            }

            let job = inner.apply_transition(&mut state, job_id, JobStatus::Paused, None)?;
            if let Some(entry) = state.active.get(&job_id) {
                entry.control.pause();
            }
            inner.metrics.update_active_jobs(state.running_count());
            job
        };

        info!(job_id = %job_id, "作业已暂停，将在下一个阶段边界等待");
        inner.persist(&job).await;
        Ok(true)
    }

    async fn resume_job(&self, job_id: JobId) -> HarvestResult<bool> {
        let inner = &self.inner;
        let job = {
            let mut state = inner.state.lock().await;
            let status = match state.active.get(&job_id) {
                Some(entry) => entry.job.status,
                None => {
                    return match state.archived(job_id) {
                        Some(job) => Err(HarvestError::invalid_transition(
                            job.status,
                            JobStatus::Running,
                        )),
                        None => Err(HarvestError::job_not_found(job_id)),
                    }
                }
            };
            if status == JobStatus::Running {
                return Ok(false);
            }
            if status == JobStatus::Paused
                && state.running_count() >= inner.config.max_concurrent_jobs
            {
                return Err(HarvestError::ResourceExhausted(format!(
                    "运行中的作业数已达上限 {}，无法恢复",
                    inner.config.max_concurrent_jobs
                )));
            }

            let mut job = inner.apply_transition(&mut state, job_id, JobStatus::Running, None)?;
            let deferred = state.active.get(&job_id).and_then(|entry| {
                entry.control.resume();
                entry.deferred.clone()
            });
            if let Some(outcome) = deferred {
                job = inner.apply_transition(&mut state, job_id, outcome.status, outcome.reason)?;
            }
            inner.settle(&mut state, job_id);
            job
        };

        info!(job_id = %job_id, status = %job.status, "作业已恢复");
        inner.persist(&job).await;
        Ok(true)
    }

    async fn get_job_status(&self, job_id: JobId) -> HarvestResult<Job> {
        let state = self.inner.state.lock().await;
        state
            .active
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .or_else(|| state.archived(job_id).cloned())
            .ok_or_else(|| HarvestError::job_not_found(job_id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> HarvestResult<Vec<Job>> {
        let state = self.inner.state.lock().await;
        let mut jobs: Vec<Job> = state
            .active
            .values()
            .map(|entry| &entry.job)
            .chain(state.archive.iter())
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn get_system_status(&self) -> SystemStatus {
        let inner = &self.inner;
        let (active_jobs, paused_jobs, stuck) = {
            let state = inner.state.lock().await;
            let threshold = chrono::Duration::from_std(inner.config.stuck_job_threshold())
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            let now = Utc::now();
            let stuck = state
                .active
                .values()
                .filter(|entry| entry.job.is_stuck(threshold, now))
                .count();
            (
                state.running_count(),
                state.count_status(JobStatus::Paused),
                stuck,
            )
        };

        let latest = inner
            .health
            .as_ref()
            .and_then(|feed| feed.borrow().clone());
        let (health_status, last_health_check) = match latest {
            Some(snapshot) => (snapshot.overall, Some(snapshot.timestamp)),
            // 尚无快照时只根据卡住的作业判断
            None if stuck > 0 => (HealthStatus::Degraded, None),
            None => (HealthStatus::Healthy, None),
        };

        let capacity = inner.config.max_concurrent_jobs;
        SystemStatus {
            active_jobs,
            paused_jobs,
            capacity,
            available_slots: capacity.saturating_sub(active_jobs),
            health_status,
            last_health_check,
        }
    }

    async fn active_job_count(&self) -> usize {
        self.inner.state.lock().await.running_count()
    }

    async fn stuck_jobs(&self, threshold: Duration) -> Vec<Job> {
        let threshold =
            chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::hours(1));
        let now = Utc::now();
        self.inner
            .state
            .lock()
            .await
            .active
            .values()
            .filter(|entry| entry.job.is_stuck(threshold, now))
            .map(|entry| entry.job.clone())
            .collect()
    }
}
