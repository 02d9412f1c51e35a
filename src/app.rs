use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use harvest_config::AppConfig;
use harvest_dispatcher::{
    health_channel, HealthMonitor, HealthMonitorDeps, InMemoryJobRegistry, JobRegistry,
    JobRegistryDeps, SystemStatus, WorkflowEngine, WorkflowScheduler, WorkflowStatusReport,
};
use harvest_domain::{
    DestinationKind, EventBus, HealthSnapshot, Job, JobFilter, JobId, JobStatus, ResourceSampler,
    ScraperDescriptor, SourceKind, WorkflowDefinition, WorkflowExecution, WorkflowId,
    WorkflowSpec,
};
use harvest_errors::{HarvestError, HarvestResult};
use harvest_infrastructure::{
    ConfigScraperSource, DatabaseExtractor, DatabaseLoader, PersistenceBackend,
};
use harvest_observability::{local_hostname, MetricsCollector, SysinfoSampler};
use harvest_pipeline::{PipelineExecutor, StrategyRegistry};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 关闭时等待流水线任务退出的时长
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const BACKGROUND_GRACE: Duration = Duration::from_secs(10);
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 主应用程序
///
/// 持有连接池、后台循环和所有引擎组件，`shutdown` 或析构时统一释放。
pub struct Application {
    config: AppConfig,
    backend: PersistenceBackend,
    scrapers: Arc<ConfigScraperSource>,
    registry: InMemoryJobRegistry,
    workflows: Arc<WorkflowEngine>,
    monitor: Arc<HealthMonitor>,
    events: EventBus,
    shutdown: ShutdownManager,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let sampler = Arc::new(SysinfoSampler::new(config.health.disk_path.clone()));
        Self::with_sampler(config, sampler).await
    }

    pub async fn with_sampler(config: AppConfig, sampler: Arc<dyn ResourceSampler>) -> Result<Self> {
        info!(
            backend = ?config.database.backend,
            scrapers = config.scrapers.len(),
            max_concurrent_jobs = config.engine.max_concurrent_jobs,
            "初始化应用程序"
        );

        let metrics = Arc::new(MetricsCollector::new());
        let events = EventBus::new(config.engine.event_buffer_size);
        let backend = PersistenceBackend::connect(&config.database, config.engine.job_history_limit)
            .await
            .context("初始化持久化后端失败")?;

        let strategies = Arc::new(StrategyRegistry::with_defaults(&config.pipeline).await);
        match &backend.database {
            Some(database) => {
                strategies
                    .register_extractor(
                        SourceKind::Database,
                        Arc::new(DatabaseExtractor::new(database.pool().clone())),
                    )
                    .await;
                strategies
                    .register_loader(
                        DestinationKind::Database,
                        Arc::new(DatabaseLoader::new(database.pool().clone())),
                    )
                    .await;
            }
            None => warn!("未使用SQLite后端，database 类型的抽取与加载不可用"),
        }

        let executor = Arc::new(
            PipelineExecutor::new(
                strategies,
                config.pipeline.clone(),
                metrics.clone(),
                events.clone(),
            )
            .with_persistence(backend.sink.clone()),
        );

        let scrapers = Arc::new(ConfigScraperSource::from_config(&config));
        let (health_tx, health_feed) = health_channel();
        let registry = InMemoryJobRegistry::new(
            config.engine.clone(),
            JobRegistryDeps {
                scrapers: scrapers.clone(),
                executor: executor.clone(),
                persistence: Some(backend.sink.clone()),
                metrics: metrics.clone(),
                events: events.clone(),
                health: Some(health_feed),
            },
        );

        let workflows = Arc::new(
            WorkflowEngine::new(
                config.workflow.clone(),
                executor,
                metrics.clone(),
                events.clone(),
            )
            .with_persistence(backend.sink.clone()),
        );

        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            config.engine.stuck_job_threshold(),
            HealthMonitorDeps {
                registry: Arc::new(registry.clone()),
                sampler,
                persistence: Some(backend.sink.clone()),
                metrics,
                events: events.clone(),
                feed: health_tx,
                hostname: local_hostname(),
            },
        ));

        Ok(Self {
            config,
            backend,
            scrapers,
            registry,
            workflows,
            monitor,
            events,
            shutdown: ShutdownManager::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &InMemoryJobRegistry {
        &self.registry
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    /// 启动健康监控与工作流调度循环
    pub async fn start_background(&self) {
        let mut background = self.background.lock().await;
        if !background.is_empty() {
            warn!("后台任务已经启动");
            return;
        }

        if let Some(handle) = self.monitor.clone().start(self.shutdown.subscribe()) {
            background.push(handle);
        }
        if self.config.workflow.scheduler_enabled {
            let scheduler =
                WorkflowScheduler::new(self.workflows.clone(), self.config.workflow.scheduler_interval());
            background.push(scheduler.start(self.shutdown.subscribe()));
        } else {
            info!("工作流调度器已禁用");
        }
        info!(tasks = background.len(), "后台任务已启动");
    }

    /// 运行后台循环直到 `signal` 完成，然后优雅关闭
    pub async fn serve<F: Future<Output = ()>>(&self, signal: F) -> Result<()> {
        self.start_background().await;
        info!("编排引擎已就绪");
        signal.await;
        info!("收到关闭信号，开始优雅关闭...");
        self.shutdown().await;
        Ok(())
    }

    /// 停止后台循环和所有作业，释放连接池
    pub async fn shutdown(&self) {
        if !self.shutdown.shutdown() {
            return;
        }

        self.workflows.cancel_running().await;
        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for mut handle in handles {
            match tokio::time::timeout(BACKGROUND_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "后台任务异常退出"),
                Err(_) => {
                    warn!("后台任务未能按时退出，强制终止");
                    handle.abort();
                }
            }
        }
        self.registry.shutdown(SHUTDOWN_GRACE).await;
        self.backend.close().await;
        info!("应用程序已关闭");
    }

    pub async fn run_scraper(&self, scraper_id: &str) -> HarvestResult<Job> {
        self.registry.run_scraper(scraper_id).await
    }

    /// 启动作业并等待其进入终态
    pub async fn run_scraper_to_completion(
        &self,
        scraper_id: &str,
        timeout: Duration,
    ) -> HarvestResult<Job> {
        let job = self.registry.run_scraper(scraper_id).await?;
        let waited = tokio::time::timeout(timeout, async {
            let mut ticker = tokio::time::interval(JOB_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let current = self.registry.get_job_status(job.id).await?;
                if current.is_terminal() {
                    return Ok::<Job, HarvestError>(current);
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => {
                warn!(job_id = %job.id, "等待作业完成超时，停止作业");
                self.registry.stop_job(job.id).await?;
                Err(HarvestError::Timeout(format!(
                    "作业 {} 在 {} 秒内未完成",
                    job.id,
                    timeout.as_secs()
                )))
            }
        }
    }

    pub async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> HarvestResult<bool> {
        self.registry.update_job_status(job_id, status, None).await
    }

    pub async fn stop_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.registry.stop_job(job_id).await
    }

    pub async fn cancel_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.registry.cancel_job(job_id).await
    }

    pub async fn pause_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.registry.pause_job(job_id).await
    }

    pub async fn resume_job(&self, job_id: JobId) -> HarvestResult<bool> {
        self.registry.resume_job(job_id).await
    }

    pub async fn get_job_status(&self, job_id: JobId) -> HarvestResult<Job> {
        self.registry.get_job_status(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> HarvestResult<Vec<Job>> {
        self.registry.list_jobs(filter).await
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        self.registry.get_system_status().await
    }

    pub async fn create_workflow(&self, spec: &WorkflowSpec) -> HarvestResult<WorkflowId> {
        self.workflows.create_workflow(spec).await
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        params: Value,
    ) -> HarvestResult<WorkflowExecution> {
        self.workflows.execute_workflow(workflow_id, params).await
    }

    pub async fn schedule_workflow(
        &self,
        workflow_id: WorkflowId,
        schedule: Option<&str>,
        params: Value,
    ) -> HarvestResult<bool> {
        self.workflows
            .schedule_workflow(workflow_id, schedule, params)
            .await
    }

    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> HarvestResult<bool> {
        self.workflows.cancel_workflow(workflow_id).await
    }

    pub async fn get_workflow_status(
        &self,
        workflow_id: WorkflowId,
    ) -> HarvestResult<WorkflowStatusReport> {
        self.workflows.get_workflow_status(workflow_id).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.workflows.list_workflows().await
    }

    /// 最近一次健康快照；监控尚未运行时立即检查一次
    pub async fn get_health_snapshot(&self) -> HealthSnapshot {
        match self.monitor.latest().await {
            Some(snapshot) => snapshot,
            None => self.monitor.check_now().await,
        }
    }

    pub async fn health_history(&self) -> Vec<HealthSnapshot> {
        self.monitor.history().await
    }

    /// 用新的采集器描述整体替换当前配置
    pub async fn reload_scrapers(&self, scrapers: Vec<ScraperDescriptor>) {
        self.scrapers.replace_all(scrapers).await;
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        // 未经 shutdown 析构时通知后台循环退出，连接池随后台任务一同释放
        if self.shutdown.shutdown() {
            warn!("应用程序未经优雅关闭即被释放");
            if let Ok(mut background) = self.background.try_lock() {
                for handle in background.drain(..) {
                    handle.abort();
                }
            }
        }
    }
}
