//! 健康监控
//!
//! 只做观测，不对作业采取任何纠正措施。资源检查与依赖检查使用不同的周期，
//! 每个周期生成一个完整的健康快照。

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use harvest_config::HealthMonitorConfig;
use harvest_domain::{
    ComponentHealth, EngineEvent, EventBus, HealthSnapshot, HealthStatus, PersistenceSink,
    ResourceSampler, ResourceUsage,
};
use harvest_observability::MetricsCollector;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::job_registry::{HealthFeed, JobRegistry};

/// 创建健康快照的发布/订阅通道
pub fn health_channel() -> (watch::Sender<Option<HealthSnapshot>>, HealthFeed) {
    watch::channel(None)
}

/// 按阈值评估一次资源采样
pub fn evaluate_resources(
    usage: &ResourceUsage,
    config: &HealthMonitorConfig,
) -> (HealthStatus, Vec<String>) {
    let readings = [
        ("CPU", usage.cpu_percent, config.cpu_degraded_percent),
        ("内存", usage.memory_percent, config.memory_degraded_percent),
        ("磁盘", usage.disk_percent, config.disk_degraded_percent),
    ];

    let mut status = HealthStatus::Healthy;
    let mut warnings = Vec::new();
    for (name, value, degraded) in readings {
        if value > config.unhealthy_percent {
            status = status.worst(HealthStatus::Unhealthy);
            warnings.push(format!(
                "{name}使用率 {value:.1}% 超过不健康阈值 {:.1}%",
                config.unhealthy_percent
            ));
        } else if value > degraded {
            status = status.worst(HealthStatus::Degraded);
            warnings.push(format!("{name}使用率 {value:.1}% 超过降级阈值 {degraded:.1}%"));
        }
    }
    (status, warnings)
}

pub struct HealthMonitorDeps {
    pub registry: Arc<dyn JobRegistry>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    pub metrics: Arc<MetricsCollector>,
    pub events: EventBus,
    pub feed: watch::Sender<Option<HealthSnapshot>>,
    pub hostname: String,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    stuck_threshold: std::time::Duration,
    deps: HealthMonitorDeps,
    database: RwLock<ComponentHealth>,
    history: RwLock<VecDeque<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        stuck_threshold: std::time::Duration,
        deps: HealthMonitorDeps,
    ) -> Self {
        Self {
            config,
            stuck_threshold,
            deps,
            database: RwLock::new(ComponentHealth::healthy()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// 数据库可达性探测，结果缓存到下一次依赖检查
    pub async fn check_dependencies(&self) -> ComponentHealth {
        let health = match &self.deps.persistence {
            None => ComponentHealth::with_status(HealthStatus::Healthy, "未配置持久化"),
            Some(persistence) => match persistence.ping().await {
                Ok(()) => ComponentHealth::healthy(),
                Err(e) => {
                    warn!(error = %e, "数据库不可达");
                    ComponentHealth::with_status(HealthStatus::Unhealthy, format!("数据库不可达: {e}"))
                }
            },
        };
        *self.database.write().await = health.clone();
        health
    }

    /// 完整检查：依赖探测后再执行一次资源周期
    pub async fn check_now(&self) -> HealthSnapshot {
        self.check_dependencies().await;
        self.run_cycle().await
    }

    /// 资源采样与卡住作业扫描，复用最近一次的依赖检查结果
    pub async fn run_cycle(&self) -> HealthSnapshot {
        let mut warnings = Vec::new();
        let database = self.database.read().await.clone();
        if let Some(message) = database.message.as_ref().filter(|_| database.status != HealthStatus::Healthy) {
            warnings.push(message.clone());
        }

        let stuck = self.deps.registry.stuck_jobs(self.stuck_threshold).await;
        let job_registry = if stuck.is_empty() {
            ComponentHealth::healthy()
        } else {
            for job in &stuck {
                warnings.push(format!(
                    "作业 {} (采集器 {}) 运行时间超过 {} 秒",
                    job.id,
                    job.scraper_id,
                    self.stuck_threshold.as_secs()
                ));
            }
            ComponentHealth::with_status(
                HealthStatus::Degraded,
                format!("{} 个作业疑似卡住", stuck.len()),
            )
        };
        self.deps.metrics.update_stuck_jobs(stuck.len());

        let (resources, resource_usage) = match self.deps.sampler.sample().await {
            Ok(usage) => {
                self.deps.metrics.record_resource_usage(&usage);
                let (status, resource_warnings) = evaluate_resources(&usage, &self.config);
                let component = if resource_warnings.is_empty() {
                    ComponentHealth::healthy()
                } else {
                    ComponentHealth::with_status(status, resource_warnings.join("; "))
                };
                warnings.extend(resource_warnings);
                (component, Some(usage))
            }
            Err(e) => {
                error!(error = %e, "资源采样失败");
                warnings.push(format!("资源采样失败: {e}"));
                (
                    ComponentHealth::with_status(HealthStatus::Degraded, "资源采样失败"),
                    None,
                )
            }
        };

        let overall = database
            .status
            .worst(job_registry.status)
            .worst(resources.status);
        let snapshot = HealthSnapshot {
            timestamp: Utc::now(),
            hostname: self.deps.hostname.clone(),
            overall,
            database,
            job_registry,
            resources,
            resource_usage,
            active_jobs: self.deps.registry.active_job_count().await,
            stuck_jobs: stuck.iter().map(|job| job.id).collect(),
            warnings,
        };
        self.publish(&snapshot).await;
        snapshot
    }

    async fn publish(&self, snapshot: &HealthSnapshot) {
        match snapshot.overall {
            HealthStatus::Healthy => debug!(active_jobs = snapshot.active_jobs, "健康检查通过"),
            status => warn!(
                status = %status,
                warnings = ?snapshot.warnings,
                "健康检查发现问题"
            ),
        }

        {
            let mut history = self.history.write().await;
            history.push_back(snapshot.clone());
            while history.len() > self.config.history_size {
                history.pop_front();
            }
        }

        self.deps.metrics.record_health(snapshot.overall);
        self.deps.feed.send_replace(Some(snapshot.clone()));
        self.deps.events.publish(EngineEvent::HealthReported {
            status: snapshot.overall,
            warnings: snapshot.warnings.clone(),
            occurred_at: snapshot.timestamp,
        });

        if self.config.persist_snapshots {
            if let Some(persistence) = &self.deps.persistence {
                if let Err(e) = persistence.append_health_snapshot(snapshot).await {
                    self.deps.metrics.record_persistence_failure("append_health_snapshot");
                    warn!(error = %e, "保存健康快照失败");
                }
            }
        }
    }

    pub async fn latest(&self) -> Option<HealthSnapshot> {
        self.history.read().await.back().cloned()
    }

    /// 按时间顺序返回保留的快照
    pub async fn history(&self) -> Vec<HealthSnapshot> {
        self.history.read().await.iter().cloned().collect()
    }

    /// 启动后台监控循环，未启用时返回 `None`
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("健康监控已禁用");
            return None;
        }

        Some(tokio::spawn(async move {
            info!(
                resource_interval_secs = self.config.resource_check_interval_seconds,
                dependency_interval_secs = self.config.dependency_check_interval_seconds,
                "健康监控已启动"
            );
            let mut resource_ticker = interval(self.config.resource_check_interval());
            let mut dependency_ticker = interval(self.config.dependency_check_interval());
            resource_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            dependency_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 依赖检查的首个tick已包含资源周期
            resource_ticker.tick().await;

            loop {
                tokio::select! {
                    _ = dependency_ticker.tick() => {
                        self.check_now().await;
                    }
                    _ = resource_ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("收到关闭信号，健康监控退出");
                        break;
                    }
                }
            }
            info!("健康监控已停止");
        }))
    }
}
