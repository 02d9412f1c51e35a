use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::workflow_engine::WorkflowEngine;

/// 工作流调度循环
///
/// 按固定间隔检查到期的工作流并以 `Scheduled` 触发执行。
pub struct WorkflowScheduler {
    engine: Arc<WorkflowEngine>,
    interval: Duration,
}

impl WorkflowScheduler {
    pub fn new(engine: Arc<WorkflowEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// 执行一次到期检查，返回本轮触发的执行数
    pub async fn tick(&self) -> usize {
        let executions = self.engine.run_due_workflows(Utc::now()).await;
        if !executions.is_empty() {
            let failed = executions.iter().filter(|e| !e.success).count();
            info!(triggered = executions.len(), failed, "调度轮次完成");
        }
        executions.len()
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "工作流调度器已启动");
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = self.tick();
                        tokio::pin!(tick);
                        tokio::select! {
                            triggered = &mut tick => debug!(triggered, "调度检查完成"),
                            result = shutdown_rx.recv() => {
                                if let Err(e) = result {
                                    warn!(error = %e, "关闭信号通道异常，调度器退出");
                                }
                                // 中断后本轮执行很快以取消结束，等待其记录完成
                                let interrupted = self.engine.cancel_running().await;
                                let triggered = tick.await;
                                info!(interrupted, triggered, "调度轮次被关闭信号中断");
                                break;
                            }
                        }
                    }
                    result = shutdown_rx.recv() => {
                        if let Err(e) = result {
                            warn!(error = %e, "关闭信号通道异常，调度器退出");
                        }
                        break;
                    }
                }
            }
            info!("工作流调度器已停止");
        })
    }
}
