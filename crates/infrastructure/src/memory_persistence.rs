use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use harvest_domain::{
    HealthSnapshot, Job, JobId, PersistenceSink, PipelineRun, WorkflowExecution,
};
use harvest_errors::HarvestResult;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 进程内持久化，重启即丢失
///
/// 作业与运行记录按ID覆盖保存，执行记录与健康快照按上限滚动保留。
pub struct InMemoryPersistence {
    jobs: RwLock<HashMap<JobId, Job>>,
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
    executions: RwLock<VecDeque<WorkflowExecution>>,
    snapshots: RwLock<VecDeque<HealthSnapshot>>,
    history_limit: usize,
}

impl InMemoryPersistence {
    pub fn new(history_limit: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            executions: RwLock::new(VecDeque::new()),
            snapshots: RwLock::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn pipeline_run(&self, id: Uuid) -> Option<PipelineRun> {
        self.runs.read().await.get(&id).cloned()
    }

    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.executions.read().await.iter().cloned().collect()
    }

    pub async fn snapshots(&self) -> Vec<HealthSnapshot> {
        self.snapshots.read().await.iter().cloned().collect()
    }

    fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
        queue.push_back(item);
        while queue.len() > limit {
            queue.pop_front();
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl PersistenceSink for InMemoryPersistence {
    async fn save_job(&self, job: &Job) -> HarvestResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn save_pipeline_run(&self, run: &PipelineRun) -> HarvestResult<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn save_workflow_execution(&self, execution: &WorkflowExecution) -> HarvestResult<()> {
        let mut executions = self.executions.write().await;
        Self::push_bounded(&mut executions, execution.clone(), self.history_limit);
        Ok(())
    }

    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> HarvestResult<()> {
        let mut snapshots = self.snapshots.write().await;
        Self::push_bounded(&mut snapshots, snapshot.clone(), self.history_limit);
        Ok(())
    }

    async fn ping(&self) -> HarvestResult<()> {
        Ok(())
    }
}
