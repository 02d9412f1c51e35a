use async_trait::async_trait;
use harvest_domain::{
    ExecutionTrigger, HealthSnapshot, Job, JobId, PersistenceSink, PipelineRun,
    WorkflowExecution, WorkflowId,
};
use harvest_errors::{HarvestError, HarvestResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// 基于SQLite的持久化实现
///
/// 关键字段单独成列便于查询，完整实体以JSON存入 `payload` 列。
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode<T: serde::de::DeserializeOwned>(row: &sqlx::sqlite::SqliteRow) -> HarvestResult<T> {
        let payload: String = row.try_get("payload")?;
        Ok(serde_json::from_str(&payload)?)
    }

    pub async fn find_job(&self, id: JobId) -> HarvestResult<Option<Job>> {
        let row = sqlx::query("SELECT payload FROM jobs WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    pub async fn jobs_for_scraper(&self, scraper_id: &str, limit: i64) -> HarvestResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT payload FROM jobs WHERE scraper_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(scraper_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    pub async fn recent_pipeline_runs(
        &self,
        scraper_id: &str,
        limit: i64,
    ) -> HarvestResult<Vec<PipelineRun>> {
        let rows = sqlx::query(
            "SELECT payload FROM pipeline_runs WHERE scraper_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(scraper_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    pub async fn executions_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: i64,
    ) -> HarvestResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            "SELECT payload FROM workflow_executions WHERE workflow_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(workflow_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    pub async fn recent_health_snapshots(&self, limit: i64) -> HarvestResult<Vec<HealthSnapshot>> {
        let rows = sqlx::query("SELECT payload FROM health_snapshots ORDER BY id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    /// 只保留最近 `keep` 条健康快照，返回删除的行数
    pub async fn prune_health_snapshots(&self, keep: i64) -> HarvestResult<u64> {
        let result = sqlx::query(
            "DELETE FROM health_snapshots WHERE id NOT IN (SELECT id FROM health_snapshots ORDER BY id DESC LIMIT $1)",
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PersistenceSink for SqlitePersistence {
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    async fn save_job(&self, job: &Job) -> HarvestResult<()> {
        let payload = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, scraper_id, data_type, status, created_at, started_at,
                              completed_at, last_error, payload, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                last_error = excluded.last_error,
                payload = excluded.payload,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.scraper_id)
        .bind(&job.data_type)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.last_error)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| HarvestError::persistence(format!("保存作业 {} 失败: {e}", job.id)))?;

        debug!("作业已保存");
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, scraper_id = %run.scraper_id))]
    async fn save_pipeline_run(&self, run: &PipelineRun) -> HarvestResult<()> {
        let payload = serde_json::to_string(run)?;
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, job_id, scraper_id, status, failed_stage, error,
                                       started_at, completed_at, total_duration_ms, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                failed_stage = excluded.failed_stage,
                error = excluded.error,
                completed_at = excluded.completed_at,
                total_duration_ms = excluded.total_duration_ms,
                payload = excluded.payload
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.job_id.map(|id| id.to_string()))
        .bind(&run.scraper_id)
        .bind(run.status.as_str())
        .bind(run.failed_stage.map(|stage| stage.as_str()))
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.total_duration_ms.map(|ms| ms as i64))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| HarvestError::persistence(format!("保存流水线运行记录 {} 失败: {e}", run.id)))?;

        debug!("流水线运行记录已保存");
        Ok(())
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, workflow_id = %execution.workflow_id))]
    async fn save_workflow_execution(&self, execution: &WorkflowExecution) -> HarvestResult<()> {
        let payload = serde_json::to_string(execution)?;
        let trigger = match execution.trigger {
            ExecutionTrigger::Manual => "manual",
            ExecutionTrigger::Scheduled => "scheduled",
        };
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, workflow_version, trigger_type, success,
                                             error, started_at, completed_at, duration_ms, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.workflow_version as i64)
        .bind(trigger)
        .bind(execution.success)
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms as i64)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            HarvestError::persistence(format!("保存工作流执行记录 {} 失败: {e}", execution.id))
        })?;

        debug!("工作流执行记录已保存");
        Ok(())
    }

    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> HarvestResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        let warnings = serde_json::to_string(&snapshot.warnings)?;
        sqlx::query(
            r#"
            INSERT INTO health_snapshots (recorded_at, hostname, overall, warnings, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.timestamp)
        .bind(&snapshot.hostname)
        .bind(snapshot.overall.as_str())
        .bind(warnings)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| HarvestError::persistence(format!("追加健康快照失败: {e}")))?;
        Ok(())
    }

    async fn ping(&self) -> HarvestResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| HarvestError::persistence(format!("数据库不可达: {e}")))?;
        Ok(())
    }
}
