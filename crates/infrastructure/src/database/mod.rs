pub mod record_store;
pub mod sqlite_persistence;

pub use record_store::{DatabaseExtractor, DatabaseLoader, RECORDS_TABLE};
pub use sqlite_persistence::SqlitePersistence;

use std::str::FromStr;

use anyhow::{Context, Result};
use harvest_config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// SQLite连接池及表结构管理
///
/// 连接池随 `DatabaseManager` 一同释放，`close` 用于优雅关闭时显式等待连接归还。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.url, "创建SQLite数据库连接池");

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .context("解析数据库URL失败")?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存数据库每个连接各自独立，只能保留单个常驻连接
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.connection_timeout())
            .connect_with(options)
            .await
            .context("创建数据库连接池失败")?;

        let manager = Self { pool };
        manager.migrate().await.context("运行数据库迁移失败")?;
        info!("✅ 数据库连接池创建完成");
        Ok(manager)
    }

    /// 仅供测试使用的内存数据库
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("运行SQLite数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                scraper_id TEXT NOT NULL,
                data_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                started_at DATETIME,
                completed_at DATETIME,
                last_error TEXT,
                payload TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建作业表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                job_id TEXT,
                scraper_id TEXT NOT NULL,
                status TEXT NOT NULL,
                failed_stage TEXT,
                error TEXT,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                total_duration_ms INTEGER,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建流水线运行记录表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_version INTEGER NOT NULL,
                trigger_type TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                duration_ms INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建工作流执行记录表失败")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS health_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at DATETIME NOT NULL,
                hostname TEXT NOT NULL,
                overall TEXT NOT NULL,
                warnings TEXT NOT NULL DEFAULT '[]',
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建健康快照表失败")?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {RECORDS_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scraper_id TEXT NOT NULL,
                data_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                loaded_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ))
        .execute(&self.pool)
        .await
        .context("创建采集数据表失败")?;

        for (statement, what) in [
            (
                "CREATE INDEX IF NOT EXISTS idx_jobs_scraper_id ON jobs(scraper_id)",
                "作业采集器索引",
            ),
            (
                "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
                "作业状态索引",
            ),
            (
                "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_scraper_id ON pipeline_runs(scraper_id)",
                "流水线运行记录采集器索引",
            ),
            (
                "CREATE INDEX IF NOT EXISTS idx_workflow_executions_workflow_id ON workflow_executions(workflow_id)",
                "工作流执行记录索引",
            ),
            (
                "CREATE INDEX IF NOT EXISTS idx_harvested_records_data_type ON harvested_records(data_type)",
                "采集数据类型索引",
            ),
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("创建{what}失败"))?;
        }

        info!("✅ 数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
