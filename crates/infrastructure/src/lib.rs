//! 持久化与外部协作者的具体实现

pub mod database;
pub mod memory_persistence;
pub mod scraper_source;

pub use database::{
    DatabaseExtractor, DatabaseLoader, DatabaseManager, SqlitePersistence, RECORDS_TABLE,
};
pub use memory_persistence::InMemoryPersistence;
pub use scraper_source::ConfigScraperSource;

use std::sync::Arc;

use anyhow::Result;
use harvest_config::{DatabaseBackend, DatabaseConfig};
use harvest_domain::PersistenceSink;
use tracing::info;

/// 按配置选择的持久化后端
///
/// SQLite 后端同时持有连接池，供数据库抽取/加载策略复用。
pub struct PersistenceBackend {
    pub sink: Arc<dyn PersistenceSink>,
    pub database: Option<DatabaseManager>,
}

impl PersistenceBackend {
    pub async fn connect(config: &DatabaseConfig, history_limit: usize) -> Result<Self> {
        match config.backend {
            DatabaseBackend::Sqlite => {
                let database = DatabaseManager::connect(config).await?;
                Ok(Self {
                    sink: Arc::new(SqlitePersistence::new(database.pool().clone())),
                    database: Some(database),
                })
            }
            DatabaseBackend::Memory => {
                info!("使用进程内持久化，数据不会跨进程保留");
                Ok(Self {
                    sink: Arc::new(InMemoryPersistence::new(history_limit)),
                    database: None,
                })
            }
        }
    }

    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
