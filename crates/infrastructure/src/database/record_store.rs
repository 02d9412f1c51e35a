//! `harvested_records` 表上的抽取与加载策略

use std::time::Instant;

use async_trait::async_trait;
use harvest_domain::{
    DestinationKind, ExtractRequest, Extractor, LoadRequest, LoadResult, Loader, Record,
};
use harvest_errors::{HarvestError, HarvestResult};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const RECORDS_TABLE: &str = "harvested_records";

const DEFAULT_EXTRACT_LIMIT: i64 = 1000;

/// 从采集数据表读取记录
///
/// 选项: `data_type` 覆盖请求中的数据类型，`scraper_id` 限定来源采集器，`limit` 最大行数。
pub struct DatabaseExtractor {
    pool: SqlitePool,
}

impl DatabaseExtractor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for DatabaseExtractor {
    fn name(&self) -> &str {
        "database"
    }

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        let options = &request.config.options;
        let data_type = options
            .get("data_type")
            .and_then(Value::as_str)
            .unwrap_or(&request.data_type);
        let limit = options
            .get("limit")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_EXTRACT_LIMIT);

        let rows = match options.get("scraper_id").and_then(Value::as_str) {
            Some(scraper_id) => {
                sqlx::query(
                    "SELECT payload FROM harvested_records WHERE data_type = $1 AND scraper_id = $2 ORDER BY id LIMIT $3",
                )
                .bind(data_type)
                .bind(scraper_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT payload FROM harvested_records WHERE data_type = $1 ORDER BY id LIMIT $2",
                )
                .bind(data_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| HarvestError::execution("extract", format!("查询采集数据失败: {e}")))?;

        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled("数据库抽取被中断".to_string()));
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<Value>(&payload)? {
                Value::Object(record) => records.push(record),
                other => {
                    let mut record = Record::new();
                    record.insert("value".to_string(), other);
                    records.push(record);
                }
            }
        }

        debug!(data_type, count = records.len(), "数据库抽取完成");
        Ok(records)
    }
}

/// 把转换后的记录写入采集数据表，单个事务内提交
pub struct DatabaseLoader {
    pool: SqlitePool,
}

impl DatabaseLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Loader for DatabaseLoader {
    fn name(&self) -> &str {
        "database"
    }

    async fn load(
        &self,
        records: &[Record],
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult> {
        let started = Instant::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarvestError::execution("load", format!("开启事务失败: {e}")))?;
        for record in records {
            sqlx::query(
                "INSERT INTO harvested_records (scraper_id, data_type, payload) VALUES ($1, $2, $3)",
            )
            .bind(&request.scraper_id)
            .bind(&request.data_type)
            .bind(serde_json::to_string(record)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| HarvestError::execution("load", format!("写入采集数据失败: {e}")))?;
        }

        // 事务未提交前被取消则整体回滚
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled("数据库加载被中断".to_string()));
        }
        tx.commit()
            .await
            .map_err(|e| HarvestError::execution("load", format!("提交事务失败: {e}")))?;

        Ok(LoadResult {
            records_written: records.len() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
            destination: DestinationKind::Database,
            location: Some(format!("table:{RECORDS_TABLE}")),
        })
    }
}
