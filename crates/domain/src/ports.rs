//! 引擎端口抽象
//!
//! 定义引擎依赖的外部协作者接口，遵循依赖倒置原则：
//! - 采集器描述来源
//! - 持久化（只写，不依赖读后写一致性）
//! - 抽取/加载策略
//! - 主机资源采样

use async_trait::async_trait;
use harvest_errors::HarvestResult;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entities::{ScraperDescriptor, ScraperFilter};
use crate::health::{HealthSnapshot, ResourceUsage};
use crate::job::Job;
use crate::pipeline::{ExtractConfig, LoadConfig, LoadResult, PipelineRun, Record};
use crate::workflow::WorkflowExecution;

/// 采集器描述来源
#[async_trait]
pub trait ScraperSource: Send + Sync {
    /// 未知ID返回 `NotFound`
    async fn get_scraper_by_id(&self, id: &str) -> HarvestResult<ScraperDescriptor>;
    async fn list_scrapers(&self, filter: &ScraperFilter) -> HarvestResult<Vec<ScraperDescriptor>>;
}

/// 持久化协作者
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save_job(&self, job: &Job) -> HarvestResult<()>;
    async fn save_pipeline_run(&self, run: &PipelineRun) -> HarvestResult<()>;
    async fn save_workflow_execution(&self, execution: &WorkflowExecution) -> HarvestResult<()>;
    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> HarvestResult<()>;
    /// 可达性探测
    async fn ping(&self) -> HarvestResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub scraper_id: String,
    pub data_type: String,
    pub source_url: Option<String>,
    pub config: ExtractConfig,
    /// 工作流执行参数，作业运行时为空
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub scraper_id: String,
    pub data_type: String,
    pub config: LoadConfig,
}

/// 抽取策略：从某类数据源产出原始记录
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>>;
}

/// 加载策略：把转换后的记录写入某类目标
#[async_trait]
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(
        &self,
        records: &[Record],
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult>;
}

/// 主机资源采样
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> HarvestResult<ResourceUsage>;
}
