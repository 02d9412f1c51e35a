//! 流水线执行器
//!
//! 单个作业内三个阶段严格串行：抽取 → 转换 → 加载。任一阶段失败即中止后续阶段，
//! 运行记录以失败状态定稿，已完成阶段的计数保留。已写入的数据不做回滚。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use harvest_config::PipelineExecutorConfig;
use harvest_domain::{
    EngineEvent, EventBus, ExtractRequest, JobId, LoadRequest, LoadResult, PersistenceSink,
    PipelineConfig, PipelineRun, PipelineStage, PipelineStatus, Record, ScraperDescriptor,
    StageReport, TransformConfig,
};
use harvest_errors::{FieldError, HarvestError, HarvestResult};
use harvest_observability::MetricsCollector;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::JobControl;
use crate::registry::StrategyRegistry;
use crate::transform::{TransformOutcome, Transformer};

/// 一次流水线运行的输入
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub job_id: Option<JobId>,
    pub scraper_id: String,
    pub data_type: String,
    pub source_url: Option<String>,
    pub config: PipelineConfig,
    pub params: Value,
}

impl PipelineRequest {
    pub fn new<S: Into<String>, D: Into<String>>(
        scraper_id: S,
        data_type: D,
        config: PipelineConfig,
    ) -> Self {
        Self {
            job_id: None,
            scraper_id: scraper_id.into(),
            data_type: data_type.into(),
            source_url: None,
            config,
            params: Value::Null,
        }
    }

    pub fn for_scraper(job_id: JobId, scraper: &ScraperDescriptor) -> Self {
        Self {
            job_id: Some(job_id),
            scraper_id: scraper.id.clone(),
            data_type: scraper.data_type.clone(),
            source_url: Some(scraper.source_url.clone()),
            config: scraper.pipeline.clone(),
            params: Value::Null,
        }
    }

    fn validate(&self) -> HarvestResult<()> {
        let mut errors = Vec::new();
        if self.scraper_id.trim().is_empty() {
            errors.push(FieldError::missing("scraper_id"));
        }
        if self.data_type.trim().is_empty() {
            errors.push(FieldError::missing("data_type"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::validation(errors))
        }
    }
}

pub struct PipelineExecutor {
    registry: Arc<StrategyRegistry>,
    transformer: Transformer,
    config: PipelineExecutorConfig,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    persistence: Option<Arc<dyn PersistenceSink>>,
}

impl PipelineExecutor {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        config: PipelineExecutorConfig,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            transformer: Transformer::new(config.pipeline_version.clone()),
            config,
            metrics,
            events,
            persistence: None,
        }
    }

    /// 定稿后的运行记录交给持久化协作者，写入失败只记录日志
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineExecutorConfig {
        &self.config
    }

    /// 不受作业控制的独立运行
    ///
    /// 只有输入无效或策略未注册时返回错误，阶段失败体现在返回的运行记录中。
    pub async fn execute_pipeline(
        &self,
        scraper_id: &str,
        data_type: &str,
        config: &PipelineConfig,
    ) -> HarvestResult<PipelineRun> {
        let request = PipelineRequest::new(scraper_id, data_type, config.clone());
        self.execute(request, &JobControl::new()).await
    }

    pub async fn execute(
        &self,
        request: PipelineRequest,
        control: &JobControl,
    ) -> HarvestResult<PipelineRun> {
        request.validate()?;
        let extractor = self
            .registry
            .resolve_extractor(&request.data_type, request.config.extract.source)
            .await?;
        let loader = self
            .registry
            .resolve_loader(request.config.load.destination)
            .await?;

        let mut run = PipelineRun::new(
            request.job_id,
            request.scraper_id.clone(),
            request.data_type.clone(),
            self.transformer.pipeline_version(),
        );
        info!(
            run_id = %run.id,
            job_id = ?request.job_id,
            scraper_id = %request.scraper_id,
            extractor = extractor.name(),
            loader = loader.name(),
            "开始执行流水线"
        );

        // 抽取
        let extract_request = ExtractRequest {
            scraper_id: request.scraper_id.clone(),
            data_type: request.data_type.clone(),
            source_url: request.source_url.clone(),
            config: request.config.extract.clone(),
            params: request.params.clone(),
        };
        if let Err(e) = control.checkpoint().await {
            return Ok(self.abort(run, PipelineStage::Extract, 0, e).await);
        }
        let (result, duration_ms) = timed(
            PipelineStage::Extract,
            self.config.extract_timeout(),
            control.token(),
            extractor.extract(&extract_request, control.token()),
        )
        .await;
        let raw = match result {
            Ok(records) => {
                run.records_extracted = Some(records.len() as u64);
                self.complete_stage(&mut run, PipelineStage::Extract, duration_ms, records.len() as u64);
                records
            }
            Err(e) => return Ok(self.abort(run, PipelineStage::Extract, duration_ms, e).await),
        };

        // 转换
        if let Err(e) = control.checkpoint().await {
            return Ok(self.abort(run, PipelineStage::Transform, 0, e).await);
        }
        let (result, duration_ms) = timed(
            PipelineStage::Transform,
            self.config.transform_timeout(),
            control.token(),
            self.transform_blocking(raw, request.config.transform.clone(), request.scraper_id.clone()),
        )
        .await;
        let transformed = match result {
            Ok(outcome) => {
                if outcome.dropped > 0 {
                    warn!(run_id = %run.id, dropped = outcome.dropped, "转换阶段丢弃了缺少必填字段的记录");
                }
                run.records_transformed = Some(outcome.records.len() as u64);
                self.complete_stage(
                    &mut run,
                    PipelineStage::Transform,
                    duration_ms,
                    outcome.records.len() as u64,
                );
                outcome.records
            }
            Err(e) => return Ok(self.abort(run, PipelineStage::Transform, duration_ms, e).await),
        };

        // 加载
        if let Err(e) = control.checkpoint().await {
            return Ok(self.abort(run, PipelineStage::Load, 0, e).await);
        }
        let load_request = LoadRequest {
            scraper_id: request.scraper_id.clone(),
            data_type: request.data_type.clone(),
            config: request.config.load.clone(),
        };
        let (result, duration_ms) = timed(
            PipelineStage::Load,
            self.config.load_timeout(),
            control.token(),
            loader.load(&transformed, &load_request, control.token()),
        )
        .await;
        match result {
            Ok(load_result) => {
                let written = load_result.records_written;
                run.load_result = Some(load_result);
                self.complete_stage(&mut run, PipelineStage::Load, duration_ms, written);
            }
            Err(e) => return Ok(self.abort(run, PipelineStage::Load, duration_ms, e).await),
        }

        let status = match control.checkpoint().await {
            Ok(()) => PipelineStatus::Completed,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "流水线在定稿前被停止");
                run.error = Some(e.to_string());
                PipelineStatus::Cancelled
            }
        };
        Ok(self.finish(run, status).await)
    }

    /// 带超时的单独抽取，供工作流步骤使用
    pub async fn run_extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<Vec<Record>> {
        let extractor = self
            .registry
            .resolve_extractor(&request.data_type, request.config.source)
            .await?;
        let (result, duration_ms) = timed(
            PipelineStage::Extract,
            self.config.extract_timeout(),
            cancel,
            extractor.extract(request, cancel),
        )
        .await;
        let records = result?;
        self.metrics
            .record_stage(PipelineStage::Extract, duration_ms, Some(records.len() as u64));
        Ok(records)
    }

    pub async fn run_transform(
        &self,
        records: Vec<Record>,
        config: &TransformConfig,
        source: &str,
        cancel: &CancellationToken,
    ) -> HarvestResult<TransformOutcome> {
        let (result, duration_ms) = timed(
            PipelineStage::Transform,
            self.config.transform_timeout(),
            cancel,
            self.transform_blocking(records, config.clone(), source.to_string()),
        )
        .await;
        let outcome = result?;
        self.metrics.record_stage(
            PipelineStage::Transform,
            duration_ms,
            Some(outcome.records.len() as u64),
        );
        Ok(outcome)
    }

    pub async fn run_load(
        &self,
        records: &[Record],
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> HarvestResult<LoadResult> {
        let loader = self
            .registry
            .resolve_loader(request.config.destination)
            .await?;
        let (result, duration_ms) = timed(
            PipelineStage::Load,
            self.config.load_timeout(),
            cancel,
            loader.load(records, request, cancel),
        )
        .await;
        let load_result = result?;
        self.metrics.record_stage(
            PipelineStage::Load,
            duration_ms,
            Some(load_result.records_written),
        );
        Ok(load_result)
    }

    async fn transform_blocking(
        &self,
        records: Vec<Record>,
        config: TransformConfig,
        source: String,
    ) -> HarvestResult<TransformOutcome> {
        let transformer = self.transformer.clone();
        tokio::task::spawn_blocking(move || transformer.transform(records, &config, &source))
            .await
            .map_err(|e| HarvestError::Internal(format!("转换任务异常退出: {e}")))
    }

    fn complete_stage(
        &self,
        run: &mut PipelineRun,
        stage: PipelineStage,
        duration_ms: u64,
        records: u64,
    ) {
        debug!(run_id = %run.id, stage = %stage, duration_ms, records, "阶段完成");
        self.metrics.record_stage(stage, duration_ms, Some(records));
        run.record_stage(StageReport {
            stage,
            success: true,
            records: Some(records),
            duration_ms,
            error: None,
        });
    }

    async fn abort(
        &self,
        mut run: PipelineRun,
        stage: PipelineStage,
        duration_ms: u64,
        err: HarvestError,
    ) -> PipelineRun {
        let status = match err {
            HarvestError::Cancelled(_) => PipelineStatus::Cancelled,
            _ => PipelineStatus::Failed,
        };
        error!(
            run_id = %run.id,
            scraper_id = %run.scraper_id,
            stage = %stage,
            error = %err,
            "流水线阶段失败，中止后续阶段"
        );
        self.metrics.record_stage(stage, duration_ms, None);
        run.record_stage(StageReport {
            stage,
            success: false,
            records: None,
            duration_ms,
            error: Some(err.to_string()),
        });
        self.finish(run, status).await
    }

    async fn finish(&self, mut run: PipelineRun, status: PipelineStatus) -> PipelineRun {
        run.finalize(status);
        let total_duration_ms = run.total_duration_ms.unwrap_or_default();
        self.metrics
            .record_pipeline_finished(run.status, total_duration_ms);
        self.events.publish(EngineEvent::PipelineFinished {
            job_id: run.job_id,
            run_id: run.id,
            status: run.status,
            total_duration_ms,
            occurred_at: Utc::now(),
        });

        info!(
            run_id = %run.id,
            scraper_id = %run.scraper_id,
            status = run.status.as_str(),
            extracted = ?run.records_extracted,
            transformed = ?run.records_transformed,
            loaded = ?run.load_result.as_ref().map(|r| r.records_written),
            total_duration_ms,
            "流水线执行结束"
        );

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_pipeline_run(&run).await {
                self.metrics.record_persistence_failure("save_pipeline_run");
                warn!(run_id = %run.id, error = %e, "保存流水线运行记录失败");
            }
        }
        run
    }
}

/// 计时执行一个阶段，受取消令牌与超时约束
async fn timed<T, F>(
    stage: PipelineStage,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> (HarvestResult<T>, u64)
where
    F: Future<Output = HarvestResult<T>>,
{
    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HarvestError::Cancelled(format!("{stage} 阶段被中断"))),
        outcome = tokio::time::timeout(limit, fut) => outcome.unwrap_or_else(|_| {
            Err(HarvestError::Timeout(format!(
                "{stage} 阶段超过 {} 秒未完成",
                limit.as_secs()
            )))
        }),
    };
    (result, started.elapsed().as_millis() as u64)
}
