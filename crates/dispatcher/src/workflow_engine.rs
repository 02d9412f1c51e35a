//! 工作流引擎
//!
//! 按声明顺序执行步骤，抽取步骤的输出记录流入后续的转换与加载步骤。
//! 第一个失败的步骤结束本次执行，已完成步骤的结果保留在执行记录中。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_config::WorkflowEngineConfig;
use harvest_domain::{
    EngineEvent, EventBus, ExecutionTrigger, ExtractRequest, LoadRequest, PersistenceSink, Record,
    Schedule, StepKind, StepResult, WorkflowDefinition, WorkflowExecution, WorkflowId,
    WorkflowSpec, WorkflowStatus, WorkflowStep,
};
use harvest_errors::{FieldError, HarvestError, HarvestResult};
use harvest_observability::MetricsCollector;
use harvest_pipeline::PipelineExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cron_utils::{next_run_at, CronScheduler};
use crate::retry::RetryPolicy;

/// 自定义步骤的输入
#[derive(Debug, Clone)]
pub struct StepInput {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub step_name: String,
    pub config: Value,
    pub params: Value,
    /// 前序步骤产出的记录
    pub records: Vec<Record>,
}

/// 自定义步骤的输出
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// 替换流经后续步骤的记录，`None` 表示保持不变
    pub records: Option<Vec<Record>>,
    pub output: Value,
}

/// 自定义步骤处理器，按名称注册
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, input: StepInput, cancel: &CancellationToken)
        -> HarvestResult<StepOutput>;
}

/// 工作流状态查询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub definition: WorkflowDefinition,
    pub running: bool,
    pub executions_total: usize,
    pub last_execution: Option<WorkflowExecution>,
}

/// 一次执行中流经各步骤的数据
#[derive(Default)]
struct StepContext {
    records: Vec<Record>,
}

struct StepSuccess {
    records: Option<u64>,
    output: Value,
}

pub struct WorkflowEngine {
    workflows: RwLock<HashMap<WorkflowId, WorkflowDefinition>>,
    executions: RwLock<VecDeque<WorkflowExecution>>,
    running: Mutex<HashMap<Uuid, (WorkflowId, CancellationToken)>>,
    /// 每次执行的令牌都派生自它，关闭后新的执行立即被拒绝
    stopping: CancellationToken,
    handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
    executor: Arc<PipelineExecutor>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    retry: RetryPolicy,
    config: WorkflowEngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowEngineConfig,
        executor: Arc<PipelineExecutor>,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
    ) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(VecDeque::new()),
            running: Mutex::new(HashMap::new()),
            stopping: CancellationToken::new(),
            handlers: RwLock::new(HashMap::new()),
            executor,
            persistence: None,
            metrics,
            events,
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &WorkflowEngineConfig {
        &self.config
    }

    pub async fn register_handler<S: Into<String>>(&self, name: S, handler: Arc<dyn StepHandler>) {
        let name = name.into();
        debug!(handler = %name, "注册自定义步骤处理器");
        self.handlers.write().await.insert(name, handler);
    }

    /// 字段校验之外再检查CRON表达式，问题合并到同一个校验错误中
    fn build_definition(&self, spec: &WorkflowSpec) -> HarvestResult<WorkflowDefinition> {
        let mut errors = spec.validate();
        let cron = spec
            .schedule
            .as_deref()
            .and_then(|raw| raw.parse::<Schedule>().ok())
            .and_then(|schedule| schedule.as_cron().map(str::to_string));
        if let Some(expr) = cron {
            if let Err(e) = CronScheduler::validate_cron_expression(&expr) {
                let at = errors.iter().take_while(|f| f.field == "name").count();
                errors.insert(at, FieldError::new("schedule", e.to_string()));
            }
        }
        if !errors.is_empty() {
            return Err(HarvestError::validation(errors));
        }
        WorkflowDefinition::from_spec(spec, self.config.default_max_retries)
    }

    /// 校验并注册工作流，所有字段问题一次性返回
    pub async fn create_workflow(&self, spec: &WorkflowSpec) -> HarvestResult<WorkflowId> {
        let definition = self.build_definition(spec)?;
        let id = definition.id;
        info!(
            workflow_id = %id,
            name = %definition.name,
            steps = definition.steps.len(),
            schedule = %definition.schedule,
            "工作流已创建"
        );

        let mut workflows = self.workflows.write().await;
        workflows.insert(id, definition);
        self.metrics.update_workflows_registered(workflows.len());
        Ok(id)
    }

    /// 整体替换步骤与调度，版本号递增
    pub async fn update_workflow(
        &self,
        workflow_id: WorkflowId,
        spec: &WorkflowSpec,
    ) -> HarvestResult<WorkflowDefinition> {
        let next = self.build_definition(spec)?;
        let mut workflows = self.workflows.write().await;
        let current = workflows
            .get(&workflow_id)
            .ok_or_else(|| HarvestError::workflow_not_found(workflow_id))?;
        if !current.is_active() {
            return Err(HarvestError::InvalidState(format!(
                "工作流 {workflow_id} 已取消，不能更新"
            )));
        }

        let replaced = current.replaced_by(next);
        info!(workflow_id = %workflow_id, version = replaced.version, "工作流已更新");
        workflows.insert(workflow_id, replaced.clone());
        Ok(replaced)
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> HarvestResult<WorkflowDefinition> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| HarvestError::workflow_not_found(workflow_id))
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        workflows
    }

    pub async fn get_workflow_status(
        &self,
        workflow_id: WorkflowId,
    ) -> HarvestResult<WorkflowStatusReport> {
        let definition = self.get_workflow(workflow_id).await?;
        let running = self
            .running
            .lock()
            .await
            .values()
            .any(|(id, _)| *id == workflow_id);
        let executions = self.executions.read().await;
        let mut history = executions.iter().filter(|e| e.workflow_id == workflow_id);
        let executions_total = history.clone().count();
        let last_execution = history.next_back().cloned();

        Ok(WorkflowStatusReport {
            definition,
            running,
            executions_total,
            last_execution,
        })
    }

    /// 按时间顺序返回保留的执行记录
    pub async fn executions(&self, workflow_id: WorkflowId) -> Vec<WorkflowExecution> {
        self.executions
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        params: Value,
    ) -> HarvestResult<WorkflowExecution> {
        self.execute_with_trigger(workflow_id, params, ExecutionTrigger::Manual)
            .await
    }

    /// 计算下一次运行时间
    ///
    /// 传入调度描述时替换工作流原有调度；已取消的工作流返回 `false`。
    pub async fn schedule_workflow(
        &self,
        workflow_id: WorkflowId,
        schedule: Option<&str>,
        params: Value,
    ) -> HarvestResult<bool> {
        let schedule = schedule.map(str::parse::<Schedule>).transpose()?;
        let mut workflows = self.workflows.write().await;
        let definition = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| HarvestError::workflow_not_found(workflow_id))?;
        if !definition.is_active() {
            warn!(workflow_id = %workflow_id, "工作流已取消，忽略调度请求");
            return Ok(false);
        }

        let schedule = schedule.unwrap_or_else(|| definition.schedule.clone());
        let next = next_run_at(&schedule, Utc::now())?;
        definition.schedule = schedule;
        definition.next_run_at = Some(next);
        definition.schedule_params = params;
        definition.updated_at = Utc::now();

        info!(
            workflow_id = %workflow_id,
            schedule = %definition.schedule,
            next_run_at = %next,
            "工作流已调度"
        );
        Ok(true)
    }

    /// 取消工作流并中断其正在进行的执行
    pub async fn cancel_workflow(&self, workflow_id: WorkflowId) -> HarvestResult<bool> {
        {
            let mut workflows = self.workflows.write().await;
            let definition = workflows
                .get_mut(&workflow_id)
                .ok_or_else(|| HarvestError::workflow_not_found(workflow_id))?;
            if !definition.is_active() {
                return Ok(false);
            }
            definition.status = WorkflowStatus::Cancelled;
            definition.next_run_at = None;
            definition.updated_at = Utc::now();
        }

        let running = self.running.lock().await;
        let mut interrupted = 0;
        for (id, token) in running.values() {
            if *id == workflow_id {
                token.cancel();
                interrupted += 1;
            }
        }
        info!(workflow_id = %workflow_id, interrupted, "工作流已取消");
        Ok(true)
    }

    /// 关闭引擎：中断所有正在运行的执行并拒绝新的执行，返回被中断的数量
    pub async fn cancel_running(&self) -> usize {
        let running = self.running.lock().await;
        self.stopping.cancel();
        if !running.is_empty() {
            info!(interrupted = running.len(), "已中断运行中的工作流执行");
        }
        running.len()
    }

    /// 执行所有已到期的活跃工作流
    ///
    /// 周期性调度在执行前推进到下一次运行时间，immediate 调度执行后清除。
    pub async fn run_due_workflows(&self, now: DateTime<Utc>) -> Vec<WorkflowExecution> {
        if self.stopping.is_cancelled() {
            return Vec::new();
        }
        let due: Vec<(WorkflowId, Value)> = {
            let mut workflows = self.workflows.write().await;
            let mut due = Vec::new();
            for definition in workflows.values_mut() {
                let is_due = definition.is_active()
                    && definition.next_run_at.is_some_and(|next| next <= now);
                if !is_due {
                    continue;
                }
                definition.next_run_at = if definition.schedule.is_recurring() {
                    match next_run_at(&definition.schedule, now) {
                        Ok(next) => Some(next),
                        Err(e) => {
                            error!(workflow_id = %definition.id, error = %e, "计算下一次运行时间失败");
                            None
                        }
                    }
                } else {
                    None
                };
                due.push((definition.id, definition.schedule_params.clone()));
            }
            due
        };

        let mut executions = Vec::with_capacity(due.len());
        for (workflow_id, params) in due {
            match self
                .execute_with_trigger(workflow_id, params, ExecutionTrigger::Scheduled)
                .await
            {
                Ok(execution) => executions.push(execution),
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "调度执行失败"),
            }
        }
        executions
    }

    async fn execute_with_trigger(
        &self,
        workflow_id: WorkflowId,
        params: Value,
        trigger: ExecutionTrigger,
    ) -> HarvestResult<WorkflowExecution> {
        if self.stopping.is_cancelled() {
            return Err(HarvestError::InvalidState("工作流引擎已关闭".to_string()));
        }
        let cancel = self.stopping.child_token();
        // 状态检查与登记在同一把读锁内完成，取消操作不会错过本次执行
        let (definition, mut execution) = {
            let workflows = self.workflows.read().await;
            let definition = workflows
                .get(&workflow_id)
                .cloned()
                .ok_or_else(|| HarvestError::workflow_not_found(workflow_id))?;
            if !definition.is_active() {
                return Err(HarvestError::InvalidState(format!(
                    "工作流 {workflow_id} 已取消"
                )));
            }
            let execution = WorkflowExecution::start(&definition, trigger, params);
            self.running
                .lock()
                .await
                .insert(execution.id, (workflow_id, cancel.clone()));
            (definition, execution)
        };
        info!(
            workflow_id = %workflow_id,
            execution_id = %execution.id,
            trigger = ?trigger,
            steps = definition.steps.len(),
            "开始执行工作流"
        );

        let mut context = StepContext::default();
        let mut failure = None;
        for step in &definition.steps {
            let result = self
                .run_step(&definition, step, &execution.params, &mut context, &cancel)
                .await;
            let success = result.success;
            let error = result.error.clone();
            execution.step_results.push(result);
            if !success {
                failure = Some(format!(
                    "步骤 {} 失败: {}",
                    step.name,
                    error.unwrap_or_default()
                ));
                break;
            }
        }

        self.running.lock().await.remove(&execution.id);
        let success = failure.is_none();
        execution.finish(success, failure);
        self.record_execution(&definition, &execution).await;
        Ok(execution)
    }

    async fn record_execution(&self, definition: &WorkflowDefinition, execution: &WorkflowExecution) {
        let steps_completed = execution.step_results.iter().filter(|r| r.success).count();
        if execution.success {
            info!(
                workflow_id = %definition.id,
                execution_id = %execution.id,
                duration_ms = execution.duration_ms,
                "工作流执行成功"
            );
        } else {
            warn!(
                workflow_id = %definition.id,
                execution_id = %execution.id,
                steps_completed,
                error = ?execution.error,
                "工作流执行失败"
            );
        }

        self.metrics
            .record_workflow_execution(execution.success, execution.duration_ms);
        self.events.publish(EngineEvent::WorkflowFinished {
            workflow_id: definition.id,
            execution_id: execution.id,
            success: execution.success,
            steps_completed,
            occurred_at: Utc::now(),
        });

        {
            let mut executions = self.executions.write().await;
            executions.push_back(execution.clone());
            while executions.len() > self.config.execution_history_limit {
                executions.pop_front();
            }
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_workflow_execution(execution).await {
                self.metrics.record_persistence_failure("save_workflow_execution");
                warn!(execution_id = %execution.id, error = %e, "保存工作流执行记录失败");
            }
        }
    }

    /// 带重试执行单个步骤
    async fn run_step(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        params: &Value,
        context: &mut StepContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started = Instant::now();
        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HarvestError::Cancelled(format!("步骤 {}", step.name))),
                result = tokio::time::timeout(
                    self.config.step_timeout(),
                    self.dispatch_step(definition, step, params, context, cancel),
                ) => result.unwrap_or_else(|_| {
                    Err(HarvestError::Timeout(format!(
                        "步骤 {} 超过 {} 秒",
                        step.name, self.config.step_timeout_seconds
                    )))
                }),
            };

            let err = match attempt {
                Ok(success) => {
                    debug!(workflow_id = %definition.id, step = %step.name, attempts, "步骤完成");
                    return StepResult {
                        step_name: step.name.clone(),
                        step_type: step.kind.step_type(),
                        success: true,
                        records: success.records,
                        output: success.output,
                        error: None,
                        attempts,
                        retry_count: attempts - 1,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(err) => err,
            };

            let retry = attempts - 1;
            if !err.is_retryable() || retry >= definition.max_retries {
                break err;
            }

            let delay = self.retry.delay_for(retry);
            warn!(
                workflow_id = %definition.id,
                step = %step.name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "步骤失败，等待后重试"
            );
            self.metrics
                .record_step_retry(&definition.name, &step.name, attempts);
            if !sleep_or_cancel(delay, cancel).await {
                break HarvestError::Cancelled(format!("步骤 {} 在重试等待中被取消", step.name));
            }
        };

        error!(
            workflow_id = %definition.id,
            step = %step.name,
            attempts,
            error = %last_error,
            "步骤失败"
        );
        StepResult {
            step_name: step.name.clone(),
            step_type: step.kind.step_type(),
            success: false,
            records: None,
            output: Value::Null,
            error: Some(last_error.to_string()),
            attempts,
            retry_count: attempts - 1,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn dispatch_step(
        &self,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
        params: &Value,
        context: &mut StepContext,
        cancel: &CancellationToken,
    ) -> HarvestResult<StepSuccess> {
        let data_type = params
            .get("data_type")
            .and_then(Value::as_str)
            .unwrap_or("generic")
            .to_string();

        match &step.kind {
            StepKind::Extract(config) => {
                let request = ExtractRequest {
                    scraper_id: definition.name.clone(),
                    data_type,
                    source_url: params
                        .get("source_url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    config: config.clone(),
                    params: params.clone(),
                };
                let records = self.executor.run_extract(&request, cancel).await?;
                let count = records.len() as u64;
                context.records = records;
                Ok(StepSuccess {
                    records: Some(count),
                    output: json!({ "source": config.source, "records": count }),
                })
            }
            StepKind::Transform(config) => {
                let outcome = self
                    .executor
                    .run_transform(context.records.clone(), config, &definition.name, cancel)
                    .await?;
                let count = outcome.records.len() as u64;
                context.records = outcome.records;
                Ok(StepSuccess {
                    records: Some(count),
                    output: json!({ "records": count, "dropped": outcome.dropped }),
                })
            }
            StepKind::Load(config) => {
                let request = LoadRequest {
                    scraper_id: definition.name.clone(),
                    data_type,
                    config: config.clone(),
                };
                let result = self
                    .executor
                    .run_load(&context.records, &request, cancel)
                    .await?;
                Ok(StepSuccess {
                    records: Some(result.records_written),
                    output: serde_json::to_value(&result)?,
                })
            }
            StepKind::Custom { handler, config } => {
                let handler_impl = self
                    .handlers
                    .read()
                    .await
                    .get(handler)
                    .cloned()
                    .ok_or_else(|| HarvestError::strategy_not_found(format!("handler:{handler}")))?;
                let input = StepInput {
                    workflow_id: definition.id,
                    workflow_name: definition.name.clone(),
                    step_name: step.name.clone(),
                    config: config.clone(),
                    params: params.clone(),
                    records: context.records.clone(),
                };
                let output = handler_impl.handle(input, cancel).await?;
                let records = output.records.as_ref().map(|r| r.len() as u64);
                if let Some(replaced) = output.records {
                    context.records = replaced;
                }
                Ok(StepSuccess {
                    records,
                    output: output.output,
                })
            }
        }
    }
}

/// 等待重试间隔，期间被取消时返回 `false`
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
