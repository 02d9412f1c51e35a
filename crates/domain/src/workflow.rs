use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use harvest_errors::{FieldError, HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{
    DestinationKind, ExtractConfig, LoadConfig, SourceKind, TransformConfig,
};

pub type WorkflowId = Uuid;

/// 单个步骤允许的最大重试次数
pub const MAX_WORKFLOW_RETRIES: u32 = 100;

/// 调度描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    Immediate,
    Daily,
    Weekly,
    Monthly,
    /// CRON表达式（秒 分 时 日 月 周 [年]）
    Cron(String),
}

impl Schedule {
    /// 固定时间偏移；monthly 按30天计算，不考虑自然月长度
    pub fn fixed_offset(&self) -> Option<Duration> {
        match self {
            Schedule::Immediate => Some(Duration::zero()),
            Schedule::Daily => Some(Duration::days(1)),
            Schedule::Weekly => Some(Duration::weeks(1)),
            Schedule::Monthly => Some(Duration::days(30)),
            Schedule::Cron(_) => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::Immediate)
    }

    pub fn as_cron(&self) -> Option<&str> {
        match self {
            Schedule::Cron(expr) => Some(expr),
            _ => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Immediate => f.write_str("immediate"),
            Schedule::Daily => f.write_str("daily"),
            Schedule::Weekly => f.write_str("weekly"),
            Schedule::Monthly => f.write_str("monthly"),
            Schedule::Cron(expr) => f.write_str(expr),
        }
    }
}

impl FromStr for Schedule {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "immediate" | "now" | "once" => Ok(Schedule::Immediate),
            "daily" => Ok(Schedule::Daily),
            "weekly" => Ok(Schedule::Weekly),
            "monthly" => Ok(Schedule::Monthly),
            _ if trimmed.split_whitespace().count() >= 5 => {
                Ok(Schedule::Cron(trimmed.to_string()))
            }
            _ => Err(HarvestError::invalid_field(
                "schedule",
                format!("无法识别的调度描述: {s}"),
            )),
        }
    }
}

impl TryFrom<String> for Schedule {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Extract,
    Transform,
    Load,
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Extract => "extract",
            StepType::Transform => "transform",
            StepType::Load => "load",
            StepType::Custom => "custom",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extract" => Ok(StepType::Extract),
            "transform" => Ok(StepType::Transform),
            "load" => Ok(StepType::Load),
            "custom" => Ok(StepType::Custom),
            other => Err(HarvestError::invalid_field(
                "type",
                format!("未知的步骤类型: {other}"),
            )),
        }
    }
}

/// 操作员提交的步骤配置（未校验）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(rename = "type")]
    pub step_type: Option<String>,
    pub name: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub handler: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// 操作员提交的工作流配置（未校验）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<StepSpec>>,
    pub schedule: Option<String>,
    pub max_retries: Option<u32>,
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

impl WorkflowSpec {
    /// 累积所有字段问题，不在第一个错误处返回
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if blank(&self.name) {
            errors.push(FieldError::missing("name"));
        }
        match &self.schedule {
            None => errors.push(FieldError::missing("schedule")),
            Some(schedule) => {
                if let Err(e) = schedule.parse::<Schedule>() {
                    errors.push(FieldError::new("schedule", e.to_string()));
                }
            }
        }

        match &self.steps {
            None => errors.push(FieldError::missing("steps")),
            Some(steps) if steps.is_empty() => {
                errors.push(FieldError::new("steps", "至少需要一个步骤"))
            }
            Some(steps) => {
                for (index, step) in steps.iter().enumerate() {
                    errors.extend(step.validate(index));
                }
            }
        }
        if self.max_retries.is_some_and(|n| n > MAX_WORKFLOW_RETRIES) {
            errors.push(FieldError::new(
                "max_retries",
                format!("不能超过{MAX_WORKFLOW_RETRIES}"),
            ));
        }

        errors
    }
}

impl StepSpec {
    pub fn validate(&self, index: usize) -> Vec<FieldError> {
        let field = |name: &str| format!("steps[{index}].{name}");
        let mut errors = Vec::new();

        if blank(&self.name) {
            errors.push(FieldError::missing(field("name")));
        }

        let step_type = match &self.step_type {
            None => {
                errors.push(FieldError::missing(field("type")));
                None
            }
            Some(raw) => match raw.parse::<StepType>() {
                Ok(step_type) => Some(step_type),
                Err(_) => {
                    errors.push(FieldError::new(
                        field("type"),
                        format!("未知的步骤类型: {raw}"),
                    ));
                    None
                }
            },
        };

        match step_type {
            Some(StepType::Extract) => match &self.source {
                Some(source) if !source.trim().is_empty() => {
                    if let Err(e) = source.parse::<SourceKind>() {
                        errors.push(FieldError::new(field("source"), e.to_string()));
                    }
                }
                _ => errors.push(FieldError::missing(field("source"))),
            },
            Some(StepType::Load) => match &self.destination {
                Some(destination) if !destination.trim().is_empty() => {
                    if let Err(e) = destination.parse::<DestinationKind>() {
                        errors.push(FieldError::new(field("destination"), e.to_string()));
                    }
                }
                _ => errors.push(FieldError::missing(field("destination"))),
            },
            Some(StepType::Transform) => {
                if !self.config.is_null() {
                    if let Err(e) =
                        serde_json::from_value::<TransformConfig>(self.config.clone())
                    {
                        errors.push(FieldError::new(field("config"), e.to_string()));
                    }
                }
            }
            Some(StepType::Custom) | None => {}
        }

        errors
    }

    fn to_step(&self) -> HarvestResult<WorkflowStep> {
        let name = self.name.clone().unwrap_or_default().trim().to_string();
        let step_type: StepType = self.step_type.as_deref().unwrap_or("").parse()?;
        let kind = match step_type {
            StepType::Extract => StepKind::Extract(ExtractConfig {
                source: self.source.as_deref().unwrap_or("").parse()?,
                options: self.config.clone(),
            }),
            StepType::Transform => StepKind::Transform(if self.config.is_null() {
                TransformConfig::default()
            } else {
                serde_json::from_value(self.config.clone())?
            }),
            StepType::Load => StepKind::Load(LoadConfig {
                destination: self.destination.as_deref().unwrap_or("").parse()?,
                options: self.config.clone(),
            }),
            StepType::Custom => StepKind::Custom {
                handler: self.handler.clone().unwrap_or_else(|| name.clone()),
                config: self.config.clone(),
            },
        };
        Ok(WorkflowStep { name, kind })
    }
}

/// 已解析的步骤类型，执行时不再做字符串分派
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Extract(ExtractConfig),
    Transform(TransformConfig),
    Load(LoadConfig),
    Custom {
        handler: String,
        config: serde_json::Value,
    },
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Extract(_) => StepType::Extract,
            StepKind::Transform(_) => StepType::Transform,
            StepKind::Load(_) => StepType::Load,
            StepKind::Custom { .. } => StepType::Custom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    pub kind: StepKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkflowStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

/// 工作流定义
///
/// 步骤列表不做原地修改，更新通过整体替换并递增版本号完成。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub schedule: Schedule,
    pub max_retries: u32,
    pub version: u32,
    pub status: WorkflowStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub schedule_params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// 从已通过校验的配置构建定义
    pub fn from_spec(spec: &WorkflowSpec, default_max_retries: u32) -> HarvestResult<Self> {
        let errors = spec.validate();
        if !errors.is_empty() {
            return Err(HarvestError::validation(errors));
        }

        let steps = spec
            .steps
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(StepSpec::to_step)
            .collect::<HarvestResult<Vec<_>>>()?;
        let schedule: Schedule = spec.schedule.as_deref().unwrap_or("").parse()?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name.clone().unwrap_or_default().trim().to_string(),
            description: spec.description.clone(),
            steps,
            schedule,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            version: 1,
            status: WorkflowStatus::Active,
            next_run_at: None,
            schedule_params: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        })
    }

    /// 以新配置替换当前定义，保留ID并递增版本
    pub fn replaced_by(&self, mut next: WorkflowDefinition) -> WorkflowDefinition {
        next.id = self.id;
        next.version = self.version + 1;
        next.created_at = self.created_at;
        next.next_run_at = self.next_run_at;
        next.schedule_params = self.schedule_params.clone();
        next
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Manual,
    Scheduled,
}

/// 单个步骤的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub step_type: StepType,
    pub success: bool,
    pub records: Option<u64>,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub attempts: u32,
    pub retry_count: u32,
    pub duration_ms: u64,
}

/// 工作流的一次执行记录，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub trigger: ExecutionTrigger,
    pub params: serde_json::Value,
    pub step_results: Vec<StepResult>,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl WorkflowExecution {
    pub fn start(
        definition: &WorkflowDefinition,
        trigger: ExecutionTrigger,
        params: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id,
            workflow_version: definition.version,
            trigger,
            params,
            step_results: Vec::with_capacity(definition.steps.len()),
            success: false,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
        }
    }

    pub fn finish(&mut self, success: bool, error: Option<String>) {
        let now = Utc::now();
        self.success = success;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }
}
