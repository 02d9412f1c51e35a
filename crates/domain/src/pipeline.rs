use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use harvest_errors::HarvestError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobId, JobMetrics};

/// 一条原始或转换后的记录
pub type Record = serde_json::Map<String, serde_json::Value>;

/// 流水线阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Extract,
    Transform,
    Load,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Extract => "extract",
            PipelineStage::Transform => "transform",
            PipelineStage::Load => "load",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 抽取来源类型，在配置加载时解析一次
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    #[serde(alias = "mock")]
    Simulated,
    #[serde(alias = "db")]
    Database,
    File,
    #[serde(alias = "api")]
    Http,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Simulated => "simulated",
            SourceKind::Database => "database",
            SourceKind::File => "file",
            SourceKind::Http => "http",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" | "mock" => Ok(SourceKind::Simulated),
            "database" | "db" => Ok(SourceKind::Database),
            "file" => Ok(SourceKind::File),
            "http" | "api" => Ok(SourceKind::Http),
            other => Err(HarvestError::invalid_field(
                "source",
                format!("不支持的数据源类型: {other}"),
            )),
        }
    }
}

/// 加载目标类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    #[serde(alias = "db")]
    Database,
    File,
    #[serde(alias = "http")]
    Api,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Database => "database",
            DestinationKind::File => "file",
            DestinationKind::Api => "api",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(DestinationKind::Database),
            "file" => Ok(DestinationKind::File),
            "api" | "http" => Ok(DestinationKind::Api),
            other => Err(HarvestError::invalid_field(
                "destination",
                format!("不支持的目标类型: {other}"),
            )),
        }
    }
}

/// 字段类型转换目标
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "timestamp")]
    DateTime,
}

/// 显式转换规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformRule {
    Rename { from: String, to: String },
    Convert { field: String, to: FieldType },
    Require { field: String },
    Drop { field: String },
    Default { field: String, value: serde_json::Value },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractConfig {
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformConfig {
    #[serde(default)]
    pub field_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub type_conversions: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub rules: Vec<TransformRule>,
    /// 去除首尾空白并删除空值
    #[serde(default = "default_true")]
    pub clean: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            field_mappings: BTreeMap::new(),
            type_conversions: BTreeMap::new(),
            rules: Vec::new(),
            clean: true,
            required_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadConfig {
    #[serde(default)]
    pub destination: DestinationKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

/// 单个作业的抽取、转换、加载配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub load: LoadConfig,
}

/// 加载结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadResult {
    pub records_written: u64,
    pub duration_ms: u64,
    pub destination: DestinationKind,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub success: bool,
    pub records: Option<u64>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::Completed => "COMPLETED",
            PipelineStatus::Failed => "FAILED",
            PipelineStatus::Cancelled => "CANCELLED",
        }
    }
}

/// 单个作业的流水线运行记录
///
/// 由执行器在作业开始时创建、结束时定稿，定稿后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub job_id: Option<JobId>,
    pub scraper_id: String,
    pub data_type: String,
    pub pipeline_version: String,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_extracted: Option<u64>,
    pub records_transformed: Option<u64>,
    pub load_result: Option<LoadResult>,
    pub stages: Vec<StageReport>,
    pub failed_stage: Option<PipelineStage>,
    pub error: Option<String>,
    pub total_duration_ms: Option<u64>,
}

impl PipelineRun {
    pub fn new<S: Into<String>, D: Into<String>, V: Into<String>>(
        job_id: Option<JobId>,
        scraper_id: S,
        data_type: D,
        pipeline_version: V,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            scraper_id: scraper_id.into(),
            data_type: data_type.into(),
            pipeline_version: pipeline_version.into(),
            status: PipelineStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            records_extracted: None,
            records_transformed: None,
            load_result: None,
            stages: Vec::new(),
            failed_stage: None,
            error: None,
            total_duration_ms: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn record_stage(&mut self, report: StageReport) {
        if !report.success {
            self.failed_stage = Some(report.stage);
            self.error = report.error.clone();
        }
        self.stages.push(report);
    }

    /// 定稿，之后的修改请求会被忽略
    pub fn finalize(&mut self, status: PipelineStatus) {
        if self.is_finalized() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.total_duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    pub fn stage_duration_ms(&self, stage: PipelineStage) -> Option<u64> {
        self.stages
            .iter()
            .find(|report| report.stage == stage)
            .map(|report| report.duration_ms)
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    pub fn to_job_metrics(&self) -> JobMetrics {
        JobMetrics {
            records_extracted: self.records_extracted,
            records_transformed: self.records_transformed,
            records_loaded: self.load_result.as_ref().map(|r| r.records_written),
            duration_ms: self.total_duration_ms,
        }
    }
}
