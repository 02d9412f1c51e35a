use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 字段级校验问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing<F: Into<String>>(field: F) -> Self {
        Self::new(field, "缺少必填字段")
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// 未找到的实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Scraper,
    Job,
    Workflow,
    Strategy,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Scraper => "采集器",
            EntityKind::Job => "作业",
            EntityKind::Workflow => "工作流",
            EntityKind::Strategy => "策略",
        };
        f.write_str(name)
    }
}

/// 错误类别，调用方据此分支而不必匹配错误文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    ResourceExhausted,
    InvalidState,
    InvalidTransition,
    Execution,
    Persistence,
    Timeout,
    Cancelled,
    Configuration,
    Internal,
}

/// 编排引擎错误类型定义
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("数据验证失败: {}", join_field_errors(.errors))]
    Validation { errors: Vec<FieldError> },
    #[error("{kind}未找到: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("资源不足: {0}")]
    ResourceExhausted(String),
    #[error("无效状态: {0}")]
    InvalidState(String),
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("执行失败 [{stage}]: {message}")]
    Execution { stage: String, message: String },
    #[error("持久化错误: {0}")]
    Persistence(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("操作已取消: {0}")]
    Cancelled(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl HarvestError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation { errors }
    }
    pub fn invalid_field<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, message)],
        }
    }
    pub fn scraper_not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound {
            kind: EntityKind::Scraper,
            id: id.into(),
        }
    }
    pub fn job_not_found<S: ToString>(id: S) -> Self {
        Self::NotFound {
            kind: EntityKind::Job,
            id: id.to_string(),
        }
    }
    pub fn workflow_not_found<S: ToString>(id: S) -> Self {
        Self::NotFound {
            kind: EntityKind::Workflow,
            id: id.to_string(),
        }
    }
    pub fn strategy_not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound {
            kind: EntityKind::Strategy,
            id: key.into(),
        }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn execution<S: Into<String>, M: Into<String>>(stage: S, message: M) -> Self {
        Self::Execution {
            stage: stage.into(),
            message: message.into(),
        }
    }
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Validation { .. } | HarvestError::InvalidCron { .. } => {
                ErrorKind::Validation
            }
            HarvestError::NotFound { .. } => ErrorKind::NotFound,
            HarvestError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            HarvestError::InvalidState(_) => ErrorKind::InvalidState,
            HarvestError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            HarvestError::Execution { .. } => ErrorKind::Execution,
            HarvestError::Persistence(_) => ErrorKind::Persistence,
            HarvestError::Timeout(_) => ErrorKind::Timeout,
            HarvestError::Cancelled(_) => ErrorKind::Cancelled,
            HarvestError::Configuration(_) => ErrorKind::Configuration,
            HarvestError::Serialization(_) | HarvestError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 字段级问题列表，仅对校验错误非空
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            HarvestError::Validation { errors } => errors,
            _ => &[],
        }
    }

    /// 调用方应退避后重试（仅容量不足）
    pub fn should_backoff(&self) -> bool {
        matches!(self, HarvestError::ResourceExhausted(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::ResourceExhausted(_)
                | HarvestError::Persistence(_)
                | HarvestError::Timeout(_)
                | HarvestError::Execution { .. }
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            HarvestError::Validation { .. } | HarvestError::InvalidCron { .. } => {
                "输入数据验证失败"
            }
            HarvestError::NotFound { .. } => "请求的资源不存在",
            HarvestError::ResourceExhausted(_) => "并发作业已达上限，请稍后重试",
            HarvestError::InvalidState(_) => "当前状态不允许此操作",
            HarvestError::InvalidTransition { .. } => "非法的状态转换",
            HarvestError::Timeout(_) => "操作超时，请稍后重试",
            HarvestError::Cancelled(_) => "操作已取消",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for HarvestError {
    fn from(err: sqlx::Error) -> Self {
        HarvestError::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for HarvestError {
    fn from(err: anyhow::Error) -> Self {
        HarvestError::Internal(err.to_string())
    }
}
