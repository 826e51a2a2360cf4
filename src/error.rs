//! 统一错误类型
//!
//! 错误分级：
//! - `ConfigError`：启动期致命错误，配置非法即中止启动
//! - `StrategyError`：单个值脱敏失败，可恢复（占位符替换）
//! - `SanitizeError`：单个脱敏面失败，可恢复（原样放行）
//! - `ExportError`：单个导出器失败，可恢复（其他导出器继续）
//! - `PipelineError`：任务调度失败，可恢复（该阶段日志丢弃）

use thiserror::Error;

use crate::service::sanitization::strategy::StrategyType;

/// 配置错误（启动期，致命）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for field '{field}': {source}")]
    InvalidField {
        field: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Unknown strategy type: '{0}'")]
    UnknownStrategy(String),

    #[error("Invalid value for parameter '{key}': {value}")]
    InvalidParam { key: String, value: String },

    #[error("Parameter '{0}' is required")]
    MissingParam(String),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    #[error("Invalid JSON path '{path}': {reason}")]
    InvalidJsonPath { path: String, reason: String },

    #[error("Invalid alias '{0}'")]
    InvalidAlias(String),

    #[error("Missing validators for required strategies: {missing:?}. Available: {available:?}")]
    MissingValidators {
        missing: Vec<StrategyType>,
        available: Vec<StrategyType>,
    },

    #[error("Missing required sanitization strategies: {missing:?}. Available: {available:?}")]
    MissingStrategies {
        missing: Vec<StrategyType>,
        available: Vec<StrategyType>,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn for_field(field: impl Into<String>, source: ConfigError) -> Self {
        Self::InvalidField {
            field: field.into(),
            source: Box::new(source),
        }
    }
}

/// 单值脱敏错误
#[derive(Debug, Error)]
pub enum StrategyError {
    /// 参数类型与策略不匹配：属于编程契约错误，而非数据错误
    #[error("{strategy} strategy requires {expected} params, but got {actual}")]
    ParamsMismatch {
        strategy: StrategyType,
        expected: StrategyType,
        actual: StrategyType,
    },

    #[error("Strategy {0} failed: {1}")]
    Execution(StrategyType, String),
}

/// 单个脱敏面错误
#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("Failed to parse {surface}: {reason}")]
    Parse {
        surface: &'static str,
        reason: String,
    },

    #[error("Failed to serialize {surface}: {reason}")]
    Serialize {
        surface: &'static str,
        reason: String,
    },
}

/// 导出错误
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("All {0} exporters failed")]
    AllExportersFailed(usize),
}

/// 流水线调度错误
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("Pipeline is shut down")]
    Closed,

    #[error("Pipeline task panicked: {0}")]
    TaskPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_names_field() {
        let err = ConfigError::for_field("cardNo", ConfigError::InvalidRegex("unclosed group".into()));
        let msg = err.to_string();
        assert!(msg.contains("cardNo"));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_params_mismatch_message() {
        let err = StrategyError::ParamsMismatch {
            strategy: StrategyType::PartialHide,
            expected: StrategyType::PartialHide,
            actual: StrategyType::Full,
        };
        assert!(err.to_string().contains("PARTIAL_HIDE"));
    }
}
