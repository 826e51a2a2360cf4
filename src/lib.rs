//! exchange-log - HTTP 交换日志采集与选择性脱敏
//!
//! 捕获请求/响应，按配置对 JSON Body、Header、Query 参数脱敏，
//! 经异步流水线导出到数据库与日志文件。

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{ConfigError, ExportError, PipelineError, SanitizeError, StrategyError};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        config::Config,
        domain::{ExchangePhase, ExchangeRecord},
        service::{LogProcessor, SanitizationContext, SanitizationEngine, StrategyRegistry},
    };
}
