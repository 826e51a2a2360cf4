//! Domain 模块
//!
//! HTTP 交换日志领域模型

pub mod exchange;

// 重新导出常用类型
pub use exchange::{
    ExchangePhase, ExchangeRecord, HeaderMultimap, PhaseState, RequestSnapshot, ResponseSnapshot,
};
