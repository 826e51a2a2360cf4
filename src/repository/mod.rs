// Repository 抽象层
pub mod exchange_log;

pub use exchange_log::{
    ExchangeLogRepository, ExchangeLogRow, InMemoryExchangeLogRepository, PgExchangeLogRepository,
};
