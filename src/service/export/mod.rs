//! 日志导出：分发器 + 数据库 / 文件导出器

pub mod database;
pub mod dispatcher;
pub mod file;

use async_trait::async_trait;

pub use database::DatabaseLogExporter;
pub use dispatcher::LogExporterDispatcher;
pub use file::FileLogExporter;

use crate::domain::exchange::{ExchangePhase, ExchangeRecord};
use crate::error::ExportError;

#[async_trait]
pub trait LogExporter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn export_request(&self, record: &ExchangeRecord) -> Result<(), ExportError>;

    async fn export_response(&self, record: &ExchangeRecord) -> Result<(), ExportError>;

    async fn export(&self, phase: ExchangePhase, record: &ExchangeRecord) -> Result<(), ExportError> {
        match phase {
            ExchangePhase::Request => self.export_request(record).await,
            ExchangePhase::Response => self.export_response(record).await,
        }
    }
}
