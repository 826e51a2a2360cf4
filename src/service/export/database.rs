//! 数据库导出器：按阶段调用幂等 upsert

use std::sync::Arc;

use async_trait::async_trait;

use super::LogExporter;
use crate::domain::exchange::ExchangeRecord;
use crate::error::ExportError;
use crate::repository::exchange_log::ExchangeLogRepository;

pub struct DatabaseLogExporter {
    repository: Arc<dyn ExchangeLogRepository>,
}

impl DatabaseLogExporter {
    pub fn new(repository: Arc<dyn ExchangeLogRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl LogExporter for DatabaseLogExporter {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn export_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.repository.upsert_request(record).await.map_err(|e| {
            tracing::error!(correlation_id = %record.correlation_id, error = %e, "Failed to persist request log");
            e
        })
    }

    async fn export_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.repository.upsert_response(record).await.map_err(|e| {
            tracing::error!(correlation_id = %record.correlation_id, error = %e, "Failed to persist response log");
            e
        })
    }
}
