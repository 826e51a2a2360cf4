//! 导出分发器：按顺序转发给所有导出器，单个导出器失败相互隔离

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::LogExporter;
use crate::domain::exchange::{ExchangePhase, ExchangeRecord};
use crate::error::ExportError;

pub struct LogExporterDispatcher {
    exporters: Vec<Arc<dyn LogExporter>>,
}

impl LogExporterDispatcher {
    pub fn new(exporters: Vec<Arc<dyn LogExporter>>) -> Self {
        tracing::info!(
            exporters = ?exporters.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "Initialized log exporter dispatcher"
        );
        Self { exporters }
    }

    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }

    /// 至少一个导出器成功即视为已落库；全部失败时返回错误
    async fn dispatch(&self, phase: ExchangePhase, record: &ExchangeRecord) -> Result<(), ExportError> {
        let mut failures = 0usize;
        for exporter in &self.exporters {
            let started = Instant::now();
            let result = exporter.export(phase, record).await;
            crate::metrics::observe_export_latency(started.elapsed().as_millis());
            match result {
                Ok(()) => crate::metrics::count_exported(exporter.name(), phase),
                Err(e) => {
                    tracing::error!(
                        exporter = exporter.name(),
                        phase = phase.as_str(),
                        correlation_id = %record.correlation_id,
                        error = %e,
                        "Log exporter failed"
                    );
                    crate::metrics::count_exporter_failure(exporter.name());
                    failures += 1;
                }
            }
        }

        if failures > 0 && failures == self.exporters.len() {
            return Err(ExportError::AllExportersFailed(failures));
        }
        Ok(())
    }
}

#[async_trait]
impl LogExporter for LogExporterDispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn export_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.dispatch(ExchangePhase::Request, record).await
    }

    async fn export_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.dispatch(ExchangePhase::Response, record).await
    }
}
