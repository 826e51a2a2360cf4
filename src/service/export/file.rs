//! 文件导出器：每条记录输出一行 JSON
//!
//! 未配置文件路径时写入 tracing 目标 `exchange_log::export`，
//! 由日志层决定落到控制台还是滚动文件。

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::LogExporter;
use crate::domain::exchange::{ExchangePhase, ExchangeRecord};
use crate::error::ExportError;

pub const EXPORT_TARGET: &str = "exchange_log::export";

pub struct FileLogExporter {
    path: Option<PathBuf>,
    // 串行化追加写，保证一行不被其它 worker 打断
    write_lock: Mutex<()>,
}

impl FileLogExporter {
    /// 输出到 tracing
    pub fn tracing() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// 追加写入指定文件
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(file_path: Option<&str>) -> Self {
        match file_path.filter(|p| !p.is_empty()) {
            Some(path) => Self::with_path(path),
            None => Self::tracing(),
        }
    }

    async fn append(&self, line: &str) -> Result<(), ExportError> {
        let Some(path) = &self.path else {
            tracing::info!(target: EXPORT_TARGET, "{}", line);
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_record(&self, phase: ExchangePhase, record: &ExchangeRecord) {
        let line = match serde_json::to_string(&ExportLine { phase, record }) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(correlation_id = %record.correlation_id, error = %e, "Failed to serialize exchange log");
                return;
            }
        };
        if let Err(e) = self.append(&line).await {
            tracing::error!(correlation_id = %record.correlation_id, error = %e, "Failed to write exchange log file");
        }
    }
}

#[derive(serde::Serialize)]
struct ExportLine<'a> {
    phase: ExchangePhase,
    #[serde(flatten)]
    record: &'a ExchangeRecord,
}

#[async_trait]
impl LogExporter for FileLogExporter {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn export_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.write_record(ExchangePhase::Request, record).await;
        Ok(())
    }

    async fn export_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.write_record(ExchangePhase::Response, record).await;
        Ok(())
    }
}
