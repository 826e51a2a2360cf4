// 交换日志 Repository
// 按 correlation_id 幂等合并请求/响应两个阶段，支持任意到达顺序

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Executor, PgPool};
use tokio::sync::Mutex;

use crate::domain::exchange::ExchangeRecord;
use crate::error::ExportError;

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS http_exchange_log (
    correlation_id TEXT NOT NULL,
    created_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    request_time TIMESTAMPTZ,
    response_time TIMESTAMPTZ,
    duration_millis BIGINT NOT NULL DEFAULT 0,
    method TEXT,
    uri TEXT,
    remote TEXT,
    request_headers JSONB,
    request_content JSONB,
    content_type TEXT,
    status_code INT NOT NULL DEFAULT 0,
    response_headers JSONB,
    response_content JSONB,
    client_info TEXT,
    ip TEXT,
    user_agent TEXT,
    truncated BOOLEAN NOT NULL DEFAULT FALSE,
    complete BOOLEAN NOT NULL DEFAULT FALSE,
    CONSTRAINT uk_http_exchange_log_correlation_id UNIQUE (correlation_id)
);

CREATE INDEX IF NOT EXISTS idx_http_exchange_log_created
ON http_exchange_log(created_time);

CREATE INDEX IF NOT EXISTS idx_http_exchange_log_incomplete
ON http_exchange_log(created_time)
WHERE complete = FALSE;
"#;

// ============ 持久化行模型 ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExchangeLogRow {
    pub correlation_id: String,
    pub created_time: DateTime<Utc>,
    pub request_time: Option<DateTime<Utc>>,
    pub response_time: Option<DateTime<Utc>>,
    pub duration_millis: i64,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub remote: Option<String>,
    pub request_headers: Option<JsonValue>,
    pub request_content: Option<JsonValue>,
    pub content_type: Option<String>,
    pub status_code: i32,
    pub response_headers: Option<JsonValue>,
    pub response_content: Option<JsonValue>,
    pub client_info: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub truncated: bool,
    pub complete: bool,
}

/// JSONB 列只接受 JSON 对象或数组，其它内容（含空白）存为 NULL
pub fn ensure_json(content: Option<&str>) -> Option<JsonValue> {
    let trimmed = content?.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn headers_json(record: &ExchangeRecord, response: bool) -> Option<JsonValue> {
    let headers = if response {
        &record.response_headers
    } else {
        &record.request_headers
    };
    if headers.is_empty() {
        None
    } else {
        Some(headers.to_json())
    }
}

// ============ Repository Trait ============

#[async_trait]
pub trait ExchangeLogRepository: Send + Sync {
    /// 写入请求阶段：新建（complete=false）或只更新请求列
    async fn upsert_request(&self, record: &ExchangeRecord) -> Result<(), ExportError>;

    /// 写入响应阶段：新建（complete=true，携带请求元数据）或更新响应列并置 complete=true
    async fn upsert_response(&self, record: &ExchangeRecord) -> Result<(), ExportError>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<ExchangeLogRow>, ExportError>;
}

// ============ PostgreSQL 实现 ============

pub struct PgExchangeLogRepository {
    pool: PgPool,
}

impl PgExchangeLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表（幂等）
    pub async fn migrate(&self) -> Result<(), ExportError> {
        // &str 走简单查询协议，允许多条语句
        self.pool.execute(MIGRATION_SQL).await?;
        tracing::info!("✅ http_exchange_log table ready");
        Ok(())
    }
}

#[async_trait]
impl ExchangeLogRepository for PgExchangeLogRepository {
    async fn upsert_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        sqlx::query(
            "INSERT INTO http_exchange_log (
                 correlation_id, created_time,
                 request_time, method, uri, remote,
                 request_headers, request_content, content_type,
                 complete, status_code, duration_millis, truncated
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, 0, 0, $10)
             ON CONFLICT (correlation_id) DO UPDATE SET
                 request_time = EXCLUDED.request_time,
                 method = EXCLUDED.method,
                 uri = EXCLUDED.uri,
                 remote = EXCLUDED.remote,
                 request_headers = EXCLUDED.request_headers,
                 request_content = EXCLUDED.request_content,
                 content_type = EXCLUDED.content_type,
                 truncated = http_exchange_log.truncated OR EXCLUDED.truncated",
        )
        .bind(&record.correlation_id)
        .bind(record.created_time)
        .bind(record.request_time)
        .bind(&record.method)
        .bind(&record.uri)
        .bind(&record.remote)
        .bind(headers_json(record, false))
        .bind(ensure_json(record.request_body.as_deref()))
        .bind(&record.content_type)
        .bind(record.truncated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        sqlx::query(
            "INSERT INTO http_exchange_log (
                 correlation_id, created_time,
                 response_time, status_code, duration_millis,
                 response_headers, response_content,
                 client_info, ip, user_agent,
                 complete, truncated,
                 method, uri, remote, request_time
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, $11, $12, $13, $14, $15)
             ON CONFLICT (correlation_id) DO UPDATE SET
                 response_time = EXCLUDED.response_time,
                 status_code = EXCLUDED.status_code,
                 duration_millis = EXCLUDED.duration_millis,
                 response_headers = EXCLUDED.response_headers,
                 response_content = EXCLUDED.response_content,
                 client_info = EXCLUDED.client_info,
                 ip = EXCLUDED.ip,
                 user_agent = EXCLUDED.user_agent,
                 complete = TRUE,
                 truncated = http_exchange_log.truncated OR EXCLUDED.truncated",
        )
        .bind(&record.correlation_id)
        .bind(record.created_time)
        .bind(record.response_time)
        .bind(record.status_code.map(i32::from).unwrap_or_default())
        .bind(record.duration_millis.unwrap_or_default())
        .bind(headers_json(record, true))
        .bind(ensure_json(record.response_body.as_deref()))
        .bind(&record.client_info)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(record.truncated)
        .bind(&record.method)
        .bind(&record.uri)
        .bind(&record.remote)
        .bind(record.request_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<ExchangeLogRow>, ExportError> {
        let row = sqlx::query_as::<_, ExchangeLogRow>(
            "SELECT correlation_id, created_time, request_time, response_time, duration_millis,
                    method, uri, remote, request_headers, request_content, content_type,
                    status_code, response_headers, response_content,
                    client_info, ip, user_agent, truncated, complete
             FROM http_exchange_log WHERE correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// ============ 内存实现（测试 / 无数据库部署） ============

/// 与 PostgreSQL 实现相同的合并语义，每次调用在锁内原子完成
#[derive(Default)]
pub struct InMemoryExchangeLogRepository {
    rows: Mutex<HashMap<String, ExchangeLogRow>>,
}

impl InMemoryExchangeLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ExchangeLogRepository for InMemoryExchangeLogRepository {
    async fn upsert_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        let mut rows = self.rows.lock().await;
        let request_headers = headers_json(record, false);
        let request_content = ensure_json(record.request_body.as_deref());

        match rows.get_mut(&record.correlation_id) {
            Some(row) => {
                row.request_time = record.request_time;
                row.method = Some(record.method.clone());
                row.uri = Some(record.uri.clone());
                row.remote = record.remote.clone();
                row.request_headers = request_headers;
                row.request_content = request_content;
                row.content_type = record.content_type.clone();
                row.truncated |= record.truncated;
            }
            None => {
                rows.insert(
                    record.correlation_id.clone(),
                    ExchangeLogRow {
                        correlation_id: record.correlation_id.clone(),
                        created_time: record.created_time,
                        request_time: record.request_time,
                        response_time: None,
                        duration_millis: 0,
                        method: Some(record.method.clone()),
                        uri: Some(record.uri.clone()),
                        remote: record.remote.clone(),
                        request_headers,
                        request_content,
                        content_type: record.content_type.clone(),
                        status_code: 0,
                        response_headers: None,
                        response_content: None,
                        client_info: None,
                        ip: None,
                        user_agent: None,
                        truncated: record.truncated,
                        complete: false,
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        let mut rows = self.rows.lock().await;
        let response_headers = headers_json(record, true);
        let response_content = ensure_json(record.response_body.as_deref());
        let status_code = record.status_code.map(i32::from).unwrap_or_default();
        let duration_millis = record.duration_millis.unwrap_or_default();

        match rows.get_mut(&record.correlation_id) {
            Some(row) => {
                row.response_time = record.response_time;
                row.status_code = status_code;
                row.duration_millis = duration_millis;
                row.response_headers = response_headers;
                row.response_content = response_content;
                row.client_info = record.client_info.clone();
                row.ip = record.ip.clone();
                row.user_agent = record.user_agent.clone();
                row.complete = true;
                row.truncated |= record.truncated;
            }
            None => {
                rows.insert(
                    record.correlation_id.clone(),
                    ExchangeLogRow {
                        correlation_id: record.correlation_id.clone(),
                        created_time: record.created_time,
                        request_time: record.request_time,
                        response_time: record.response_time,
                        duration_millis,
                        method: Some(record.method.clone()),
                        uri: Some(record.uri.clone()),
                        remote: record.remote.clone(),
                        request_headers: None,
                        request_content: None,
                        content_type: None,
                        status_code,
                        response_headers,
                        response_content,
                        client_info: record.client_info.clone(),
                        ip: record.ip.clone(),
                        user_agent: record.user_agent.clone(),
                        truncated: record.truncated,
                        complete: true,
                    },
                );
            }
        }
        Ok(())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<ExchangeLogRow>, ExportError> {
        Ok(self.rows.lock().await.get(correlation_id).cloned())
    }
}
