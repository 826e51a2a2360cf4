use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct Healthz {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_ok: Option<bool>,
    pub sanitization_enabled: bool,
    pub sanitized_fields: usize,
    pub queued: usize,
    pub pending_exchanges: usize,
    pub version: String,
}

pub async fn healthz(State(st): State<Arc<AppState>>) -> (StatusCode, Json<Healthz>) {
    let db_ok = match &st.pool {
        Some(pool) => Some(crate::infrastructure::db::health_check(pool).await.is_ok()),
        None => None,
    };
    let healthy = db_ok.unwrap_or(true);
    let body = Healthz {
        status: if healthy { "ok".into() } else { "degraded".into() },
        db_ok,
        sanitization_enabled: st.sanitization.is_enabled(),
        sanitized_fields: st.sanitization.field_names().count(),
        queued: st.pipeline.queued(),
        pending_exchanges: st.pipeline.tracker().pending(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

pub async fn metrics(State(st): State<Arc<AppState>>) -> Response {
    let mut out = crate::metrics::render_prometheus();
    out.push_str("# HELP exchange_log_queue_depth Log tasks waiting in the pipeline queue\n");
    out.push_str("# TYPE exchange_log_queue_depth gauge\n");
    out.push_str(&format!("exchange_log_queue_depth {}\n", st.pipeline.queued()));
    out.push_str("# HELP exchange_log_pending_exchanges Exchanges without a stored response\n");
    out.push_str("# TYPE exchange_log_pending_exchanges gauge\n");
    out.push_str(&format!(
        "exchange_log_pending_exchanges {}\n",
        st.pipeline.tracker().pending()
    ));

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        out,
    )
        .into_response()
}

/// 回显请求体（保留原 Content-Type）
pub async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// 以 JSON 回显查询参数
pub async fn echo_query(Query(params): Query<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(params)
}
