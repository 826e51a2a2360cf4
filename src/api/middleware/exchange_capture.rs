//! 交换捕获中间件
//! 缓冲请求/响应体，构建两个阶段的日志记录并提交给异步流水线

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    domain::exchange::{ExchangeRecord, HeaderMultimap, RequestSnapshot, ResponseSnapshot},
    service::pipeline::LogProcessor,
};

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// 请求扩展中的关联 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// 优先沿用上游传入的关联 ID，否则生成新的 UUID v4
pub fn correlation_id_from(headers: &HeaderMap) -> String {
    [CORRELATION_ID_HEADER, TRACE_ID_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header_multimap(headers: &HeaderMap) -> HeaderMultimap {
    let mut map = HeaderMultimap::new();
    for (name, value) in headers {
        map.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    map
}

/// 日志用的 body 副本：超过上限时截断并标记
pub fn body_snapshot(bytes: &Bytes, limit: usize) -> (Option<String>, bool) {
    if bytes.is_empty() {
        return (None, false);
    }
    let truncated = bytes.len() > limit;
    let kept = if truncated { &bytes[..limit] } else { &bytes[..] };
    (Some(String::from_utf8_lossy(kept).into_owned()), truncated)
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 交换捕获中间件
pub async fn exchange_capture_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let processor = state.processor();
    let limits = BodyLimits {
        log: state.config.server.max_body_bytes,
        buffer: state.config.server.max_buffered_body_bytes,
    };
    capture(processor.as_ref(), limits, req, next).await
}

#[derive(Debug, Clone, Copy)]
struct BodyLimits {
    /// 日志副本上限
    log: usize,
    /// 缓冲上限
    buffer: usize,
}

/// 声明长度超过缓冲上限
fn exceeds(body: &Body, ceiling: usize) -> bool {
    body.size_hint().lower() > ceiling as u64
}

async fn capture(processor: &dyn LogProcessor, limits: BodyLimits, req: Request, next: Next) -> Response {
    let correlation_id = correlation_id_from(req.headers());
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let (mut parts, body) = req.into_parts();
    if exceeds(&body, limits.buffer) {
        tracing::warn!(
            correlation_id = %correlation_id,
            limit = limits.buffer,
            "Request body exceeds buffer limit"
        );
        return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
    }
    let bytes = match to_bytes(body, limits.buffer).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
        }
    };

    let (request_body, request_truncated) = body_snapshot(&bytes, limits.log);
    let request = RequestSnapshot {
        correlation_id: correlation_id.clone(),
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        remote,
        headers: header_multimap(&parts.headers),
        body: request_body,
        content_type: content_type(&parts.headers),
        truncated: request_truncated,
    };

    let started = Utc::now();
    processor.process_request(ExchangeRecord::for_request_at(request.clone(), started));

    parts
        .extensions
        .insert(CorrelationId(correlation_id.clone()));
    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let (mut parts, body) = response.into_parts();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        parts.headers.insert(CORRELATION_ID_HEADER, value);
    }
    // 超大响应不缓冲，原样透传，日志中只标记截断
    let (response_body, response_truncated, body) = if exceeds(&body, limits.buffer) {
        tracing::debug!(
            correlation_id = %correlation_id,
            limit = limits.buffer,
            "Response body exceeds buffer limit, streaming without capture"
        );
        (None, true, body)
    } else {
        match to_bytes(body, limits.buffer).await {
            Ok(bytes) => {
                let (snapshot, truncated) = body_snapshot(&bytes, limits.log);
                (snapshot, truncated, Body::from(bytes))
            }
            Err(e) => {
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Failed to read response body");
                (None, true, Body::empty())
            }
        }
    };

    let response = ResponseSnapshot {
        status: parts.status.as_u16(),
        headers: header_multimap(&parts.headers),
        body: response_body,
        truncated: response_truncated,
    };
    crate::metrics::count_captured(request_truncated || response_truncated);
    processor.process_response(ExchangeRecord::for_response(request, response, started));

    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_prefers_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("trace-1"));
        assert_eq!(correlation_id_from(&headers), "trace-1");

        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("corr-1"));
        assert_eq!(correlation_id_from(&headers), "corr-1");
    }

    #[test]
    fn test_correlation_id_generated_when_blank() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("  "));
        let id = correlation_id_from(&headers);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_body_snapshot_truncates() {
        let bytes = Bytes::from_static(b"0123456789");
        assert_eq!(body_snapshot(&bytes, 4), (Some("0123".to_string()), true));
        assert_eq!(body_snapshot(&bytes, 10), (Some("0123456789".to_string()), false));
        assert_eq!(body_snapshot(&Bytes::new(), 4), (None, false));
    }

    #[test]
    fn test_header_multimap_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-token", HeaderValue::from_static("a"));
        headers.append("x-token", HeaderValue::from_static("b"));
        let map = header_multimap(&headers);
        assert_eq!(map.get("x-token").map(|v| v.len()), Some(2));
    }
}
