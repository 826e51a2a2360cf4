//! HTTP 交换日志领域模型
//!
//! 一次 HTTP 交换由两个独立的记录描述：请求到达时创建请求阶段记录，
//! 响应发出时再创建一个新的响应阶段记录（同一 correlation_id）。
//! 两者在内存中从不共享，只在存储层按 correlation_id 合并。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 有序多值 Header 表（保留插入顺序与原始大小写）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMultimap(Vec<(String, Vec<String>)>);

impl HeaderMultimap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 追加一个值；同名（大小写敏感）Header 合并到同一条目
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.0.push((name, vec![value])),
        }
    }

    /// 大小写不敏感查找
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<String>)> {
        self.0.iter_mut().map(|(n, v)| (n.as_str(), v))
    }

    /// 序列化为 JSON 对象（持久化用）
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|(n, v)| (n.clone(), serde_json::json!(v)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMultimap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderMultimap::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// 交换阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangePhase {
    Request,
    Response,
}

impl ExchangePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangePhase::Request => "request",
            ExchangePhase::Response => "response",
        }
    }
}

/// 单次交换的阶段状态：Pending → RequestStored → Complete
///
/// 响应阶段可能先于请求阶段完成，此时直接进入 Complete；
/// Complete 是终态，迟到的请求阶段不会回退状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    Pending,
    RequestStored,
    Complete,
}

impl PhaseState {
    pub fn advance(self, phase: ExchangePhase) -> PhaseState {
        match (self, phase) {
            (PhaseState::Complete, _) => PhaseState::Complete,
            (_, ExchangePhase::Response) => PhaseState::Complete,
            (_, ExchangePhase::Request) => PhaseState::RequestStored,
        }
    }
}

/// 捕获层提供的请求快照
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub correlation_id: String,
    pub method: String,
    pub uri: String,
    pub remote: Option<String>,
    pub headers: HeaderMultimap,
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub truncated: bool,
}

/// 捕获层提供的响应快照
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HeaderMultimap,
    pub body: Option<String>,
    pub truncated: bool,
}

/// HTTP 交换日志记录（可变，由脱敏器原地修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub correlation_id: String,
    pub created_time: DateTime<Utc>,
    pub request_time: Option<DateTime<Utc>>,
    pub response_time: Option<DateTime<Utc>>,
    pub duration_millis: Option<i64>,

    pub method: String,
    pub uri: String,
    pub remote: Option<String>,
    pub request_headers: HeaderMultimap,
    pub request_body: Option<String>,
    pub content_type: Option<String>,

    pub status_code: Option<u16>,
    pub response_headers: HeaderMultimap,
    pub response_body: Option<String>,

    pub client_info: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,

    pub truncated: bool,
    pub complete: bool,
}

impl ExchangeRecord {
    /// 请求到达时构建请求阶段记录
    pub fn for_request(request: RequestSnapshot) -> Self {
        Self::for_request_at(request, Utc::now())
    }

    pub fn for_request_at(request: RequestSnapshot, now: DateTime<Utc>) -> Self {
        let mut record = Self::empty(request.correlation_id.clone(), now);
        record.request_time = Some(now);
        record.fill_request(request);
        record
    }

    /// 响应发出时构建响应阶段记录
    ///
    /// 请求元数据会被重新填充，保证响应先入库时记录依然完整。
    pub fn for_response(
        request: RequestSnapshot,
        response: ResponseSnapshot,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::for_response_at(request, response, started_at, Utc::now())
    }

    pub fn for_response_at(
        request: RequestSnapshot,
        response: ResponseSnapshot,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::empty(request.correlation_id.clone(), started_at);
        record.request_time = Some(started_at);
        record.response_time = Some(now);
        record.duration_millis = Some((now - started_at).num_milliseconds().max(0));

        record.fill_request(request);

        record.status_code = Some(response.status);
        record.response_headers = response.headers;
        record.response_body = response.body;
        record.truncated |= response.truncated;
        record.complete = true;
        record
    }

    fn empty(correlation_id: String, created_time: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            created_time,
            request_time: None,
            response_time: None,
            duration_millis: None,
            method: String::new(),
            uri: String::new(),
            remote: None,
            request_headers: HeaderMultimap::new(),
            request_body: None,
            content_type: None,
            status_code: None,
            response_headers: HeaderMultimap::new(),
            response_body: None,
            client_info: None,
            ip: None,
            user_agent: None,
            truncated: false,
            complete: false,
        }
    }

    fn fill_request(&mut self, request: RequestSnapshot) {
        self.user_agent = request
            .headers
            .get("User-Agent")
            .map(|values| values.join(","))
            .filter(|ua| !ua.is_empty());

        // 客户端 IP：优先取 X-Forwarded-For 第一个地址
        self.ip = request
            .headers
            .get("X-Forwarded-For")
            .and_then(|values| values.first())
            .and_then(|xff| xff.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .or_else(|| request.remote.clone());

        self.client_info = match (&self.ip, &self.user_agent) {
            (None, None) => None,
            (ip, ua) => Some(
                serde_json::json!({ "ip": ip, "userAgent": ua }).to_string(),
            ),
        };

        self.method = request.method;
        self.uri = request.uri;
        self.remote = request.remote;
        self.content_type = request.content_type;
        self.request_headers = request.headers;
        self.request_body = request.body;
        self.truncated |= request.truncated;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn snapshot() -> RequestSnapshot {
        let headers: HeaderMultimap = vec![
            ("User-Agent", "curl/8.0"),
            ("X-Forwarded-For", "10.0.0.7, 172.16.0.1"),
            ("Accept", "application/json"),
        ]
        .into_iter()
        .collect();
        RequestSnapshot {
            correlation_id: "c-1".into(),
            method: "POST".into(),
            uri: "/api/pay?token=abc".into(),
            remote: Some("127.0.0.1".into()),
            headers,
            body: Some(r#"{"cardNo":"6222"}"#.into()),
            content_type: Some("application/json".into()),
            truncated: false,
        }
    }

    #[test]
    fn test_request_record_is_incomplete() {
        let record = ExchangeRecord::for_request(snapshot());
        assert_eq!(record.correlation_id, "c-1");
        assert!(!record.complete);
        assert!(record.request_time.is_some());
        assert!(record.response_time.is_none());
        assert_eq!(record.ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(record.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_response_record_carries_request_metadata() {
        let started = Utc::now() - Duration::milliseconds(250);
        let response = ResponseSnapshot {
            status: 201,
            headers: vec![("Content-Type", "application/json")].into_iter().collect(),
            body: Some("{}".into()),
            truncated: false,
        };
        let record = ExchangeRecord::for_response(snapshot(), response, started);
        assert!(record.complete);
        assert_eq!(record.method, "POST");
        assert_eq!(record.uri, "/api/pay?token=abc");
        assert_eq!(record.status_code, Some(201));
        assert_eq!(record.request_time, Some(started));
        assert!(record.duration_millis.unwrap_or_default() >= 250);
    }

    #[test]
    fn test_ip_falls_back_to_remote() {
        let mut snap = snapshot();
        snap.headers = HeaderMultimap::new();
        let record = ExchangeRecord::for_request(snap);
        assert_eq!(record.ip.as_deref(), Some("127.0.0.1"));
        assert!(record.user_agent.is_none());
    }

    #[test]
    fn test_header_multimap_case_insensitive_get() {
        let mut headers = HeaderMultimap::new();
        headers.append("Authorization", "Bearer a");
        headers.append("Authorization", "Bearer b");
        assert_eq!(headers.get("authorization").map(|v| v.len()), Some(2));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_phase_state_transitions() {
        assert_eq!(
            PhaseState::Pending.advance(ExchangePhase::Request),
            PhaseState::RequestStored
        );
        assert_eq!(
            PhaseState::RequestStored.advance(ExchangePhase::Response),
            PhaseState::Complete
        );
        // 响应先到
        assert_eq!(
            PhaseState::Pending.advance(ExchangePhase::Response),
            PhaseState::Complete
        );
        assert_eq!(
            PhaseState::Complete.advance(ExchangePhase::Request),
            PhaseState::Complete
        );
    }
}
