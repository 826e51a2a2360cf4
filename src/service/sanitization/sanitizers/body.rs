//! JSON Body 脱敏

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::LogSanitizer;
use crate::domain::exchange::ExchangeRecord;
use crate::error::SanitizeError;
use crate::infrastructure::json_path::{self, Step};
use crate::service::sanitization::context::SanitizationContext;
use crate::service::sanitization::value::ValueSanitizer;

pub struct JsonBodySanitizer {
    context: Arc<SanitizationContext>,
}

impl JsonBodySanitizer {
    pub fn new(context: Arc<SanitizationContext>) -> Self {
        tracing::info!(
            rules = context.body_rules().len(),
            "Initialized JSON body sanitizer"
        );
        Self { context }
    }

    fn is_json(content_type: Option<&str>) -> bool {
        content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }

    /// 返回 `Some(新内容)` 表示至少一个路径命中；解析失败时原样放行
    pub fn mask(&self, content_type: Option<&str>, body: &str) -> Result<Option<String>, SanitizeError> {
        if !self.context.is_enabled()
            || !Self::is_json(content_type)
            || self.context.body_rules().is_empty()
            || body.trim().is_empty()
        {
            return Ok(None);
        }

        let started = Instant::now();
        let mut doc: Value = match serde_json::from_str(body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    body_len = body.len(),
                    "JSON body sanitization skipped, body is not valid JSON"
                );
                return Ok(None);
            }
        };

        let values = ValueSanitizer::new(self.context.registry());
        // 同一节点只由第一条命中的规则脱敏（`$.f` 与派生的 `$..f` 会命中同一位置）
        let mut masked_locations: HashSet<Vec<Step>> = HashSet::new();
        for body_rule in self.context.body_rules() {
            for location in body_rule.path.locate(&doc) {
                if masked_locations.contains(&location) {
                    continue;
                }
                let Some(node) = json_path::resolve_mut(&mut doc, &location) else {
                    continue;
                };
                let original = match node {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null | Value::Object(_) | Value::Array(_) => continue,
                };
                tracing::debug!(path = %body_rule.path, strategy = %body_rule.rule.strategy, "JSON path matched");
                *node = Value::String(values.sanitize(&original, &body_rule.rule));
                masked_locations.insert(location);
            }
        }
        let matches = masked_locations.len();

        if matches == 0 {
            return Ok(None);
        }

        let masked = serde_json::to_string(&doc).map_err(|e| SanitizeError::Serialize {
            surface: "body",
            reason: e.to_string(),
        })?;
        tracing::debug!(
            matches,
            body_len = body.len(),
            cost_us = started.elapsed().as_micros() as u64,
            "JSON body sanitization completed"
        );
        Ok(Some(masked))
    }
}

impl LogSanitizer for JsonBodySanitizer {
    fn name(&self) -> &'static str {
        "json-body"
    }

    fn sanitize_request(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        let Some(body) = record.request_body.as_deref() else {
            return Ok(());
        };
        if let Some(masked) = self.mask(record.content_type.as_deref(), body)? {
            record.request_body = Some(masked);
        }
        Ok(())
    }

    /// 响应阶段记录也带有请求体，按请求 Content-Type 一并脱敏
    fn sanitize_response(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        self.sanitize_request(record)?;

        let Some(body) = record.response_body.as_deref() else {
            return Ok(());
        };
        // 优先使用响应自身的 Content-Type
        let content_type = record
            .response_headers
            .get("Content-Type")
            .and_then(|values| values.first())
            .map(String::as_str)
            .or(record.content_type.as_deref());
        if let Some(masked) = self.mask(content_type, body)? {
            record.response_body = Some(masked);
        }
        Ok(())
    }
}
