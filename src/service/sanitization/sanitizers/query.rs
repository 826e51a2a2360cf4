//! Query 参数脱敏
//!
//! 只改写命中的参数对；未命中的参数对保持原始编码，URI 未变化时不回写。

use std::sync::Arc;

use super::LogSanitizer;
use crate::domain::exchange::ExchangeRecord;
use crate::error::SanitizeError;
use crate::service::sanitization::context::SanitizationContext;
use crate::service::sanitization::value::ValueSanitizer;

pub struct QueryParamSanitizer {
    context: Arc<SanitizationContext>,
}

/// 表单编码解码（`+` 视为空格），非法 UTF-8 时返回原文
fn decode(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    match urlencoding::decode(&plus_decoded) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            tracing::debug!(len = raw.len(), "URL decode failed, using raw value");
            raw.to_string()
        }
    }
}

/// 表单编码：空格编码为 `+`，掩码字符 `*` 不转义
fn encode(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%20", "+")
        .replace("%2A", "*")
}

impl QueryParamSanitizer {
    pub fn new(context: Arc<SanitizationContext>) -> Self {
        Self { context }
    }

    /// 脱敏查询串（不含 `?`），返回新的查询串
    pub fn mask_query(&self, query: &str) -> String {
        let values = ValueSanitizer::new(self.context.registry());
        let mut matches = 0usize;

        let pairs: Vec<String> = query
            .split('&')
            .map(|pair| {
                let Some(eq) = pair.find('=').filter(|&i| i > 0) else {
                    return pair.to_string();
                };
                let key = decode(&pair[..eq]);
                let Some(rule) = self.context.query_rule(&key) else {
                    return pair.to_string();
                };
                matches += 1;
                tracing::trace!(param = %key, field = %rule.field, "Sanitizing query parameter");
                let masked = values.sanitize(&decode(&pair[eq + 1..]), rule);
                format!("{}={}", encode(&key), encode(&masked))
            })
            .collect();

        if matches > 0 {
            tracing::debug!(matches, "Sanitized query parameters");
        }
        pairs.join("&")
    }

    /// 脱敏完整 URI，片段（`#...`）保持不变；无变化时返回 `None`
    pub fn mask_uri(&self, uri: &str) -> Option<String> {
        if !self.context.is_enabled() || !self.context.has_query_rules() {
            return None;
        }
        let q = uri.find('?')?;
        let (path, rest) = (&uri[..q], &uri[q + 1..]);
        let (query, fragment) = match rest.find('#') {
            Some(h) => (&rest[..h], Some(&rest[h..])),
            None => (rest, None),
        };
        if query.is_empty() {
            return None;
        }

        let masked = self.mask_query(query);
        if masked == query {
            return None;
        }
        Some(format!("{path}?{masked}{}", fragment.unwrap_or_default()))
    }

    fn rewrite(&self, record: &mut ExchangeRecord) {
        if let Some(uri) = self.mask_uri(&record.uri) {
            record.uri = uri;
        }
    }
}

impl LogSanitizer for QueryParamSanitizer {
    fn name(&self) -> &'static str {
        "query"
    }

    fn sanitize_request(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        self.rewrite(record);
        Ok(())
    }

    fn sanitize_response(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        self.rewrite(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDefinition, FieldTable, SanitizationConfig};
    use crate::service::sanitization::registry::StrategyRegistry;

    fn sanitizer() -> QueryParamSanitizer {
        let mut fields = FieldTable::new();
        fields.insert(
            "token",
            FieldDefinition {
                aliases: vec![],
                strategy: "FULL".into(),
                replacement: None,
                params: Default::default(),
            },
        );
        fields.insert(
            "phone",
            FieldDefinition {
                aliases: vec!["query.mobile".into()],
                strategy: "KEEP_FIRST_LAST".into(),
                replacement: None,
                params: serde_json::json!({"show-prefix": 3, "show-suffix": 2})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        );
        let config = SanitizationConfig {
            fields,
            ..Default::default()
        };
        let ctx = SanitizationContext::build(&config, Arc::new(StrategyRegistry::standard().unwrap()))
            .unwrap();
        QueryParamSanitizer::new(Arc::new(ctx))
    }

    #[test]
    fn test_masks_matched_param() {
        let out = sanitizer().mask_uri("/api/pay?token=abc123&page=1").unwrap();
        assert_eq!(out, "/api/pay?token=******&page=1");
    }

    #[test]
    fn test_key_lookup_is_case_insensitive() {
        let out = sanitizer().mask_uri("/x?TOKEN=abc").unwrap();
        assert_eq!(out, "/x?TOKEN=***");
    }

    #[test]
    fn test_unmatched_pairs_keep_encoding() {
        let out = sanitizer()
            .mask_uri("/x?q=hello%20world&token=a%2Bb&empty&=v&&last=")
            .unwrap();
        assert_eq!(out, "/x?q=hello%20world&token=***&empty&=v&&last=");
    }

    #[test]
    fn test_masked_value_is_reencoded() {
        let out = sanitizer().mask_uri("/x?mobile=ab%20cd+efgh").unwrap();
        assert_eq!(out, "/x?mobile=ab+*****gh");
    }

    #[test]
    fn test_fragment_preserved() {
        let out = sanitizer().mask_uri("/x?token=abc#section").unwrap();
        assert_eq!(out, "/x?token=***#section");
    }

    #[test]
    fn test_unchanged_uri_not_rewritten() {
        let s = sanitizer();
        assert!(s.mask_uri("/x?page=1").is_none());
        assert!(s.mask_uri("/x").is_none());
        assert!(s.mask_uri("/x?").is_none());
    }
}
