//! Header 脱敏

use std::sync::Arc;

use super::LogSanitizer;
use crate::domain::exchange::{ExchangeRecord, HeaderMultimap};
use crate::error::SanitizeError;
use crate::service::sanitization::context::SanitizationContext;
use crate::service::sanitization::value::ValueSanitizer;

pub struct HeaderSanitizer {
    context: Arc<SanitizationContext>,
}

impl HeaderSanitizer {
    pub fn new(context: Arc<SanitizationContext>) -> Self {
        Self { context }
    }

    /// 逐个值独立脱敏，保持顺序
    pub fn mask(&self, headers: &mut HeaderMultimap) {
        if !self.context.is_enabled() || !self.context.has_header_rules() || headers.is_empty() {
            return;
        }

        let values = ValueSanitizer::new(self.context.registry());
        for (name, header_values) in headers.iter_mut() {
            let Some(rule) = self.context.header_rule(name) else {
                continue;
            };
            tracing::trace!(header = name, field = %rule.field, "Sanitizing header");
            for value in header_values.iter_mut() {
                *value = values.sanitize(value, rule);
            }
        }
    }
}

impl LogSanitizer for HeaderSanitizer {
    fn name(&self) -> &'static str {
        "header"
    }

    fn sanitize_request(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        self.mask(&mut record.request_headers);
        Ok(())
    }

    /// 响应阶段记录同样携带请求头，两侧都要脱敏
    fn sanitize_response(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError> {
        self.mask(&mut record.request_headers);
        self.mask(&mut record.response_headers);
        Ok(())
    }
}
