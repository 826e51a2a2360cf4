//! 脱敏引擎
//!
//! 按固定顺序（Body → Header → Query）执行各作用域脱敏器，
//! 单个脱敏器失败只记录日志，不影响后续脱敏器。

use std::sync::Arc;

use super::context::SanitizationContext;
use super::sanitizers::{HeaderSanitizer, JsonBodySanitizer, LogSanitizer, QueryParamSanitizer};
use crate::domain::exchange::{ExchangePhase, ExchangeRecord};

pub struct SanitizationEngine {
    sanitizers: Vec<Box<dyn LogSanitizer>>,
}

impl SanitizationEngine {
    pub fn new(context: Arc<SanitizationContext>) -> Self {
        Self::with_sanitizers(vec![
            Box::new(JsonBodySanitizer::new(context.clone())),
            Box::new(HeaderSanitizer::new(context.clone())),
            Box::new(QueryParamSanitizer::new(context)),
        ])
    }

    /// 自定义脱敏器列表（按给定顺序执行）
    pub fn with_sanitizers(sanitizers: Vec<Box<dyn LogSanitizer>>) -> Self {
        Self { sanitizers }
    }

    pub fn sanitizer_names(&self) -> Vec<&'static str> {
        self.sanitizers.iter().map(|s| s.name()).collect()
    }

    pub fn sanitize(&self, phase: ExchangePhase, record: &mut ExchangeRecord) {
        for sanitizer in &self.sanitizers {
            let result = match phase {
                ExchangePhase::Request => sanitizer.sanitize_request(record),
                ExchangePhase::Response => sanitizer.sanitize_response(record),
            };
            if let Err(e) = result {
                tracing::error!(
                    sanitizer = sanitizer.name(),
                    phase = phase.as_str(),
                    correlation_id = %record.correlation_id,
                    error = %e,
                    "Sanitizer failed, continuing with remaining sanitizers"
                );
                crate::metrics::count_sanitizer_failure(sanitizer.name());
            }
        }
    }

    pub fn sanitize_request(&self, record: &mut ExchangeRecord) {
        self.sanitize(ExchangePhase::Request, record);
    }

    pub fn sanitize_response(&self, record: &mut ExchangeRecord) {
        self.sanitize(ExchangePhase::Response, record);
    }
}
