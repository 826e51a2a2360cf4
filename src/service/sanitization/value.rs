//! 单值脱敏：所有作用域共用的最小执行单元

use super::compiler::SanitizationRule;
use super::registry::StrategyRegistry;
use crate::error::StrategyError;

/// 策略执行失败时的固定占位符
pub const ERROR_PLACEHOLDER: &str = "******(Error)";

pub struct ValueSanitizer<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> ValueSanitizer<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    /// 空白值原样返回；策略失败返回占位符，永不失败
    pub fn sanitize(&self, value: &str, rule: &SanitizationRule) -> String {
        if value.trim().is_empty() {
            return value.to_string();
        }

        match self.registry.apply(rule.strategy, value, &rule.params) {
            Ok(masked) => masked,
            Err(e @ StrategyError::ParamsMismatch { .. }) => {
                tracing::error!(
                    field = %rule.field,
                    strategy = %rule.strategy,
                    error = %e,
                    "Sanitization strategy contract violated"
                );
                crate::metrics::count_strategy_failure();
                ERROR_PLACEHOLDER.to_string()
            }
            Err(e) => {
                tracing::warn!(
                    field = %rule.field,
                    strategy = %rule.strategy,
                    replacement = %rule.replacement,
                    value_len = value.chars().count(),
                    error = %e,
                    "Sanitization strategy failed"
                );
                crate::metrics::count_strategy_failure();
                ERROR_PLACEHOLDER.to_string()
            }
        }
    }
}
