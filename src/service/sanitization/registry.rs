//! 策略注册表
//!
//! 持有每种策略类型唯一的校验器与实现，启动时做完整性校验：
//! 任何策略类型缺少校验器或实现都会中止启动。

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::strategy::{
    FullStrategy, HashSha256Strategy, KeepFirstLastStrategy, MaskingStrategy, PartialHideStrategy,
    PatternRegexStrategy, StrategyParams, StrategyType,
};
use crate::error::{ConfigError, StrategyError};

/// 未校验的原始参数（来自配置文件）
pub type RawParams = serde_json::Map<String, Value>;

pub const PARAM_SHOW_PREFIX: &str = "show-prefix";
pub const PARAM_SHOW_SUFFIX: &str = "show-suffix";
pub const PARAM_PATTERN: &str = "pattern";
pub const PARAM_REPLACEMENT: &str = "replacement";

/// 参数校验器：原始参数 → 类型化参数
pub trait StrategyValidator: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn validate(&self, params: &RawParams) -> Result<StrategyParams, ConfigError>;
}

/// 前后缀保留字符数上限
pub const MAX_SHOWN_CHARS: usize = 1024;

/// 读取非负整数参数，接受 JSON 数字或数字字符串，超过 `MAX_SHOWN_CHARS` 视为非法
fn usize_param(params: &RawParams, key: &str, default: usize) -> Result<usize, ConfigError> {
    let invalid = |v: &Value| ConfigError::InvalidParam {
        key: key.to_string(),
        value: v.to_string(),
    };
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v @ Value::Number(n)) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n <= MAX_SHOWN_CHARS)
            .ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&n| n <= MAX_SHOWN_CHARS)
            .ok_or_else(|| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

fn string_param<'a>(params: &'a RawParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub struct FullValidator;

impl StrategyValidator for FullValidator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Full
    }

    fn validate(&self, _params: &RawParams) -> Result<StrategyParams, ConfigError> {
        Ok(StrategyParams::Full)
    }
}

pub struct PartialHideValidator;

impl StrategyValidator for PartialHideValidator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::PartialHide
    }

    fn validate(&self, params: &RawParams) -> Result<StrategyParams, ConfigError> {
        Ok(StrategyParams::PartialHide {
            show_prefix: usize_param(params, PARAM_SHOW_PREFIX, 3)?,
            show_suffix: usize_param(params, PARAM_SHOW_SUFFIX, 3)?,
        })
    }
}

pub struct KeepFirstLastValidator;

impl StrategyValidator for KeepFirstLastValidator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::KeepFirstLast
    }

    fn validate(&self, params: &RawParams) -> Result<StrategyParams, ConfigError> {
        Ok(StrategyParams::KeepFirstLast {
            show_prefix: usize_param(params, PARAM_SHOW_PREFIX, 1)?,
            show_suffix: usize_param(params, PARAM_SHOW_SUFFIX, 1)?,
        })
    }
}

pub struct HashSha256Validator;

impl StrategyValidator for HashSha256Validator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::HashSha256
    }

    fn validate(&self, _params: &RawParams) -> Result<StrategyParams, ConfigError> {
        Ok(StrategyParams::HashSha256)
    }
}

pub struct PatternRegexValidator;

impl PatternRegexValidator {
    pub const DEFAULT_REPLACEMENT: &'static str = "***";
}

impl StrategyValidator for PatternRegexValidator {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::PatternRegex
    }

    fn validate(&self, params: &RawParams) -> Result<StrategyParams, ConfigError> {
        let pattern = string_param(params, PARAM_PATTERN)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingParam(PARAM_PATTERN.to_string()))?;
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex(e.to_string()))?;
        let replacement = string_param(params, PARAM_REPLACEMENT)
            .unwrap_or(Self::DEFAULT_REPLACEMENT)
            .to_string();

        Ok(StrategyParams::PatternRegex {
            pattern: regex,
            replacement,
        })
    }
}

/// 策略注册表（启动后只读，通过 `Arc` 共享）
pub struct StrategyRegistry {
    validators: BTreeMap<StrategyType, Arc<dyn StrategyValidator>>,
    strategies: BTreeMap<StrategyType, Arc<dyn MaskingStrategy>>,
}

impl StrategyRegistry {
    /// 注册校验器与策略；同类型重复注册时保留第一个
    pub fn new(
        validators: Vec<Arc<dyn StrategyValidator>>,
        strategies: Vec<Arc<dyn MaskingStrategy>>,
    ) -> Result<Self, ConfigError> {
        let mut validator_map: BTreeMap<StrategyType, Arc<dyn StrategyValidator>> =
            BTreeMap::new();
        for validator in validators {
            let t = validator.strategy_type();
            if validator_map.contains_key(&t) {
                tracing::warn!(strategy = %t, "Duplicate validator registration ignored");
                continue;
            }
            validator_map.insert(t, validator);
        }

        let mut strategy_map: BTreeMap<StrategyType, Arc<dyn MaskingStrategy>> = BTreeMap::new();
        for strategy in strategies {
            let t = strategy.strategy_type();
            if strategy_map.contains_key(&t) {
                tracing::warn!(strategy = %t, "Duplicate strategy registration ignored");
                continue;
            }
            strategy_map.insert(t, strategy);
        }

        let missing_strategies = Self::missing(&strategy_map);
        if !missing_strategies.is_empty() {
            return Err(ConfigError::MissingStrategies {
                missing: missing_strategies,
                available: strategy_map.keys().copied().collect(),
            });
        }
        let missing_validators = Self::missing(&validator_map);
        if !missing_validators.is_empty() {
            return Err(ConfigError::MissingValidators {
                missing: missing_validators,
                available: validator_map.keys().copied().collect(),
            });
        }

        tracing::info!(
            strategies = strategy_map.len(),
            validators = validator_map.len(),
            "✅ Sanitization strategy registry initialized"
        );

        Ok(Self {
            validators: validator_map,
            strategies: strategy_map,
        })
    }

    /// 五种内置策略
    pub fn standard() -> Result<Self, ConfigError> {
        Self::new(
            vec![
                Arc::new(FullValidator),
                Arc::new(PartialHideValidator),
                Arc::new(KeepFirstLastValidator),
                Arc::new(HashSha256Validator),
                Arc::new(PatternRegexValidator),
            ],
            vec![
                Arc::new(FullStrategy),
                Arc::new(PartialHideStrategy),
                Arc::new(KeepFirstLastStrategy),
                Arc::new(HashSha256Strategy),
                Arc::new(PatternRegexStrategy),
            ],
        )
    }

    fn missing<T: ?Sized>(map: &BTreeMap<StrategyType, Arc<T>>) -> Vec<StrategyType> {
        StrategyType::ALL
            .iter()
            .copied()
            .filter(|t| !map.contains_key(t))
            .collect()
    }

    /// 校验并转换参数
    pub fn validate(
        &self,
        strategy: StrategyType,
        params: &RawParams,
    ) -> Result<StrategyParams, ConfigError> {
        match self.validators.get(&strategy) {
            Some(validator) => validator.validate(params),
            None => Err(ConfigError::UnknownStrategy(strategy.to_string())),
        }
    }

    /// 按策略类型分派执行
    pub fn apply(
        &self,
        strategy: StrategyType,
        value: &str,
        params: &StrategyParams,
    ) -> Result<String, StrategyError> {
        match self.strategies.get(&strategy) {
            Some(s) => s.apply(value, params),
            None => Err(StrategyError::Execution(strategy, "strategy not registered".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawParams {
        match value {
            Value::Object(map) => map,
            _ => RawParams::new(),
        }
    }

    #[test]
    fn test_standard_registry_is_complete() {
        let registry = StrategyRegistry::standard().unwrap();
        let params = registry
            .validate(StrategyType::PartialHide, &RawParams::new())
            .unwrap();
        assert!(matches!(
            params,
            StrategyParams::PartialHide {
                show_prefix: 3,
                show_suffix: 3
            }
        ));
    }

    #[test]
    fn test_missing_strategy_aborts() {
        let result = StrategyRegistry::new(
            vec![
                Arc::new(FullValidator),
                Arc::new(PartialHideValidator),
                Arc::new(KeepFirstLastValidator),
                Arc::new(HashSha256Validator),
                Arc::new(PatternRegexValidator),
            ],
            vec![Arc::new(FullStrategy), Arc::new(PartialHideStrategy)],
        );
        match result {
            Err(ConfigError::MissingStrategies { missing, .. }) => {
                assert_eq!(
                    missing,
                    vec![
                        StrategyType::KeepFirstLast,
                        StrategyType::HashSha256,
                        StrategyType::PatternRegex
                    ]
                );
            }
            _ => panic!("expected MissingStrategies"),
        }
    }

    #[test]
    fn test_missing_validator_aborts() {
        let result = StrategyRegistry::new(
            vec![Arc::new(FullValidator)],
            vec![
                Arc::new(FullStrategy),
                Arc::new(PartialHideStrategy),
                Arc::new(KeepFirstLastStrategy),
                Arc::new(HashSha256Strategy),
                Arc::new(PatternRegexStrategy),
            ],
        );
        assert!(matches!(result, Err(ConfigError::MissingValidators { .. })));
    }

    #[test]
    fn test_int_params_accept_strings() {
        let params = KeepFirstLastValidator
            .validate(&raw(json!({"show-prefix": "2", "show-suffix": 4})))
            .unwrap();
        assert!(matches!(
            params,
            StrategyParams::KeepFirstLast {
                show_prefix: 2,
                show_suffix: 4
            }
        ));
    }

    #[test]
    fn test_negative_param_rejected() {
        let err = PartialHideValidator
            .validate(&raw(json!({"show-prefix": -1})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParam { .. }));
    }

    #[test]
    fn test_oversized_show_param_rejected() {
        let err = PartialHideValidator
            .validate(&raw(json!({"show-prefix": u64::MAX})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParam { ref key, .. } if key == PARAM_SHOW_PREFIX));

        let err = KeepFirstLastValidator
            .validate(&raw(json!({"show-suffix": (MAX_SHOWN_CHARS + 1).to_string()})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParam { .. }));

        assert!(PartialHideValidator
            .validate(&raw(json!({"show-prefix": MAX_SHOWN_CHARS})))
            .is_ok());
    }

    #[test]
    fn test_regex_requires_pattern() {
        let err = PatternRegexValidator.validate(&RawParams::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParam(_)));

        let err = PatternRegexValidator
            .validate(&raw(json!({"pattern": "(unclosed"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex(_)));
    }

    #[test]
    fn test_regex_default_replacement() {
        let params = PatternRegexValidator
            .validate(&raw(json!({"pattern": "\\d+"})))
            .unwrap();
        match params {
            StrategyParams::PatternRegex { replacement, .. } => assert_eq!(replacement, "***"),
            _ => panic!("expected PatternRegex params"),
        }
    }
}
