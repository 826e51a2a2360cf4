//! 脱敏策略
//!
//! 五种内置策略，均按字符（而非字节）计算长度。
//! 空白值一律原样返回。

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, StrategyError};

/// FULL 策略最多输出的掩码字符数
pub const FULL_MASK_CAP: usize = 100;

/// 策略类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    Full,
    PartialHide,
    KeepFirstLast,
    #[serde(rename = "HASH_SHA256")]
    HashSha256,
    PatternRegex,
}

impl StrategyType {
    pub const ALL: [StrategyType; 5] = [
        StrategyType::Full,
        StrategyType::PartialHide,
        StrategyType::KeepFirstLast,
        StrategyType::HashSha256,
        StrategyType::PatternRegex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Full => "FULL",
            StrategyType::PartialHide => "PARTIAL_HIDE",
            StrategyType::KeepFirstLast => "KEEP_FIRST_LAST",
            StrategyType::HashSha256 => "HASH_SHA256",
            StrategyType::PatternRegex => "PATTERN_REGEX",
        }
    }

    /// 大小写不敏感解析，未知名称为配置错误
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 经过校验的策略参数
#[derive(Debug, Clone)]
pub enum StrategyParams {
    Full,
    PartialHide { show_prefix: usize, show_suffix: usize },
    KeepFirstLast { show_prefix: usize, show_suffix: usize },
    HashSha256,
    PatternRegex { pattern: Regex, replacement: String },
}

impl StrategyParams {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyParams::Full => StrategyType::Full,
            StrategyParams::PartialHide { .. } => StrategyType::PartialHide,
            StrategyParams::KeepFirstLast { .. } => StrategyType::KeepFirstLast,
            StrategyParams::HashSha256 => StrategyType::HashSha256,
            StrategyParams::PatternRegex { .. } => StrategyType::PatternRegex,
        }
    }
}

/// 掩码策略
pub trait MaskingStrategy: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError>;
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn mismatch(strategy: StrategyType, params: &StrategyParams) -> StrategyError {
    StrategyError::ParamsMismatch {
        strategy,
        expected: strategy,
        actual: params.strategy_type(),
    }
}

/// 保留前 prefix 个和后 suffix 个字符，中间替换为 `*`
fn mask_middle(chars: &[char], prefix: usize, suffix: usize) -> String {
    let len = chars.len();
    let start = prefix.min(len);
    let end = len.saturating_sub(suffix).max(start);
    let mut out = String::with_capacity(len);
    out.extend(&chars[..start]);
    out.extend(std::iter::repeat('*').take(end - start));
    out.extend(&chars[end..]);
    out
}

/// 全部掩码，上限 100 个 `*`
pub struct FullStrategy;

impl MaskingStrategy for FullStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Full
    }

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError> {
        if !matches!(params, StrategyParams::Full) {
            return Err(mismatch(StrategyType::Full, params));
        }
        if is_blank(value) {
            return Ok(value.to_string());
        }
        Ok("*".repeat(value.chars().count().min(FULL_MASK_CAP)))
    }
}

/// 部分隐藏：长度不足以保留前后缀时全部掩码
pub struct PartialHideStrategy;

impl MaskingStrategy for PartialHideStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::PartialHide
    }

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError> {
        let StrategyParams::PartialHide {
            show_prefix,
            show_suffix,
        } = params
        else {
            return Err(mismatch(StrategyType::PartialHide, params));
        };
        if is_blank(value) {
            return Ok(value.to_string());
        }

        let chars: Vec<char> = value.chars().collect();
        if show_prefix.saturating_add(*show_suffix) >= chars.len() {
            return Ok("*".repeat(chars.len()));
        }
        Ok(mask_middle(&chars, *show_prefix, *show_suffix))
    }
}

/// 保留首尾：长度不足时原样返回
pub struct KeepFirstLastStrategy;

impl MaskingStrategy for KeepFirstLastStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::KeepFirstLast
    }

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError> {
        let StrategyParams::KeepFirstLast {
            show_prefix,
            show_suffix,
        } = params
        else {
            return Err(mismatch(StrategyType::KeepFirstLast, params));
        };
        if is_blank(value) {
            return Ok(value.to_string());
        }

        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= show_prefix.saturating_add(*show_suffix) {
            return Ok(value.to_string());
        }
        Ok(mask_middle(&chars, *show_prefix, *show_suffix))
    }
}

/// SHA-256 小写十六进制摘要
pub struct HashSha256Strategy;

impl HashSha256Strategy {
    /// 摘要失败时的占位输出
    pub const FAILURE_PLACEHOLDER: &'static str =
        "****************************************************************";

    fn digest(value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl MaskingStrategy for HashSha256Strategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::HashSha256
    }

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError> {
        if !matches!(params, StrategyParams::HashSha256) {
            return Err(mismatch(StrategyType::HashSha256, params));
        }
        if is_blank(value) {
            return Ok(value.to_string());
        }
        let hashed = Self::digest(value);
        if hashed.len() != 64 {
            tracing::error!(len = hashed.len(), "SHA-256 digest has unexpected length");
            return Ok(Self::FAILURE_PLACEHOLDER.to_string());
        }
        Ok(hashed)
    }
}

/// 正则替换：替换所有匹配，替换文本支持 `$1` / `${name}` 分组引用
pub struct PatternRegexStrategy;

impl MaskingStrategy for PatternRegexStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::PatternRegex
    }

    fn apply(&self, value: &str, params: &StrategyParams) -> Result<String, StrategyError> {
        let StrategyParams::PatternRegex {
            pattern,
            replacement,
        } = params
        else {
            return Err(mismatch(StrategyType::PatternRegex, params));
        };
        if is_blank(value) {
            return Ok(value.to_string());
        }
        if pattern.as_str().is_empty() {
            tracing::warn!("Empty pattern for PATTERN_REGEX strategy, masking whole value");
            return Ok("*".repeat(value.chars().count()));
        }
        Ok(pattern
            .replace_all(value, replacement.as_str())
            .into_owned())
    }
}
