//! 规则编译器
//!
//! 将声明式字段配置编译为三张索引：Body（JSONPath）、Header、Query。
//! 任一字段非法即中止启动，错误信息携带字段名。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use super::registry::{RawParams, StrategyRegistry, PARAM_REPLACEMENT};
use super::strategy::{StrategyParams, StrategyType};
use crate::config::{FieldDefinition, SanitizationConfig};
use crate::error::ConfigError;
use crate::infrastructure::json_path::JsonPath;

pub const HEADER_PREFIX: &str = "header.";
pub const QUERY_PREFIX: &str = "query.";
pub const BODY_PREFIX: &str = "$";

/// 已校验的脱敏规则
#[derive(Debug)]
pub struct SanitizationRule {
    pub field: String,
    /// 标准化后的别名（有序、去重）
    pub aliases: Vec<String>,
    pub strategy: StrategyType,
    /// 字段级替换文本，未配置时取全局值；作为 PATTERN_REGEX 的默认替换串
    pub replacement: String,
    pub params: StrategyParams,
}

/// Body 索引项：JSONPath → 规则
#[derive(Debug, Clone)]
pub struct BodyRule {
    pub path: JsonPath,
    pub rule: Arc<SanitizationRule>,
    /// 由 `$.a.b` 自动派生的 `$..b`
    pub auto_registered: bool,
}

/// 编译结果
#[derive(Debug, Default)]
pub struct CompiledRules {
    pub fields: Vec<Arc<SanitizationRule>>,
    pub body: Vec<BodyRule>,
    pub headers: HashMap<String, Arc<SanitizationRule>>,
    pub query: HashMap<String, Arc<SanitizationRule>>,
}

/// 别名标准化：别名 ∪ 字段名，去重保序；无前缀名称展开为三种作用域
pub fn normalize_aliases(field: &str, aliases: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |alias: String| {
        if !out.contains(&alias) {
            out.push(alias);
        }
    };

    for source in aliases.iter().map(String::as_str).chain(std::iter::once(field)) {
        let source = source.trim();
        if source.is_empty() {
            continue;
        }
        if source.starts_with(BODY_PREFIX)
            || source.starts_with(HEADER_PREFIX)
            || source.starts_with(QUERY_PREFIX)
        {
            push(source.to_string());
        } else {
            push(format!("$.{source}"));
            push(format!("{HEADER_PREFIX}{source}"));
            push(format!("{QUERY_PREFIX}{source}"));
        }
    }
    out
}

/// 合并参数：字段参数覆盖策略默认参数
pub fn merge_params(defaults: Option<&RawParams>, field: &RawParams) -> RawParams {
    let mut merged = defaults.cloned().unwrap_or_default();
    for (k, v) in field {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

pub struct RuleCompiler<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> RuleCompiler<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, config: &SanitizationConfig) -> Result<CompiledRules, ConfigError> {
        let defaults = Self::strategy_defaults(config)?;

        let mut compiled = CompiledRules::default();
        let mut compiled_paths: Vec<(JsonPath, Arc<SanitizationRule>)> = Vec::new();

        for (name, field) in config.fields.iter() {
            let (rule, paths) = self
                .compile_field(name, field, &defaults, &config.global.replacement)
                .map_err(|e| ConfigError::for_field(name, e))?;
            let rule = Arc::new(rule);

            for path in paths {
                compiled_paths.push((path, rule.clone()));
            }
            for alias in &rule.aliases {
                if let Some(header) = alias.strip_prefix(HEADER_PREFIX) {
                    Self::register(&mut compiled.headers, header.to_lowercase(), &rule, "header");
                } else if let Some(param) = alias.strip_prefix(QUERY_PREFIX) {
                    Self::register(&mut compiled.query, param.to_lowercase(), &rule, "query");
                }
            }
            compiled.fields.push(rule);
        }

        compiled.body = Self::build_body_index(compiled_paths, config.global.enable_wildcard_paths);

        tracing::info!(
            fields = compiled.fields.len(),
            body_rules = compiled.body.len(),
            header_rules = compiled.headers.len(),
            query_rules = compiled.query.len(),
            "✅ Sanitization rules compiled"
        );
        Ok(compiled)
    }

    fn strategy_defaults(
        config: &SanitizationConfig,
    ) -> Result<BTreeMap<StrategyType, RawParams>, ConfigError> {
        config
            .strategies
            .iter()
            .map(|(name, defaults)| Ok((StrategyType::parse(name)?, defaults.params.clone())))
            .collect()
    }

    fn compile_field(
        &self,
        name: &str,
        field: &FieldDefinition,
        defaults: &BTreeMap<StrategyType, RawParams>,
        global_replacement: &str,
    ) -> Result<(SanitizationRule, Vec<JsonPath>), ConfigError> {
        let strategy = StrategyType::parse(&field.strategy)?;
        let aliases = normalize_aliases(name, &field.aliases);

        let mut paths = Vec::new();
        for alias in &aliases {
            if alias.starts_with(BODY_PREFIX) {
                paths.push(JsonPath::compile(alias)?);
            } else {
                let bare = alias
                    .strip_prefix(HEADER_PREFIX)
                    .or_else(|| alias.strip_prefix(QUERY_PREFIX))
                    .unwrap_or_default();
                if bare.trim().is_empty() {
                    return Err(ConfigError::InvalidAlias(alias.clone()));
                }
            }
        }

        let replacement = field
            .replacement
            .clone()
            .unwrap_or_else(|| global_replacement.to_string());
        // 未显式配置 replacement 参数时取字段级或全局替换文本
        let mut merged = merge_params(defaults.get(&strategy), &field.params);
        merged
            .entry(PARAM_REPLACEMENT)
            .or_insert_with(|| Value::String(replacement.clone()));
        let params = self.registry.validate(strategy, &merged)?;

        let rule = SanitizationRule {
            field: name.to_string(),
            aliases,
            strategy,
            replacement,
            params,
        };
        Ok((rule, paths))
    }

    fn register(
        index: &mut HashMap<String, Arc<SanitizationRule>>,
        key: String,
        rule: &Arc<SanitizationRule>,
        surface: &str,
    ) {
        match index.get(&key) {
            Some(owner) if owner.field != rule.field => {
                tracing::warn!(
                    surface,
                    key = %key,
                    owner = %owner.field,
                    ignored = %rule.field,
                    "Duplicate sanitization alias, keeping first owner"
                );
            }
            Some(_) => {}
            None => {
                index.insert(key, rule.clone());
            }
        }
    }

    /// 显式路径先注册，再派生递归路径；同一路径只保留第一个拥有者
    fn build_body_index(
        paths: Vec<(JsonPath, Arc<SanitizationRule>)>,
        enable_wildcard_paths: bool,
    ) -> Vec<BodyRule> {
        let mut body: Vec<BodyRule> = Vec::new();
        let owned = |body: &[BodyRule], path: &str| body.iter().any(|r| r.path.as_str() == path);

        for (path, rule) in &paths {
            if owned(&body, path.as_str()) {
                tracing::warn!(path = %path, ignored = %rule.field, "Duplicate JSON path, keeping first owner");
                continue;
            }
            body.push(BodyRule {
                path: path.clone(),
                rule: rule.clone(),
                auto_registered: false,
            });
        }

        if !enable_wildcard_paths {
            return body;
        }

        for (path, rule) in &paths {
            if !path.is_definite() {
                continue;
            }
            let Some(leaf) = path.leaf_name() else {
                continue;
            };
            let recursive = format!("$..{leaf}");
            if owned(&body, &recursive) {
                continue;
            }
            match JsonPath::compile(&recursive) {
                Ok(compiled) => body.push(BodyRule {
                    path: compiled,
                    rule: rule.clone(),
                    auto_registered: true,
                }),
                Err(e) => {
                    tracing::debug!(path = %recursive, error = %e, "Skipping recursive path")
                }
            }
        }
        body
    }
}
