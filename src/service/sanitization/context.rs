//! 脱敏上下文
//!
//! 启动时一次性构建，之后只读，通过 `Arc` 在各 worker 间无锁共享。

use std::collections::HashMap;
use std::sync::Arc;

use super::compiler::{BodyRule, CompiledRules, RuleCompiler, SanitizationRule};
use super::registry::StrategyRegistry;
use crate::config::{GlobalConfig, SanitizationConfig};
use crate::error::ConfigError;

pub struct SanitizationContext {
    global: GlobalConfig,
    registry: Arc<StrategyRegistry>,
    fields: Vec<Arc<SanitizationRule>>,
    field_index: HashMap<String, usize>,
    body: Vec<BodyRule>,
    headers: HashMap<String, Arc<SanitizationRule>>,
    query: HashMap<String, Arc<SanitizationRule>>,
}

impl SanitizationContext {
    pub fn build(
        config: &SanitizationConfig,
        registry: Arc<StrategyRegistry>,
    ) -> Result<Self, ConfigError> {
        let CompiledRules {
            fields,
            body,
            headers,
            query,
        } = RuleCompiler::new(&registry).compile(config)?;

        let field_index = fields
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.field.clone(), i))
            .collect();

        if !config.global.enable {
            tracing::warn!("Sanitization is globally disabled, exchange logs are exported unmasked");
        }

        Ok(Self {
            global: config.global.clone(),
            registry,
            fields,
            field_index,
            body,
            headers,
            query,
        })
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn is_enabled(&self) -> bool {
        self.global.enable
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn body_rules(&self) -> &[BodyRule] {
        &self.body
    }

    /// 大小写不敏感
    pub fn header_rule(&self, name: &str) -> Option<&Arc<SanitizationRule>> {
        self.headers.get(&name.to_lowercase())
    }

    /// 大小写不敏感
    pub fn query_rule(&self, name: &str) -> Option<&Arc<SanitizationRule>> {
        self.query.get(&name.to_lowercase())
    }

    pub fn has_header_rules(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn has_query_rules(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Arc<SanitizationRule>> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    /// 按声明顺序返回第一个包含该别名的字段
    pub fn find_by_alias(&self, alias: &str) -> Option<&Arc<SanitizationRule>> {
        self.fields
            .iter()
            .find(|rule| rule.aliases.iter().any(|a| a == alias))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_index.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|rule| rule.field.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldDefinition, FieldTable};

    fn context() -> SanitizationContext {
        let mut fields = FieldTable::new();
        fields.insert(
            "authorization",
            FieldDefinition {
                aliases: vec!["header.Authorization".into()],
                strategy: "KEEP_FIRST_LAST".into(),
                replacement: None,
                params: Default::default(),
            },
        );
        fields.insert(
            "token",
            FieldDefinition {
                aliases: vec![],
                strategy: "FULL".into(),
                replacement: Some("[hidden]".into()),
                params: Default::default(),
            },
        );
        let config = SanitizationConfig {
            fields,
            ..Default::default()
        };
        SanitizationContext::build(&config, Arc::new(StrategyRegistry::standard().unwrap()))
            .unwrap()
    }

    #[test]
    fn test_lookups() {
        let ctx = context();
        assert!(ctx.has_field("token"));
        assert!(!ctx.has_field("password"));
        assert_eq!(ctx.field_names().collect::<Vec<_>>(), vec!["authorization", "token"]);
        assert_eq!(ctx.header_rule("AUTHORIZATION").map(|r| r.field.as_str()), Some("authorization"));
        assert_eq!(ctx.query_rule("Token").map(|r| r.field.as_str()), Some("token"));
        assert_eq!(
            ctx.find_by_alias("header.token").map(|r| r.field.as_str()),
            Some("token")
        );
    }

    #[test]
    fn test_replacement_falls_back_to_global() {
        let ctx = context();
        assert_eq!(ctx.field("authorization").unwrap().replacement, "***");
        assert_eq!(ctx.field("token").unwrap().replacement, "[hidden]");
    }
}
