//! 测试辅助模块
//! 提供测试配置与内存存储版应用状态

#![allow(dead_code)]

use std::sync::Arc;

use exchange_log::{
    app_state::AppState,
    config::{Config, SanitizationConfig},
    domain::exchange::{HeaderMultimap, RequestSnapshot},
    repository::exchange_log::InMemoryExchangeLogRepository,
    service::sanitization::{SanitizationContext, StrategyRegistry},
};

/// 测试用脱敏配置
pub const SANITIZATION_TOML: &str = r#"
[global]
enable = true
enable-wildcard-paths = true

[strategies.PARTIAL_HIDE.params]
show-prefix = 3
show-suffix = 4

[fields.token]
strategy = "FULL"

[fields.password]
strategy = "FULL"

[fields.cardNo]
aliases = ["$.payment.cardNo"]
strategy = "PARTIAL_HIDE"

[fields.authorization]
aliases = ["header.Authorization"]
strategy = "KEEP_FIRST_LAST"
params = { show-prefix = 2, show-suffix = 2 }

[fields.email]
aliases = ["$.user.email"]
strategy = "HASH_SHA256"

[fields.mobile]
aliases = ["query.mobile", "$.contact.mobile"]
strategy = "PATTERN_REGEX"
params = { pattern = '(\d{3})\d{4}(\d{4})', replacement = "$1****$2" }
"#;

pub fn sanitization_config() -> SanitizationConfig {
    toml::from_str(SANITIZATION_TOML).expect("test sanitization config must parse")
}

pub fn sanitization_context() -> Arc<SanitizationContext> {
    let registry = Arc::new(StrategyRegistry::standard().expect("registry"));
    Arc::new(SanitizationContext::build(&sanitization_config(), registry).expect("context"))
}

/// 无数据库、只导出到内存存储的配置
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = None;
    config.export.database_enabled = true;
    config.export.file_enabled = false;
    config.pipeline.workers = 2;
    config.pipeline.queue_capacity = 64;
    config.server.max_body_bytes = 1024;
    config.sanitization = sanitization_config();
    config
}

/// 创建测试应用状态（需在 Tokio 运行时内调用）
pub fn create_test_app_state(config: Config) -> (Arc<AppState>, Arc<InMemoryExchangeLogRepository>) {
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let state = AppState::with_repository(Arc::new(config), None, repo.clone())
        .expect("Failed to build test app state");
    (Arc::new(state), repo)
}

pub fn json_request(id: &str, uri: &str, body: &str) -> RequestSnapshot {
    let mut headers = HeaderMultimap::new();
    headers.append("Content-Type", "application/json");
    headers.append("Authorization", "Bearer abcdef123456");
    RequestSnapshot {
        correlation_id: id.to_string(),
        method: "POST".into(),
        uri: uri.to_string(),
        remote: Some("127.0.0.1".into()),
        headers,
        body: Some(body.to_string()),
        content_type: Some("application/json".into()),
        truncated: false,
    }
}
