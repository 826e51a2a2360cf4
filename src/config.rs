//! 配置管理模块
//! 支持从环境变量和配置文件加载配置，启动后只读（不支持热更新）

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::service::sanitization::registry::RawParams;

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub sanitization: SanitizationConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// 捕获请求/响应体的最大字节数，超出部分截断
    pub max_body_bytes: usize,
    /// 中间件缓冲请求/响应体的硬上限；声明长度超过上限的请求返回 413，响应不缓冲直接透传
    pub max_buffered_body_bytes: usize,
}

/// 数据库配置；未配置 url 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 异步流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

/// 导出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub database_enabled: bool,
    pub file_enabled: bool,
    /// 追加写入的 JSON Lines 文件；为空时走 tracing 输出
    pub file_path: Option<String>,
}

/// 脱敏配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizationConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    /// 字段定义（保持配置文件中的顺序）
    #[serde(default)]
    pub fields: FieldTable,
    /// 策略名 → 默认参数
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyDefaults>,
}

/// 全局脱敏开关
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GlobalConfig {
    pub enable: bool,
    pub replacement: String,
    pub enable_wildcard_paths: bool,
}

/// 单个脱敏字段定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub strategy: String,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub params: RawParams,
}

/// 策略默认参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyDefaults {
    #[serde(default)]
    pub params: RawParams,
}

/// 有序字段表：按配置文件中的声明顺序迭代
#[derive(Debug, Clone, Default)]
pub struct FieldTable(Vec<(String, FieldDefinition)>);

impl FieldTable {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 同名字段后声明者覆盖先声明者，位置不变
    pub fn insert(&mut self, name: impl Into<String>, field: FieldDefinition) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = field,
            None => self.0.push((name, field)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.0.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for FieldTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, field) in &self.0 {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldTableVisitor;

        impl<'de> Visitor<'de> for FieldTableVisitor {
            type Value = FieldTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of sanitization field definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldTable, A::Error> {
                let mut table = FieldTable::new();
                while let Some((name, field)) = access.next_entry::<String, FieldDefinition>()? {
                    table.insert(name, field);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(FieldTableVisitor)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".into()),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 64 * 1024),
            max_buffered_body_bytes: env_parse("MAX_BUFFERED_BODY_BYTES", 10 * 1024 * 1024),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            max_connections: env_parse("DB_MAX_CONNS", 16),
            min_connections: env_parse("DB_MIN_CONNS", 2),
            acquire_timeout_secs: env_parse("DB_ACQ_TIMEOUT_SECS", 5),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS", 300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: env_flag("LOG_FILE_ENABLED", false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: env_parse("PIPELINE_WORKERS", 4),
            queue_capacity: env_parse("PIPELINE_QUEUE_CAPACITY", 1024),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            database_enabled: env_flag("EXPORT_DATABASE_ENABLED", true),
            file_enabled: env_flag("EXPORT_FILE_ENABLED", true),
            file_path: std::env::var("EXPORT_FILE_PATH").ok(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enable: true,
            replacement: "***".into(),
            enable_wildcard_paths: true,
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self::default())
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 配置文件存在时以文件为准，缺省段落回落到环境变量默认值
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path),
            _ => Self::from_env(),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.database.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            anyhow::bail!("pipeline.queue_capacity must be at least 1");
        }
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be at least 1");
        }
        if self.server.max_buffered_body_bytes < self.server.max_body_bytes {
            anyhow::bail!("server.max_buffered_body_bytes must not be less than server.max_body_bytes");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = Config::from_env().unwrap();
        assert!(config.sanitization.global.enable);
        assert_eq!(config.sanitization.global.replacement, "***");
        assert!(config.sanitization.fields.is_empty());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_addr = "0.0.0.0:9090"
max_body_bytes = 1024

[pipeline]
workers = 2
queue_capacity = 16

[sanitization.global]
enable = true
enable-wildcard-paths = false

[sanitization.strategies.PARTIAL_HIDE.params]
show-prefix = 2
show-suffix = 2

[sanitization.fields.token]
strategy = "FULL"

[sanitization.fields.cardNo]
aliases = ["$.payment.cardNo"]
strategy = "PARTIAL_HIDE"
params = {{ show-suffix = 4 }}

[sanitization.fields.authorization]
aliases = ["header.Authorization"]
strategy = "KEEP_FIRST_LAST"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:9090");
        assert_eq!(config.pipeline.workers, 2);
        assert!(!config.sanitization.global.enable_wildcard_paths);

        let names: Vec<&str> = config.sanitization.fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["token", "cardNo", "authorization"]);

        let defaults = &config.sanitization.strategies["PARTIAL_HIDE"];
        assert_eq!(defaults.params["show-prefix"], serde_json::json!(2));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::from_env().unwrap();
        config.database.url = None;
        config.logging.level = "info".into();
        config.logging.format = "text".into();
        assert!(config.validate().is_ok());

        config.pipeline.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_database_url_rejected() {
        let mut config = Config::default();
        config.logging.level = "info".into();
        config.logging.format = "json".into();
        config.database.url = Some("mysql://localhost/db".into());
        assert!(config.validate().is_err());
    }
}
