//! 日志系统配置模块
//! 支持结构化日志、日志级别配置和按天滚动的日志文件

use std::path::Path;

use anyhow::Result;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_FILE: &str = "exchange-log.log";

/// 初始化日志系统
///
/// 启用文件日志时返回后台写线程的 guard，调用方需持有到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // 设置日志级别过滤器
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        init_json_logging(filter, config)
    } else {
        init_text_logging(filter, config)
    }
}

/// 解析日志目录与文件名前缀
fn log_target(config: &LoggingConfig) -> (&Path, &str) {
    let path = config.log_file_path.as_deref().map(Path::new);
    let dir = path
        .and_then(|p| p.parent())
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR));
    let file = path
        .and_then(|p| p.file_name())
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file)
}

/// 初始化JSON格式日志（结构化日志）
fn init_json_logging(filter: EnvFilter, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    if config.enable_file_logging {
        let (log_dir, file_name) = log_target(config);
        std::fs::create_dir_all(log_dir)?;

        let file_appender = rolling::daily(log_dir, file_name);
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .json()
            .with_writer(non_blocking_appender)
            .with_timer(ChronoUtc::rfc_3339());
        let stdout_layer = fmt::layer().json().with_timer(ChronoUtc::rfc_3339());

        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()?;
        Ok(Some(guard))
    } else {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
            .try_init()?;
        Ok(None)
    }
}

/// 初始化文本格式日志
fn init_text_logging(filter: EnvFilter, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    if config.enable_file_logging {
        let (log_dir, file_name) = log_target(config);
        std::fs::create_dir_all(log_dir)?;

        let file_appender = rolling::daily(log_dir, file_name);
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false);
        let stdout_layer = fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true);

        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()?;
        Ok(Some(guard))
    } else {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true),
            )
            .try_init()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: Option<&str>) -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
            enable_file_logging: true,
            log_file_path: path.map(str::to_string),
        }
    }

    #[test]
    fn test_log_target_from_path() {
        let cfg = config(Some("/var/log/gateway/exchange.log"));
        let (dir, file) = log_target(&cfg);
        assert_eq!(dir, Path::new("/var/log/gateway"));
        assert_eq!(file, "exchange.log");
    }

    #[test]
    fn test_log_target_defaults() {
        let cfg = config(None);
        let (dir, file) = log_target(&cfg);
        assert_eq!(dir, Path::new(DEFAULT_LOG_DIR));
        assert_eq!(file, DEFAULT_LOG_FILE);

        let cfg = config(Some("exchange.log"));
        let (dir, file) = log_target(&cfg);
        assert_eq!(dir, Path::new(DEFAULT_LOG_DIR));
        assert_eq!(file, "exchange.log");
    }
}
