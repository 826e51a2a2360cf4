//! exchange-log 主入口
//! HTTP 交换日志采集服务

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use exchange_log::{api, app_state::AppState, config::Config, infrastructure::logging};

#[tokio::main]
async fn main() -> Result<()> {
    // ✅ 1. 加载环境变量
    dotenvy::dotenv().ok();

    // ✅ 2. 加载配置（CONFIG_PATH 指向的 TOML 文件优先，其余取环境变量默认值）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate().context("Invalid configuration")?;

    // ✅ 3. 初始化日志（guard 需持有到进程退出）
    let _log_guard = logging::init_logging(&config.logging)?;
    tracing::info!(
        config_path = config_path.as_deref().unwrap_or("<env>"),
        fields = config.sanitization.fields.len(),
        "🚀 Starting exchange-log"
    );

    // ✅ 4. 构建状态：策略注册表、脱敏上下文、存储、导出器、流水线
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()).await?);

    // ✅ 5. 启动 HTTP 服务
    let app = api::routes(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    tracing::info!("✅ Listening on {}", config.server.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // ✅ 6. 排空流水线
    state.pipeline.shutdown().await;
    if let Some(pool) = &state.pool {
        pool.close().await;
    }
    tracing::info!("👋 exchange-log stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
