use std::sync::Arc;

use crate::{
    config::Config,
    infrastructure::db::{self, PgPool},
    repository::exchange_log::{
        ExchangeLogRepository, InMemoryExchangeLogRepository, PgExchangeLogRepository,
    },
    service::{
        export::{DatabaseLogExporter, FileLogExporter, LogExporter, LogExporterDispatcher},
        pipeline::{AsyncLogPipeline, LogProcessor},
        sanitization::{SanitizationContext, SanitizationEngine, StrategyRegistry},
    },
};

/// 应用状态
/// 包含所有共享资源
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// 未配置数据库时为 None（使用内存存储）
    pub pool: Option<PgPool>,
    pub repository: Arc<dyn ExchangeLogRepository>,
    pub sanitization: Arc<SanitizationContext>,
    pub pipeline: Arc<AsyncLogPipeline>,
}

impl AppState {
    /// 创建新的应用状态：连接数据库（如已配置）并建表
    pub async fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let (pool, repository): (Option<PgPool>, Arc<dyn ExchangeLogRepository>) =
            match config.database.url {
                Some(_) => {
                    let pool = db::init_pool(&config.database).await?;
                    let repo = PgExchangeLogRepository::new(pool.clone());
                    repo.migrate().await?;
                    (Some(pool), Arc::new(repo))
                }
                None => {
                    tracing::warn!("DATABASE_URL not set, exchange logs are kept in memory");
                    (None, Arc::new(InMemoryExchangeLogRepository::new()))
                }
            };

        Self::with_repository(config, pool, repository)
    }

    /// 使用给定的存储构建状态（需在 Tokio 运行时内调用）
    pub fn with_repository(
        config: Arc<Config>,
        pool: Option<PgPool>,
        repository: Arc<dyn ExchangeLogRepository>,
    ) -> anyhow::Result<Self> {
        // 注册表与上下文在启动时一次性构建，配置错误直接中止启动
        let registry = Arc::new(StrategyRegistry::standard()?);
        let sanitization = Arc::new(SanitizationContext::build(&config.sanitization, registry)?);
        let engine = Arc::new(SanitizationEngine::new(sanitization.clone()));

        let mut exporters: Vec<Arc<dyn LogExporter>> = Vec::new();
        if config.export.database_enabled {
            exporters.push(Arc::new(DatabaseLogExporter::new(repository.clone())));
        }
        if config.export.file_enabled {
            exporters.push(Arc::new(FileLogExporter::from_config(
                config.export.file_path.as_deref(),
            )));
        }
        let dispatcher: Arc<dyn LogExporter> = Arc::new(LogExporterDispatcher::new(exporters));

        let pipeline = Arc::new(AsyncLogPipeline::start(&config.pipeline, engine, dispatcher));

        Ok(Self {
            config,
            pool,
            repository,
            sanitization,
            pipeline,
        })
    }

    pub fn processor(&self) -> Arc<dyn LogProcessor> {
        self.pipeline.clone()
    }
}
