//! 异步流水线测试：乱序合并、背压、失败隔离

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use exchange_log::{
    config::PipelineConfig,
    domain::exchange::{ExchangePhase, ExchangeRecord, PhaseState, ResponseSnapshot},
    error::{ExportError, PipelineError},
    repository::exchange_log::{ExchangeLogRepository, InMemoryExchangeLogRepository},
    service::{
        export::{DatabaseLogExporter, LogExporter, LogExporterDispatcher},
        pipeline::{AsyncLogPipeline, LogProcessor},
        sanitization::SanitizationEngine,
    },
};
use tokio::sync::{Notify, Semaphore};

fn pipeline_config(workers: usize, queue_capacity: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_capacity,
    }
}

fn engine() -> Arc<SanitizationEngine> {
    Arc::new(SanitizationEngine::new(common::sanitization_context()))
}

fn exchange(id: &str) -> (ExchangeRecord, ExchangeRecord) {
    let started = chrono::Utc::now();
    let snapshot = common::json_request(id, "/api/pay?token=abc", r#"{"password":"secret"}"#);
    let request = ExchangeRecord::for_request_at(snapshot.clone(), started);
    let mut headers = exchange_log::domain::exchange::HeaderMultimap::new();
    headers.append("Content-Type", "application/json");
    let response = ExchangeRecord::for_response(
        snapshot,
        ResponseSnapshot {
            status: 201,
            headers,
            body: Some(r#"{"token":"xyz"}"#.into()),
            truncated: false,
        },
        started,
    );
    (request, response)
}

/// 阻塞直到测试放行的导出器
struct GatedExporter {
    started: Notify,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedExporter {
    fn new() -> Self {
        Self {
            started: Notify::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    async fn wait(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl LogExporter for GatedExporter {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn export_request(&self, _record: &ExchangeRecord) -> Result<(), ExportError> {
        self.wait().await;
        Ok(())
    }

    async fn export_response(&self, _record: &ExchangeRecord) -> Result<(), ExportError> {
        self.wait().await;
        Ok(())
    }
}

/// 遇到指定 correlation_id 时 panic
struct PanickyExporter {
    poison: &'static str,
    exported: AtomicUsize,
}

#[async_trait]
impl LogExporter for PanickyExporter {
    fn name(&self) -> &'static str {
        "panicky"
    }

    async fn export_request(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        if record.correlation_id == self.poison {
            panic!("exporter blew up");
        }
        self.exported.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn export_response(&self, record: &ExchangeRecord) -> Result<(), ExportError> {
        self.export_request(record).await
    }
}

struct FailingExporter;

#[async_trait]
impl LogExporter for FailingExporter {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn export_request(&self, _record: &ExchangeRecord) -> Result<(), ExportError> {
        Err(ExportError::Storage("unavailable".into()))
    }

    async fn export_response(&self, _record: &ExchangeRecord) -> Result<(), ExportError> {
        Err(ExportError::Storage("unavailable".into()))
    }
}

#[tokio::test]
async fn test_out_of_order_phases_converge() {
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let exporter: Arc<dyn LogExporter> = Arc::new(DatabaseLogExporter::new(repo.clone()));
    let pipeline = AsyncLogPipeline::start(&pipeline_config(4, 64), engine(), exporter);

    for i in 0..20 {
        let (request, response) = exchange(&format!("ooo-{}", i));
        // 一半先提交响应
        if i % 2 == 0 {
            pipeline.process_response(response);
            pipeline.process_request(request);
        } else {
            pipeline.process_request(request);
            pipeline.process_response(response);
        }
    }
    pipeline.shutdown().await;

    assert_eq!(repo.len().await, 20);
    for i in 0..20 {
        let row = repo
            .find_by_correlation_id(&format!("ooo-{}", i))
            .await
            .unwrap()
            .unwrap();
        assert!(row.complete);
        assert_eq!(row.status_code, 201);
        assert_eq!(row.method.as_deref(), Some("POST"));
        assert_eq!(row.uri.as_deref(), Some("/api/pay?token=***"));
        assert_eq!(
            row.request_content,
            Some(serde_json::json!({"password": "******"}))
        );
        assert_eq!(
            row.response_content,
            Some(serde_json::json!({"token": "***"}))
        );
    }
    assert_eq!(pipeline.tracker().pending(), 0);
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let gated = Arc::new(GatedExporter::new());
    let pipeline = AsyncLogPipeline::start(&pipeline_config(1, 1), engine(), gated.clone());

    // 第一个任务占住唯一的 worker
    let (first, _) = exchange("bp-1");
    pipeline.process_request(first);
    gated.started.notified().await;

    // 第二个任务填满队列
    let (second, _) = exchange("bp-2");
    assert!(pipeline.submit(ExchangePhase::Request, second).is_ok());

    // 之后的提交立即被拒绝
    let (third, _) = exchange("bp-3");
    let err = pipeline.submit(ExchangePhase::Request, third).unwrap_err();
    assert!(matches!(err, PipelineError::QueueFull(1)));

    let rejected_before = exchange_log::metrics::rejected_total();
    let (fourth, _) = exchange("bp-4");
    pipeline.process_request(fourth);
    assert!(exchange_log::metrics::rejected_total() > rejected_before);

    gated.gate.add_permits(16);
    pipeline.shutdown().await;
    assert_eq!(gated.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_task_does_not_kill_worker() {
    let exporter = Arc::new(PanickyExporter {
        poison: "boom",
        exported: AtomicUsize::new(0),
    });
    let pipeline = AsyncLogPipeline::start(&pipeline_config(1, 16), engine(), exporter.clone());

    let (poisoned, _) = exchange("boom");
    pipeline.process_request(poisoned);
    let (healthy, response) = exchange("fine");
    pipeline.process_request(healthy);
    pipeline.process_response(response);
    pipeline.shutdown().await;

    assert_eq!(exporter.exported.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dispatcher_isolates_failing_exporter() {
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let dispatcher: Arc<dyn LogExporter> = Arc::new(LogExporterDispatcher::new(vec![
        Arc::new(FailingExporter),
        Arc::new(DatabaseLogExporter::new(repo.clone())),
    ]));
    let pipeline = AsyncLogPipeline::start(&pipeline_config(2, 16), engine(), dispatcher);

    let (request, response) = exchange("iso-1");
    pipeline.process_request(request);
    pipeline.process_response(response);
    pipeline.shutdown().await;

    let row = repo.find_by_correlation_id("iso-1").await.unwrap().unwrap();
    assert!(row.complete);
}

#[tokio::test]
async fn test_failed_export_does_not_advance_phase_state() {
    let dispatcher: Arc<dyn LogExporter> =
        Arc::new(LogExporterDispatcher::new(vec![Arc::new(FailingExporter)]));
    let pipeline = AsyncLogPipeline::start(&pipeline_config(1, 4), engine(), dispatcher);

    let (request, _) = exchange("down-1");
    pipeline.process_request(request);
    pipeline.shutdown().await;

    assert_eq!(pipeline.tracker().state("down-1"), Some(PhaseState::Pending));
    assert_eq!(pipeline.tracker().pending(), 1);
}

#[tokio::test]
async fn test_partial_export_failure_still_counts_as_stored() {
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let dispatcher: Arc<dyn LogExporter> = Arc::new(LogExporterDispatcher::new(vec![
        Arc::new(FailingExporter),
        Arc::new(DatabaseLogExporter::new(repo.clone())),
    ]));
    let pipeline = AsyncLogPipeline::start(&pipeline_config(1, 4), engine(), dispatcher);

    let (request, _) = exchange("half-1");
    pipeline.process_request(request);
    pipeline.shutdown().await;

    assert_eq!(
        pipeline.tracker().state("half-1"),
        Some(PhaseState::RequestStored)
    );
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let pipeline = AsyncLogPipeline::start(
        &pipeline_config(1, 4),
        engine(),
        Arc::new(DatabaseLogExporter::new(repo.clone())),
    );
    pipeline.shutdown().await;

    let (request, _) = exchange("late");
    let err = pipeline.submit(ExchangePhase::Request, request).unwrap_err();
    assert!(matches!(err, PipelineError::Closed));
    // 关闭后的提交只记录告警
    let (request, _) = exchange("late-2");
    pipeline.process_request(request);
    assert!(repo.is_empty().await);
}

#[tokio::test]
async fn test_disabled_sanitization_still_exports() {
    let mut config = common::sanitization_config();
    config.global.enable = false;
    let registry = Arc::new(exchange_log::service::sanitization::StrategyRegistry::standard().unwrap());
    let context = Arc::new(
        exchange_log::service::sanitization::SanitizationContext::build(&config, registry).unwrap(),
    );
    let repo = Arc::new(InMemoryExchangeLogRepository::new());
    let pipeline = AsyncLogPipeline::start(
        &pipeline_config(1, 4),
        Arc::new(SanitizationEngine::new(context)),
        Arc::new(DatabaseLogExporter::new(repo.clone())),
    );

    let (request, _) = exchange("plain");
    pipeline.process_request(request);
    pipeline.shutdown().await;

    let row = repo.find_by_correlation_id("plain").await.unwrap().unwrap();
    assert_eq!(row.uri.as_deref(), Some("/api/pay?token=abc"));
    assert_eq!(
        row.request_content,
        Some(serde_json::json!({"password": "secret"}))
    );
}
