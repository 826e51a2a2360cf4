//! 异步日志流水线
//!
//! 捕获层通过 [`LogProcessor`] 提交记录后立即返回；固定数量的 worker
//! 从有界队列取出任务，先按阶段脱敏，再交给导出分发器。
//! 队列满时直接丢弃任务（记录告警与指标），调用方永不阻塞。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::domain::exchange::{ExchangePhase, ExchangeRecord, PhaseState};
use crate::error::PipelineError;
use crate::service::export::LogExporter;
use crate::service::sanitization::SanitizationEngine;

/// 日志处理入口：同步、非阻塞、不返回错误
pub trait LogProcessor: Send + Sync {
    fn process_request(&self, record: ExchangeRecord);

    fn process_response(&self, record: ExchangeRecord);
}

struct LogJob {
    phase: ExchangePhase,
    record: ExchangeRecord,
}

// ============ 阶段跟踪 ============

struct TrackedExchange {
    state: PhaseState,
    request_settled: bool,
    response_settled: bool,
}

/// 按 correlation_id 跟踪两个阶段的落库状态
///
/// 两个阶段都已处理（成功、失败或被丢弃）后条目被移除。
#[derive(Default)]
pub struct PhaseTracker {
    entries: Mutex<HashMap<String, TrackedExchange>>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedExchange>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 记录某个阶段已处理完毕；`stored` 为 false 表示该阶段未能落库
    pub fn settle(&self, correlation_id: &str, phase: ExchangePhase, stored: bool) -> PhaseState {
        let mut entries = self.lock();
        let entry = entries
            .entry(correlation_id.to_string())
            .or_insert(TrackedExchange {
                state: PhaseState::Pending,
                request_settled: false,
                response_settled: false,
            });

        if stored {
            entry.state = entry.state.advance(phase);
        }
        match phase {
            ExchangePhase::Request => entry.request_settled = true,
            ExchangePhase::Response => entry.response_settled = true,
        }

        let state = entry.state;
        if entry.request_settled && entry.response_settled {
            entries.remove(correlation_id);
        }
        state
    }

    pub fn state(&self, correlation_id: &str) -> Option<PhaseState> {
        self.lock().get(correlation_id).map(|e| e.state)
    }

    /// 尚未完成（无响应落库）的交换数量
    pub fn pending(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| e.state != PhaseState::Complete)
            .count()
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

// ============ 流水线 ============

struct Worker {
    engine: Arc<SanitizationEngine>,
    exporter: Arc<dyn LogExporter>,
    tracker: Arc<PhaseTracker>,
}

impl Worker {
    async fn run(&self, job: LogJob) -> bool {
        let LogJob { phase, mut record } = job;
        self.engine.sanitize(phase, &mut record);
        match self.exporter.export(phase, &record).await {
            Ok(()) => {
                let state = self.tracker.settle(&record.correlation_id, phase, true);
                tracing::debug!(
                    correlation_id = %record.correlation_id,
                    phase = phase.as_str(),
                    state = ?state,
                    "Exchange log exported"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    correlation_id = %record.correlation_id,
                    phase = phase.as_str(),
                    error = %e,
                    "Exchange log export failed"
                );
                self.tracker.settle(&record.correlation_id, phase, false);
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct AsyncLogPipeline {
    sender: Mutex<Option<mpsc::Sender<LogJob>>>,
    capacity: usize,
    tracker: Arc<PhaseTracker>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncLogPipeline {
    /// 创建队列并启动 worker（需在 Tokio 运行时内调用）
    pub fn start(
        config: &PipelineConfig,
        engine: Arc<SanitizationEngine>,
        exporter: Arc<dyn LogExporter>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<LogJob>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let tracker = Arc::new(PhaseTracker::new());
        let worker = Arc::new(Worker {
            engine,
            exporter,
            tracker: tracker.clone(),
        });

        let handles = (0..config.workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let worker = worker.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else { break };

                        let correlation_id = job.record.correlation_id.clone();
                        let phase = job.phase;
                        match AssertUnwindSafe(worker.run(job)).catch_unwind().await {
                            Ok(true) => {}
                            Ok(false) => crate::metrics::count_task_failure(),
                            Err(payload) => {
                                let err = PipelineError::TaskPanicked(panic_message(payload.as_ref()));
                                tracing::error!(
                                    worker = id,
                                    correlation_id = %correlation_id,
                                    phase = phase.as_str(),
                                    error = %err,
                                    "Exchange log task panicked"
                                );
                                crate::metrics::count_task_failure();
                                worker.tracker.settle(&correlation_id, phase, false);
                            }
                        }
                    }
                    tracing::debug!(worker = id, "Exchange log worker stopped");
                })
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            queue_capacity = capacity,
            "✅ Exchange log pipeline started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            capacity,
            tracker,
            workers: tokio::sync::Mutex::new(handles),
        }
    }

    /// 非阻塞提交；队列满或已关闭时返回错误
    pub fn submit(&self, phase: ExchangePhase, record: ExchangeRecord) -> Result<(), PipelineError> {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sender = guard.as_ref().ok_or(PipelineError::Closed)?;
        match sender.try_send(LogJob { phase, record }) {
            Ok(()) => {
                crate::metrics::count_scheduled(phase);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(PipelineError::QueueFull(self.capacity)),
            Err(TrySendError::Closed(_)) => Err(PipelineError::Closed),
        }
    }

    fn schedule(&self, phase: ExchangePhase, record: ExchangeRecord) {
        let correlation_id = record.correlation_id.clone();
        if let Err(e) = self.submit(phase, record) {
            tracing::warn!(
                correlation_id = %correlation_id,
                phase = phase.as_str(),
                error = %e,
                "Exchange log task rejected"
            );
            crate::metrics::count_rejected(phase);
            self.tracker.settle(&correlation_id, phase, false);
        }
    }

    pub fn tracker(&self) -> &Arc<PhaseTracker> {
        &self.tracker
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前排队中的任务数
    pub fn queued(&self) -> usize {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .map(|s| self.capacity - s.capacity())
            .unwrap_or(0)
    }

    /// 关闭队列并等待 worker 处理完剩余任务
    pub async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Exchange log worker terminated abnormally");
            }
        }
        tracing::info!(pending = self.tracker.pending(), "Exchange log pipeline stopped");
    }
}

impl LogProcessor for AsyncLogPipeline {
    fn process_request(&self, record: ExchangeRecord) {
        self.schedule(ExchangePhase::Request, record);
    }

    fn process_response(&self, record: ExchangeRecord) {
        self.schedule(ExchangePhase::Response, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_request_then_response() {
        let tracker = PhaseTracker::new();
        assert_eq!(
            tracker.settle("a", ExchangePhase::Request, true),
            PhaseState::RequestStored
        );
        assert_eq!(tracker.pending(), 1);
        assert_eq!(
            tracker.settle("a", ExchangePhase::Response, true),
            PhaseState::Complete
        );
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_tracker_response_first_waits_for_request() {
        let tracker = PhaseTracker::new();
        tracker.settle("b", ExchangePhase::Response, true);
        assert_eq!(tracker.state("b"), Some(PhaseState::Complete));
        assert_eq!(tracker.pending(), 0);

        // 迟到的请求阶段不会回退状态
        assert_eq!(
            tracker.settle("b", ExchangePhase::Request, true),
            PhaseState::Complete
        );
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_tracker_dropped_phase_releases_entry() {
        let tracker = PhaseTracker::new();
        tracker.settle("c", ExchangePhase::Request, true);
        tracker.settle("c", ExchangePhase::Response, false);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
