use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, OnceLock},
};

use crate::domain::exchange::ExchangePhase;

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Default)]
struct MetricsState {
    // 捕获层
    captured_exchanges: u64,
    truncated_bodies: u64,
    // 流水线
    scheduled: BTreeMap<&'static str, u64>,
    rejected: BTreeMap<&'static str, u64>,
    task_failures: u64,
    // 脱敏
    sanitizer_failures: BTreeMap<&'static str, u64>,
    strategy_failures: u64,
    // 导出
    exported: BTreeMap<(&'static str, &'static str), u64>,
    exporter_failures: BTreeMap<&'static str, u64>,
    export_latency_sum_ms: u128,
    // 简易直方图分桶（毫秒）：<5, <25, <100, <500, >=500
    export_hist_buckets: [u64; 5],
}

const EXPORT_BUCKETS: [&str; 5] = ["5", "25", "100", "500", "+Inf"];

fn state() -> MutexGuard<'static, MetricsState> {
    let lock = METRICS.get_or_init(|| Mutex::new(MetricsState::default()));
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_captured(truncated: bool) {
    let mut s = state();
    s.captured_exchanges += 1;
    if truncated {
        s.truncated_bodies += 1;
    }
}

pub fn count_scheduled(phase: ExchangePhase) {
    *state().scheduled.entry(phase.as_str()).or_insert(0) += 1;
}

pub fn count_rejected(phase: ExchangePhase) {
    *state().rejected.entry(phase.as_str()).or_insert(0) += 1;
}

pub fn count_task_failure() {
    state().task_failures += 1;
}

pub fn count_sanitizer_failure(sanitizer: &'static str) {
    *state().sanitizer_failures.entry(sanitizer).or_insert(0) += 1;
}

pub fn count_strategy_failure() {
    state().strategy_failures += 1;
}

pub fn count_exported(exporter: &'static str, phase: ExchangePhase) {
    *state().exported.entry((exporter, phase.as_str())).or_insert(0) += 1;
}

pub fn count_exporter_failure(exporter: &'static str) {
    *state().exporter_failures.entry(exporter).or_insert(0) += 1;
}

pub fn observe_export_latency(ms: u128) {
    let mut s = state();
    s.export_latency_sum_ms += ms;
    let idx = match ms {
        0..=4 => 0,
        5..=24 => 1,
        25..=99 => 2,
        100..=499 => 3,
        _ => 4,
    };
    s.export_hist_buckets[idx] += 1;
}

/// 流水线拒绝总数（所有阶段）
pub fn rejected_total() -> u64 {
    state().rejected.values().sum()
}

pub fn strategy_failures_total() -> u64 {
    state().strategy_failures
}

pub fn render_prometheus() -> String {
    let s = state();
    let mut out = String::new();

    out.push_str("# HELP exchange_log_captured_total Captured HTTP exchanges\n");
    out.push_str("# TYPE exchange_log_captured_total counter\n");
    out.push_str(&format!("exchange_log_captured_total {}\n", s.captured_exchanges));

    out.push_str("# HELP exchange_log_truncated_total Exchanges with a truncated body\n");
    out.push_str("# TYPE exchange_log_truncated_total counter\n");
    out.push_str(&format!("exchange_log_truncated_total {}\n", s.truncated_bodies));

    out.push_str("# HELP exchange_log_scheduled_total Log tasks accepted by the pipeline\n");
    out.push_str("# TYPE exchange_log_scheduled_total counter\n");
    for (phase, v) in s.scheduled.iter() {
        out.push_str(&format!(
            "exchange_log_scheduled_total{{phase=\"{}\"}} {}\n",
            phase, v
        ));
    }

    out.push_str("# HELP exchange_log_rejected_total Log tasks dropped because the queue was full\n");
    out.push_str("# TYPE exchange_log_rejected_total counter\n");
    for (phase, v) in s.rejected.iter() {
        out.push_str(&format!(
            "exchange_log_rejected_total{{phase=\"{}\"}} {}\n",
            phase, v
        ));
    }

    out.push_str("# HELP exchange_log_task_failures_total Log tasks that failed or panicked\n");
    out.push_str("# TYPE exchange_log_task_failures_total counter\n");
    out.push_str(&format!("exchange_log_task_failures_total {}\n", s.task_failures));

    out.push_str("# HELP exchange_log_sanitizer_failures_total Sanitizer passes skipped after an error\n");
    out.push_str("# TYPE exchange_log_sanitizer_failures_total counter\n");
    for (name, v) in s.sanitizer_failures.iter() {
        out.push_str(&format!(
            "exchange_log_sanitizer_failures_total{{sanitizer=\"{}\"}} {}\n",
            name, v
        ));
    }

    out.push_str("# HELP exchange_log_strategy_failures_total Values replaced with the error placeholder\n");
    out.push_str("# TYPE exchange_log_strategy_failures_total counter\n");
    out.push_str(&format!(
        "exchange_log_strategy_failures_total {}\n",
        s.strategy_failures
    ));

    out.push_str("# HELP exchange_log_exported_total Records delivered per exporter\n");
    out.push_str("# TYPE exchange_log_exported_total counter\n");
    for ((exporter, phase), v) in s.exported.iter() {
        out.push_str(&format!(
            "exchange_log_exported_total{{exporter=\"{}\",phase=\"{}\"}} {}\n",
            exporter, phase, v
        ));
    }

    out.push_str("# HELP exchange_log_exporter_failures_total Exporter errors\n");
    out.push_str("# TYPE exchange_log_exporter_failures_total counter\n");
    for (exporter, v) in s.exporter_failures.iter() {
        out.push_str(&format!(
            "exchange_log_exporter_failures_total{{exporter=\"{}\"}} {}\n",
            exporter, v
        ));
    }

    out.push_str("# HELP exchange_log_export_latency_ms Export latency histogram (ms)\n");
    out.push_str("# TYPE exchange_log_export_latency_ms histogram\n");
    let mut cumulative = 0u64;
    for (le, count) in EXPORT_BUCKETS.iter().zip(s.export_hist_buckets.iter()) {
        cumulative += count;
        out.push_str(&format!(
            "exchange_log_export_latency_ms_bucket{{le=\"{}\"}} {}\n",
            le, cumulative
        ));
    }
    out.push_str(&format!(
        "exchange_log_export_latency_ms_sum {}\n",
        s.export_latency_sum_ms
    ));
    out.push_str(&format!(
        "exchange_log_export_latency_ms_count {}\n",
        cumulative
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        count_scheduled(ExchangePhase::Request);
        count_rejected(ExchangePhase::Response);
        count_exported("database", ExchangePhase::Request);
        count_exporter_failure("file");
        observe_export_latency(7);

        let text = render_prometheus();
        assert!(text.contains("exchange_log_scheduled_total{phase=\"request\"}"));
        assert!(text.contains("exchange_log_rejected_total{phase=\"response\"}"));
        assert!(text.contains("exchange_log_exported_total{exporter=\"database\",phase=\"request\"}"));
        assert!(text.contains("exchange_log_exporter_failures_total{exporter=\"file\"}"));
        assert!(text.contains("exchange_log_export_latency_ms_bucket{le=\"+Inf\"}"));
        assert!(rejected_total() >= 1);
    }
}
