pub mod export; // 导出分发器与导出器
pub mod pipeline; // 异步日志流水线
pub mod sanitization; // 选择性脱敏

pub use export::{DatabaseLogExporter, FileLogExporter, LogExporter, LogExporterDispatcher};
pub use pipeline::{AsyncLogPipeline, LogProcessor, PhaseTracker};
pub use sanitization::{SanitizationContext, SanitizationEngine, StrategyRegistry};
