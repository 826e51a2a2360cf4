//! 选择性脱敏：策略、规则编译、上下文与分作用域脱敏器

pub mod compiler;
pub mod context;
pub mod engine;
pub mod registry;
pub mod sanitizers;
pub mod strategy;
pub mod value;

pub use compiler::{BodyRule, RuleCompiler, SanitizationRule};
pub use context::SanitizationContext;
pub use engine::SanitizationEngine;
pub use registry::{RawParams, StrategyRegistry, StrategyValidator};
pub use strategy::{MaskingStrategy, StrategyParams, StrategyType};
pub use value::{ValueSanitizer, ERROR_PLACEHOLDER};
