//! 分作用域脱敏器：Body / Header / Query

pub mod body;
pub mod header;
pub mod query;

pub use body::JsonBodySanitizer;
pub use header::HeaderSanitizer;
pub use query::QueryParamSanitizer;

use crate::domain::exchange::ExchangeRecord;
use crate::error::SanitizeError;

/// 单一作用域脱敏器，原地修改记录
pub trait LogSanitizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn sanitize_request(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError>;

    fn sanitize_response(&self, record: &mut ExchangeRecord) -> Result<(), SanitizeError>;
}
