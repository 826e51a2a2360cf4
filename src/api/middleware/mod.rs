pub mod exchange_capture;

pub use exchange_capture::{
    correlation_id_from, exchange_capture_middleware, CorrelationId, CORRELATION_ID_HEADER,
};
