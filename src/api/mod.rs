use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    api::{
        handlers::{echo, echo_query, healthz, metrics},
        middleware::exchange_capture_middleware,
    },
    app_state::AppState,
};

pub mod handlers;
pub mod middleware;

pub fn routes(state: Arc<AppState>) -> Router {
    // 业务路由：由捕获层包裹
    let captured_routes = Router::new()
        .route("/api/echo", get(echo_query).post(echo))
        .layer(from_fn_with_state(state.clone(), exchange_capture_middleware));

    // 运维路由：不写交换日志
    let ops_routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics));

    Router::new()
        .merge(captured_routes)
        .merge(ops_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
