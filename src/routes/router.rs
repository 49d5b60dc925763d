use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{devices, health};
use crate::service::Collector;

pub fn create_router(collector: Arc<Collector>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(devices))
        .layer(TraceLayer::new_for_http())
        .with_state(collector)
}
