use std::sync::Arc;

use axum::{Json, extract::State};

use crate::service::{Collector, DevicesOverview};

/// Устройства, которые сейчас опрашиваются.
pub async fn devices(State(collector): State<Arc<Collector>>) -> Json<DevicesOverview> {
    Json(collector.devices().await)
}
