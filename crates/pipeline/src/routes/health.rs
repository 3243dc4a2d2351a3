//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::ops::OpsState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub component: &'static str,
}

/// GET /health — reports the process as up.
pub async fn check(State(state): State<OpsState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        component: state.component,
    })
}
