//! Ops HTTP endpoint: `/health` and `/metrics`.

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::shutdown::StopSignal;

#[derive(Clone)]
pub struct OpsState {
    /// Reported by `/health`, e.g. `"forwarder"`.
    pub component: &'static str,
    pub metrics: PrometheusHandle,
}

pub fn router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves `router` on `addr` until `stop` fires.
pub async fn serve(addr: &str, router: Router, mut stop: StopSignal) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "ops endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { stop.stopped().await })
        .await
}
