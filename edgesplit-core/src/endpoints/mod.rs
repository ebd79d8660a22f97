use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::utils::gateway::AppStateData;

pub mod probabilities;
pub mod redirect;
pub mod status;

/// Operational routes. These are matched before the redirect fallback, which is
/// why entry paths may not live under them.
pub fn api_routes() -> Router<AppStateData> {
    Router::new()
        .route("/status", get(status::status_handler))
        .route("/health", get(status::health_handler))
        .route(
            "/internal/tests/{test_id}/probabilities",
            get(probabilities::probabilities_handler),
        )
}

/// The full gateway router. `/metrics` is only mounted when a Prometheus
/// recorder has been installed.
pub fn build_router(app_state: AppStateData, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut router = api_routes();
    if let Some(metrics_handle) = metrics_handle {
        router = router.route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        );
    }
    router
        .fallback(redirect::edge_redirect_handler)
        // We log failed requests at 'DEBUG', since we already have our own error-logging code
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state)
}
