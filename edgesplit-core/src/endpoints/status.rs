use axum::debug_handler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::db::HealthCheckable;
use crate::utils::gateway::{AppState, AppStateData};

pub const EDGESPLIT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A handler for a simple liveness check
#[debug_handler]
pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: EDGESPLIT_VERSION.to_string(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
}

/// A handler for a health check that includes availability of the stats store
pub async fn health_handler(
    State(AppStateData { stats_store, .. }): AppState,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if stats_store.health().await.is_ok() {
        return Ok(Json(json!({
            "gateway": "ok",
            "stats_store": "ok",
        })));
    }

    Err((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "gateway": "ok",
            "stats_store": "error",
        })),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::analytics::{AnalyticsDispatcher, NoopSink};
    use crate::config::Config;
    use crate::db::memory::InMemoryStatsStore;
    use crate::db::{BucketStats, StatsQueries};
    use crate::error::{Error, ErrorDetails};
    use crate::experimentation::BucketId;

    struct UnhealthyStore;

    #[async_trait]
    impl StatsQueries for UnhealthyStore {
        async fn get_bucket_stats(
            &self,
            _test_id: &str,
            _bucket_id: &BucketId,
        ) -> Result<BucketStats, Error> {
            Ok(BucketStats::default())
        }
    }

    #[async_trait]
    impl HealthCheckable for UnhealthyStore {
        async fn health(&self) -> Result<(), Error> {
            Err(Error::new_without_logging(ErrorDetails::ValkeyConnection {
                message: "down".to_string(),
            }))
        }
    }

    fn app_state(stats_store: Arc<dyn crate::db::StatsStore>) -> AppStateData {
        AppStateData::new(
            Arc::new(Config::default()),
            stats_store,
            AnalyticsDispatcher::new(Arc::new(NoopSink), Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler(State(app_state(Arc::new(InMemoryStatsStore::new())))).await;
        let response_value = response.unwrap();
        assert_eq!(response_value.get("gateway").unwrap(), "ok");
        assert_eq!(response_value.get("stats_store").unwrap(), "ok");
    }

    #[tokio::test]
    async fn should_report_error_for_unhealthy_stats_store() {
        let response = health_handler(State(app_state(Arc::new(UnhealthyStore)))).await;
        let (status_code, error_json) = response.unwrap_err();
        assert_eq!(status_code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_json.get("gateway").unwrap(), "ok");
        assert_eq!(error_json.get("stats_store").unwrap(), "error");
    }

    #[tokio::test]
    async fn test_status_handler() {
        let response = status_handler().await;
        assert_eq!(response.version, EDGESPLIT_VERSION);
        assert_eq!(response.status, "ok");
    }
}
