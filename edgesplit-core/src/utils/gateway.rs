use std::sync::Arc;

use crate::analytics::AnalyticsDispatcher;
use crate::config::Config;
use crate::config::stats::{StatsBackend, VALKEY_URL_ENV_VAR};
use crate::db::StatsStore;
use crate::db::memory::InMemoryStatsStore;
use crate::db::valkey::{ValkeyConnectionInfo, ValkeyStatsStore};
use crate::error::{Error, ErrorDetails};
use crate::experimentation::BucketId;

/// State shared by every request. Everything in here is either immutable or
/// internally synchronized, so cloning is cheap and requests never lock.
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub stats_store: Arc<dyn StatsStore>,
    pub analytics: AnalyticsDispatcher,
}

pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub fn new(
        config: Arc<Config>,
        stats_store: Arc<dyn StatsStore>,
        analytics: AnalyticsDispatcher,
    ) -> Self {
        Self {
            config,
            stats_store,
            analytics,
        }
    }
}

/// Owns the application state for the lifetime of the gateway process.
pub struct GatewayHandle {
    pub app_state: AppStateData,
}

impl GatewayHandle {
    /// Builds the stats store and analytics dispatcher the config asks for.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let stats_store = setup_stats_store(&config).await?;
        let analytics = AnalyticsDispatcher::from_config(&config.analytics, reqwest::Client::new());
        Ok(Self {
            app_state: AppStateData::new(config, stats_store, analytics),
        })
    }

    pub fn stats_backend_pretty(&self) -> &'static str {
        match self.app_state.config.stats.backend {
            StatsBackend::Valkey => "valkey",
            StatsBackend::Memory => "memory",
            StatsBackend::Disabled => "disabled",
        }
    }

    /// Waits for in-flight analytics events. Call after the server has stopped accepting requests.
    pub async fn shutdown(&self) {
        self.app_state.analytics.shutdown().await;
    }
}

async fn setup_stats_store(config: &Config) -> Result<Arc<dyn StatsStore>, Error> {
    let key_prefix = config.stats.key_prefix.clone();
    match config.stats.backend {
        StatsBackend::Valkey => {
            let valkey_url = std::env::var(VALKEY_URL_ENV_VAR).map_err(|_| {
                Error::new(ErrorDetails::AppState {
                    message: format!(
                        "Missing environment variable `{VALKEY_URL_ENV_VAR}` (required by `stats.backend = \"valkey\"`)"
                    ),
                })
            })?;
            let connection = ValkeyConnectionInfo::new(&valkey_url).await?;
            Ok(Arc::new(ValkeyStatsStore::new(connection, key_prefix)))
        }
        StatsBackend::Memory => {
            let store = InMemoryStatsStore::new();
            for (test_id, buckets) in &config.stats.seed {
                for (bucket_id, stats) in buckets {
                    store.set_bucket_stats(test_id, BucketId::from_token(bucket_id), *stats);
                }
            }
            Ok(Arc::new(store))
        }
        StatsBackend::Disabled => Ok(Arc::new(ValkeyStatsStore::new(
            ValkeyConnectionInfo::new_disabled(),
            key_prefix,
        ))),
    }
}
