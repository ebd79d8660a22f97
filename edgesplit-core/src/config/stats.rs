use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::BucketStats;
use crate::error::{Error, ErrorDetails};

/// Environment variable holding the Valkey URL for `backend = "valkey"`.
pub const VALKEY_URL_ENV_VAR: &str = "EDGESPLIT_VALKEY_URL";
pub const DEFAULT_STATS_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_STATS_KEY_PREFIX: &str = "test:";

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsBackend {
    Valkey,
    Memory,
    /// Every bucket reads as `{0, 0}`, so adaptive tests stay on their static weights.
    #[default]
    Disabled,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UninitializedStatsConfig {
    #[serde(default)]
    pub backend: StatsBackend,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// `[stats.seed.<test_id>.<bucket_id>]` tables, only for `backend = "memory"`.
    #[serde(default)]
    pub seed: HashMap<String, HashMap<String, BucketStats>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsConfig {
    pub backend: StatsBackend,
    pub timeout: Duration,
    pub key_prefix: String,
    pub seed: HashMap<String, HashMap<String, BucketStats>>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            backend: StatsBackend::default(),
            timeout: Duration::from_millis(DEFAULT_STATS_TIMEOUT_MS),
            key_prefix: DEFAULT_STATS_KEY_PREFIX.to_string(),
            seed: HashMap::new(),
        }
    }
}

impl UninitializedStatsConfig {
    pub fn load(self) -> Result<StatsConfig, Error> {
        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_STATS_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`stats.timeout_ms` must be greater than 0".to_string(),
            }));
        }
        if !self.seed.is_empty() && self.backend != StatsBackend::Memory {
            return Err(Error::new(ErrorDetails::Config {
                message: "`stats.seed` is only supported with `stats.backend = \"memory\"`"
                    .to_string(),
            }));
        }
        Ok(StatsConfig {
            backend: self.backend,
            timeout: Duration::from_millis(timeout_ms),
            key_prefix: self
                .key_prefix
                .unwrap_or_else(|| DEFAULT_STATS_KEY_PREFIX.to_string()),
            seed: self.seed,
        })
    }
}
