use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};
use crate::experimentation::BucketId;

pub mod analytics;
pub mod gateway;
pub mod stats;

use analytics::{AnalyticsConfig, UninitializedAnalyticsConfig};
use gateway::{GatewayConfig, UninitializedGatewayConfig};
use stats::{StatsConfig, UninitializedStatsConfig};
use test::{TestDefinition, UninitializedTestConfig};

/// The fully validated runtime configuration. Immutable after startup.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub stats: StatsConfig,
    pub analytics: AnalyticsConfig,
    pub tests: TestTable,
}

/// The raw contents of the config file, before validation.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UninitializedConfig {
    #[serde(default)]
    pub gateway: UninitializedGatewayConfig,
    #[serde(default)]
    pub stats: UninitializedStatsConfig,
    #[serde(default)]
    pub analytics: UninitializedAnalyticsConfig,
    #[serde(default)]
    pub tests: HashMap<String, UninitializedTestConfig>,
}

impl UninitializedConfig {
    pub fn read_toml_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file `{}`: {e}", path.display()),
            })
        })?;
        Self::from_toml_str(&contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file `{}`: {e}", path.display()),
            })
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(self) -> Result<Config, Error> {
        let gateway = self.gateway.load()?;
        let stats = self.stats.load()?;
        let analytics = self.analytics.load()?;
        let tests = self
            .tests
            .into_iter()
            .map(|(id, test)| Ok((id.clone(), Arc::new(test.load(&id)?))))
            .collect::<Result<BTreeMap<_, _>, Error>>()?;
        let tests = TestTable::new(tests)?;
        validate_stats_seed(&stats, &tests)?;

        Ok(Config {
            gateway,
            stats,
            analytics,
            tests,
        })
    }
}

impl Config {
    /// Reads, parses and validates the config file at `path`.
    pub fn load_from_path(path: &Path) -> Result<Config, Error> {
        UninitializedConfig::read_toml_file(path)?.load()
    }

    pub fn load_from_toml_str(contents: &str) -> Result<Config, Error> {
        UninitializedConfig::from_toml_str(contents)
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to parse config: {e}"),
                })
            })?
            .load()
    }

    /// The active test whose entry path is the longest segment-aware prefix of `path`.
    pub fn active_test_for_path(&self, path: &str) -> Option<&Arc<TestDefinition>> {
        self.tests.active_test_for_path(path)
    }
}

/// All configured tests, keyed by test id.
#[derive(Clone, Debug, Default)]
pub struct TestTable {
    tests: BTreeMap<String, Arc<TestDefinition>>,
}

impl TestTable {
    /// Builds the table, rejecting two active tests with the same entry path.
    pub fn new(tests: BTreeMap<String, Arc<TestDefinition>>) -> Result<Self, Error> {
        let mut entry_paths: HashMap<&str, &str> = HashMap::new();
        for test in tests.values().filter(|test| test.active) {
            if let Some(other) = entry_paths.insert(&test.entry_path, &test.id) {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!(
                        "Tests `{other}` and `{}` are both active on entry path `{}`",
                        test.id, test.entry_path
                    ),
                }));
            }
        }
        Ok(Self { tests })
    }

    pub fn get(&self, test_id: &str) -> Option<&Arc<TestDefinition>> {
        self.tests.get(test_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestDefinition>> {
        self.tests.values()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn active_test_for_path(&self, path: &str) -> Option<&Arc<TestDefinition>> {
        self.tests
            .values()
            .filter(|test| test.active && test.matches_path(path))
            .max_by_key(|test| test.entry_path.len())
    }
}

fn validate_stats_seed(stats: &StatsConfig, tests: &TestTable) -> Result<(), Error> {
    for (test_id, buckets) in &stats.seed {
        let Some(test) = tests.get(test_id) else {
            return Err(Error::new(ErrorDetails::Config {
                message: format!("`stats.seed.{test_id}` refers to an unknown test"),
            }));
        };
        for bucket in buckets.keys() {
            if !test.contains_bucket(&BucketId::from_token(bucket)) {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!(
                        "`stats.seed.{test_id}.{bucket}` refers to an unknown bucket"
                    ),
                }));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::stats::StatsBackend;

    const EXAMPLE_CONFIG: &str = r#"
[gateway]
bind_address = "127.0.0.1:3000"
debug_override_param = "force_bucket"

[stats]
backend = "memory"
timeout_ms = 100

[stats.seed.pricing.control]
views = 500
conversions = 50

[stats.seed.pricing.annual-first]
views = 480
conversions = 72

[analytics]
type = "log"

[tests.pricing]
display_name = "Pricing page layout"
entry_path = "/pricing"
control_target = "https://example.com/pricing"
adaptive = true

[[tests.pricing.variants]]
id = "annual-first"
target = "https://example.com/pricing-annual"

[tests.pricing_eu]
entry_path = "/pricing/eu"
control_target = "https://example.com/eu/pricing"
control_weight = 90
variants = [{ id = "b", target = "https://example.com/eu/pricing-b", weight = 10 }]

[tests.old_signup]
entry_path = "/pricing"
control_target = "https://example.com/signup"
active = false
variants = [{ id = "b", target = "https://example.com/signup-b" }]
"#;

    #[test]
    fn test_load_example_config() {
        let config = Config::load_from_toml_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.gateway.debug_override_param, "force_bucket");
        assert_eq!(config.stats.backend, StatsBackend::Memory);
        assert_eq!(config.analytics.sink_name(), "log");
        assert_eq!(config.tests.len(), 3);

        let pricing = config.tests.get("pricing").unwrap();
        assert!(pricing.adaptive);
        assert_eq!(pricing.control_weight, 50.0);
        assert_eq!(pricing.display_name.as_deref(), Some("Pricing page layout"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = Config::load_from_toml_str(EXAMPLE_CONFIG).unwrap();
        let id_for = |path: &str| config.active_test_for_path(path).map(|t| t.id.clone());

        assert_eq!(id_for("/pricing"), Some("pricing".to_string()));
        assert_eq!(id_for("/pricing/us"), Some("pricing".to_string()));
        assert_eq!(id_for("/pricing/eu"), Some("pricing_eu".to_string()));
        assert_eq!(id_for("/pricing/eu/de"), Some("pricing_eu".to_string()));
        assert_eq!(id_for("/pricingx"), None);
        assert_eq!(id_for("/about"), None);
    }

    #[test]
    fn test_inactive_tests_never_match() {
        let config = Config::load_from_toml_str(EXAMPLE_CONFIG).unwrap();
        assert!(!config.tests.get("old_signup").unwrap().active);
        // `old_signup` shares `/pricing` but is paused, so `pricing` still owns the path
        assert_eq!(
            config.active_test_for_path("/pricing").unwrap().id,
            "pricing"
        );
    }

    #[test]
    fn test_duplicate_active_entry_paths_rejected() {
        let config = r#"
[tests.a]
entry_path = "/landing"
control_target = "https://example.com/a"
variants = [{ id = "b", target = "https://example.com/b" }]

[tests.b]
entry_path = "/landing/"
control_target = "https://example.com/a"
variants = [{ id = "b", target = "https://example.com/b" }]
"#;
        let err = Config::load_from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("both active"), "{err}");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let config = r#"
[tests.a]
entry_path = "/landing"
control_target = "https://example.com/a"
variants = [{ id = "b", target = "https://example.com/b" }]
weights = [50, 50]
"#;
        assert!(Config::load_from_toml_str(config).is_err());
        assert!(Config::load_from_toml_str("[gatway]\ndebug = true").is_err());
    }

    #[test]
    fn test_seed_must_reference_known_buckets() {
        let config = r#"
[stats]
backend = "memory"

[stats.seed.a.missing]
views = 1
conversions = 0

[tests.a]
entry_path = "/landing"
control_target = "https://example.com/a"
variants = [{ id = "b", target = "https://example.com/b" }]
"#;
        let err = Config::load_from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("unknown bucket"), "{err}");
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::load_from_toml_str("").unwrap();
        assert!(config.tests.is_empty());
        assert_eq!(config.gateway, GatewayConfig::default());
        assert_eq!(config.stats, StatsConfig::default());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE_CONFIG.as_bytes()).unwrap();
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.tests.len(), 3);

        let err = Config::load_from_path(Path::new("/nonexistent/edgesplit.toml")).unwrap_err();
        assert!(
            matches!(err.get_details(), ErrorDetails::Config { .. }),
            "{err}"
        );
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/edgesplit.toml");
        let raw = UninitializedConfig::read_toml_file(&path).unwrap();
        assert_eq!(raw.tests.len(), 2);
        // The analytics section needs a secret from the environment, so only the tests are loaded
        for (id, test) in raw.tests {
            test.load(&id).unwrap();
        }
    }
}
