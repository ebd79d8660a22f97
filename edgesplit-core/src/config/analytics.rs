use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ErrorDetails};

pub const DEFAULT_GA4_ENDPOINT: &str = "https://www.google-analytics.com/mp/collect";
pub const DEFAULT_GA4_API_SECRET_ENV_VAR: &str = "EDGESPLIT_GA4_API_SECRET";
pub const DEFAULT_ANALYTICS_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum UninitializedAnalyticsConfig {
    /// Google Analytics 4 Measurement Protocol.
    Ga4 {
        measurement_id: String,
        #[serde(default)]
        api_secret_env: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Writes each event as a structured log line.
    Log,
    #[default]
    None,
}

#[derive(Clone, Debug, Default)]
pub enum AnalyticsConfig {
    Ga4(Ga4Config),
    Log,
    #[default]
    None,
}

#[derive(Clone, Debug)]
pub struct Ga4Config {
    pub measurement_id: String,
    pub api_secret: SecretString,
    pub endpoint: Url,
    pub timeout: Duration,
}

impl AnalyticsConfig {
    pub fn sink_name(&self) -> &'static str {
        match self {
            AnalyticsConfig::Ga4(_) => "ga4",
            AnalyticsConfig::Log => "log",
            AnalyticsConfig::None => "none",
        }
    }
}

impl UninitializedAnalyticsConfig {
    pub fn load(self) -> Result<AnalyticsConfig, Error> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Like `load`, but resolves environment variables through `env`.
    pub fn load_with_env(
        self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<AnalyticsConfig, Error> {
        match self {
            UninitializedAnalyticsConfig::Ga4 {
                measurement_id,
                api_secret_env,
                endpoint,
                timeout_ms,
            } => {
                if measurement_id.trim().is_empty() {
                    return Err(Error::new(ErrorDetails::Config {
                        message: "`analytics.measurement_id` must not be empty".to_string(),
                    }));
                }
                let api_secret_env =
                    api_secret_env.unwrap_or_else(|| DEFAULT_GA4_API_SECRET_ENV_VAR.to_string());
                let api_secret = env(&api_secret_env).ok_or_else(|| {
                    Error::new(ErrorDetails::Config {
                        message: format!(
                            "Missing environment variable `{api_secret_env}` for the GA4 API secret"
                        ),
                    })
                })?;
                let endpoint_str = endpoint.unwrap_or_else(|| DEFAULT_GA4_ENDPOINT.to_string());
                let endpoint = Url::parse(&endpoint_str).map_err(|e| {
                    Error::new(ErrorDetails::Config {
                        message: format!("`analytics.endpoint` is not a valid URL (`{endpoint_str}`): {e}"),
                    })
                })?;
                Ok(AnalyticsConfig::Ga4(Ga4Config {
                    measurement_id,
                    api_secret: SecretString::from(api_secret),
                    endpoint,
                    timeout: Duration::from_millis(
                        timeout_ms.unwrap_or(DEFAULT_ANALYTICS_TIMEOUT_MS),
                    ),
                }))
            }
            UninitializedAnalyticsConfig::Log => Ok(AnalyticsConfig::Log),
            UninitializedAnalyticsConfig::None => Ok(AnalyticsConfig::None),
        }
    }
}
