use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};
use crate::session::is_valid_token;

pub const DEFAULT_DEBUG_OVERRIDE_PARAM: &str = "ab_bucket";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UninitializedGatewayConfig {
    #[serde(default)]
    pub bind_address: Option<SocketAddr>,
    #[serde(default)]
    pub debug: bool,
    /// Name of the query parameter that forces a bucket, e.g. `?ab_bucket=variant1`.
    #[serde(default)]
    pub debug_override_param: Option<String>,
    /// If `true`, the incoming query string (minus the override parameter) is
    /// merged into the redirect target so that campaign parameters survive.
    #[serde(default)]
    pub forward_query_string: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    pub debug: bool,
    pub debug_override_param: String,
    pub forward_query_string: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            debug: false,
            debug_override_param: DEFAULT_DEBUG_OVERRIDE_PARAM.to_string(),
            forward_query_string: true,
        }
    }
}

impl UninitializedGatewayConfig {
    pub fn load(self) -> Result<GatewayConfig, Error> {
        let debug_override_param = self
            .debug_override_param
            .unwrap_or_else(|| DEFAULT_DEBUG_OVERRIDE_PARAM.to_string());
        if !is_valid_token(&debug_override_param) {
            return Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "`gateway.debug_override_param` must be 1-64 characters of `[A-Za-z0-9_-]`, got `{debug_override_param}`"
                ),
            }));
        }
        Ok(GatewayConfig {
            bind_address: self.bind_address,
            debug: self.debug,
            debug_override_param,
            forward_query_string: self.forward_query_string.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UninitializedGatewayConfig::default().load().unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.debug_override_param, "ab_bucket");
        assert!(config.forward_query_string);
    }

    #[test]
    fn test_invalid_override_param() {
        let config = UninitializedGatewayConfig {
            debug_override_param: Some("a b".to_string()),
            ..Default::default()
        };
        assert!(config.load().is_err());
    }
}
