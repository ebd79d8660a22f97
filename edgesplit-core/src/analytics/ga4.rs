//! Google Analytics 4 Measurement Protocol sink.

use async_trait::async_trait;
use http::HeaderMap;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::config::analytics::Ga4Config;
use crate::error::{DisplayOrDebugGateway, Error, ErrorDetails};
use crate::session::cookie_value;

/// Name of the cookie the GA4 browser tag stores its client id in.
pub const GA_COOKIE_NAME: &str = "_ga";

pub struct Ga4Sink {
    config: Ga4Config,
    http_client: reqwest::Client,
}

impl Ga4Sink {
    pub fn new(config: Ga4Config, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn collect_url(&self) -> Url {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("measurement_id", &self.config.measurement_id)
            .append_pair("api_secret", self.config.api_secret.expose_secret());
        url
    }
}

/// Extracts the GA4 client id from a `_ga` cookie value: `GA1.1.<a>.<b>` becomes `<a>.<b>`.
pub fn parse_ga_client_id(cookie: &str) -> Option<String> {
    let mut parts = cookie.splitn(3, '.');
    let version = parts.next()?;
    let _depth = parts.next()?;
    let client_id = parts.next()?;
    if !version.starts_with("GA") {
        return None;
    }
    let (random, timestamp) = client_id.split_once('.')?;
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (is_digits(random) && is_digits(timestamp)).then(|| client_id.to_string())
}

/// The visitor's GA4 client id, if the request carries a well-formed `_ga` cookie.
pub fn client_id_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, GA_COOKIE_NAME).and_then(parse_ga_client_id)
}

fn request_body(event: &AnalyticsEvent) -> Value {
    let client_id = event
        .client_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    json!({
        "client_id": client_id,
        "events": [{
            "name": event.name,
            "params": {
                "test_id": event.test_id,
                "bucket_id": event.bucket_id,
            },
        }],
    })
}

#[async_trait]
impl AnalyticsSink for Ga4Sink {
    fn name(&self) -> &'static str {
        "ga4"
    }

    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), Error> {
        let response = self
            .http_client
            .post(self.collect_url())
            .json(&request_body(event))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| {
                // The request URL carries the API secret; strip it before logging.
                Error::new(ErrorDetails::AnalyticsEmit {
                    sink: self.name().to_string(),
                    message: format!(
                        "Failed to send `{}` event: {}",
                        event.name,
                        DisplayOrDebugGateway::new(e.without_url())
                    ),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(ErrorDetails::AnalyticsEmit {
                sink: self.name().to_string(),
                message: format!("Measurement Protocol returned HTTP {status}"),
            }));
        }
        Ok(())
    }
}
