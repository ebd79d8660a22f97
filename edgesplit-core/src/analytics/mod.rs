//! Fire-and-forget analytics events.
//!
//! The router hands each view event to an [`AnalyticsDispatcher`], which spawns
//! the emission onto a `TaskTracker` and returns immediately. A failed or slow
//! sink is logged and counted, and never affects the redirect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::config::analytics::{AnalyticsConfig, DEFAULT_ANALYTICS_TIMEOUT_MS};
use crate::error::{Error, ErrorDetails};
use crate::experimentation::BucketId;

pub mod ga4;

/// Fired by the router on every redirect.
pub const VIEW_EVENT_NAME: &str = "ab_test_view";
/// Fired by the client-side snippet on the target page; never by the router.
pub const CONVERSION_EVENT_NAME: &str = "ab_test_conversion";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalyticsEvent {
    pub name: &'static str,
    pub test_id: String,
    pub bucket_id: BucketId,
    /// The visitor's analytics client id, when the request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl AnalyticsEvent {
    pub fn view(test_id: &str, bucket_id: BucketId, client_id: Option<String>) -> Self {
        Self {
            name: VIEW_EVENT_NAME,
            test_id: test_id.to_string(),
            bucket_id,
            client_id,
        }
    }
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), Error>;
}

/// Writes each event as a structured `tracing` line.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AnalyticsSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn emit(&self, event: &AnalyticsEvent) -> Result<(), Error> {
        tracing::info!(
            event = event.name,
            test_id = %event.test_id,
            bucket_id = %event.bucket_id,
            client_id = event.client_id.as_deref(),
            "Analytics event"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl AnalyticsSink for NoopSink {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn emit(&self, _event: &AnalyticsEvent) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct AnalyticsDispatcher {
    sink: Arc<dyn AnalyticsSink>,
    tasks: TaskTracker,
    timeout: Duration,
}

impl AnalyticsDispatcher {
    pub fn new(sink: Arc<dyn AnalyticsSink>, timeout: Duration) -> Self {
        Self {
            sink,
            tasks: TaskTracker::new(),
            timeout,
        }
    }

    pub fn from_config(config: &AnalyticsConfig, http_client: reqwest::Client) -> Self {
        match config {
            AnalyticsConfig::Ga4(ga4_config) => Self::new(
                Arc::new(ga4::Ga4Sink::new(ga4_config.clone(), http_client)),
                ga4_config.timeout,
            ),
            AnalyticsConfig::Log => Self::new(
                Arc::new(LogSink),
                Duration::from_millis(DEFAULT_ANALYTICS_TIMEOUT_MS),
            ),
            AnalyticsConfig::None => Self::new(
                Arc::new(NoopSink),
                Duration::from_millis(DEFAULT_ANALYTICS_TIMEOUT_MS),
            ),
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Spawns the emission and returns immediately.
    pub fn dispatch(&self, event: AnalyticsEvent) {
        let sink = self.sink.clone();
        let timeout = self.timeout;
        self.tasks.spawn(async move {
            let failed = match tokio::time::timeout(timeout, sink.emit(&event)).await {
                Ok(Ok(())) => false,
                // Already logged when the error was constructed
                Ok(Err(_)) => true,
                Err(_) => {
                    Error::new(ErrorDetails::AnalyticsEmit {
                        sink: sink.name().to_string(),
                        message: format!(
                            "`{}` event for test `{}` timed out after {} ms",
                            event.name,
                            event.test_id,
                            timeout.as_millis()
                        ),
                    });
                    true
                }
            };
            if failed {
                metrics::counter!(
                    "edgesplit_analytics_failures_total",
                    "sink" => sink.name()
                )
                .increment(1);
            }
        });
    }

    /// Stops accepting new events and waits for in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
