use clap::ValueEnum;
use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, ErrorDetails};

#[derive(Clone, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

pub struct DelayedDebugLogs {
    enable_cb: Box<dyn FnOnce() -> Result<(), Error> + Send + Sync>,
}

impl DelayedDebugLogs {
    pub fn enable_debug(self) -> Result<(), Error> {
        (self.enable_cb)()
    }
}

/// A handle produced by `setup_observability` that allows raising the log level
/// once the config file has been read (`gateway.debug = true`).
pub struct ObservabilityHandle {
    pub delayed_debug_logs: DelayedDebugLogs,
}

/// This is used when `gateway.debug` is `false` and `RUST_LOG` is not set
const DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES: &str = "warn,gateway=info,edgesplit_core=info";
/// This is used when `gateway.debug` is `true` and `RUST_LOG` is not set
const DEFAULT_GATEWAY_DEBUG_DIRECTIVES: &str =
    "warn,gateway=debug,edgesplit_core=debug,tower_http::trace=debug";

/// Installs the process-wide rustls crypto provider used by the Valkey TLS
/// connection and the analytics HTTP client. Safe to call more than once.
pub fn install_crypto_provider() {
    // Fails only if a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Set up logging.
///
/// The priority for our logging configuration is:
/// 1. If `RUST_LOG` is set, use it verbatim, ignoring everything else
/// 2. If `gateway.debug` is set in the config file, use `DEFAULT_GATEWAY_DEBUG_DIRECTIVES`
/// 3. Otherwise, use `DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES`
///
/// The filter starts at the non-debug directives and is swapped through
/// `DelayedDebugLogs` after the config file is loaded, so that warnings raised
/// while parsing the config are still visible.
pub fn setup_observability(log_format: LogFormat) -> Result<ObservabilityHandle, Error> {
    install_crypto_provider();

    let env_var_name = "RUST_LOG";
    let has_env_var = std::env::var(env_var_name).is_ok();

    let default_debug_filter = EnvFilter::builder()
        .parse(DEFAULT_GATEWAY_DEBUG_DIRECTIVES)
        .map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!(
                    "Failed to parse internal debug directives - this should never happen: {e}"
                ),
            })
        })?;

    let base_filter = if has_env_var {
        EnvFilter::builder()
            .with_env_var(env_var_name)
            .from_env()
            .map_err(|e| {
                Error::new(ErrorDetails::Observability {
                    message: format!("Invalid `{env_var_name}` environment variable: {e}"),
                })
            })?
    } else {
        EnvFilter::builder()
            .parse(DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES)
            .map_err(|e| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("Failed to parse internal non-debug directives - this should never happen: {e}"),
                })
            })?
    };

    let (log_level, update_log_level) = tracing_subscriber::reload::Layer::new(base_filter);

    let log_layer = match log_format {
        LogFormat::Pretty => {
            Box::new(tracing_subscriber::fmt::layer()) as Box<dyn Layer<_> + Send + Sync>
        }
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
    };

    tracing_subscriber::registry()
        .with(log_layer.with_filter(log_level))
        .try_init()
        .map_err(|e| {
            Error::new(ErrorDetails::Observability {
                message: format!("Failed to install the tracing subscriber: {e}"),
            })
        })?;

    // If `RUST_LOG` is explicitly set, it takes precedence over `gateway.debug`
    let delayed_debug_logs = if has_env_var {
        DelayedDebugLogs {
            enable_cb: Box::new(|| Ok(())),
        }
    } else {
        DelayedDebugLogs {
            enable_cb: Box::new(move || {
                update_log_level
                    .modify(move |l| {
                        *l = default_debug_filter;
                    })
                    .map_err(|e| {
                        Error::new(ErrorDetails::Observability {
                            message: format!("Failed to update log level: {e}"),
                        })
                    })
            }),
        }
    };
    Ok(ObservabilityHandle { delayed_debug_logs })
}

/// Set up Prometheus metrics exporter
pub fn setup_metrics() -> Result<PrometheusHandle, Error> {
    let metrics_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to install Prometheus exporter: {e}"),
        })
    })?;

    describe_metrics();

    Ok(metrics_handle)
}

/// Register the expected metrics along with their types and docstrings
fn describe_metrics() {
    describe_counter!(
        "edgesplit_requests_total",
        Unit::Count,
        "Requests routed to an A/B test",
    );

    describe_counter!(
        "edgesplit_assignments_total",
        Unit::Count,
        "Bucket assignments served, by source (`cookie`, `selected`, `override`)",
    );

    describe_counter!(
        "edgesplit_stale_bindings_total",
        Unit::Count,
        "Visitors bound to a bucket that is no longer part of the test",
    );

    describe_counter!(
        "edgesplit_stats_lookup_failures_total",
        Unit::Count,
        "Stats lookups that failed or timed out and were read as zero",
    );

    describe_counter!(
        "edgesplit_analytics_failures_total",
        Unit::Count,
        "Analytics events that could not be delivered",
    );
}
