use std::fmt::{Debug, Display};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Controls whether internal details (backend error strings, raw cookie values)
/// are included in log lines and error response bodies.
///
/// WARNING: Setting this to true may expose request data in logs. Use with caution.
static DEBUG: OnceCell<bool> = OnceCell::const_new();

pub fn set_debug(debug: bool) -> Result<(), Error> {
    DEBUG.set(debug).map_err(|_| {
        Error::new(ErrorDetails::Config {
            message: "Failed to set debug mode".to_string(),
        })
    })
}

pub fn is_debug() -> bool {
    *DEBUG.get().unwrap_or(&false)
}

pub const IMPOSSIBLE_ERROR_MESSAGE: &str = "This should never happen, please file a bug report";

/// Chooses between a `Debug` or `Display` representation based on the gateway-level `DEBUG` flag.
pub struct DisplayOrDebugGateway<T: Debug + Display> {
    val: T,
}

impl<T: Debug + Display> DisplayOrDebugGateway<T> {
    pub fn new(val: T) -> Self {
        Self { val }
    }
}

impl<T: Debug + Display> Display for DisplayOrDebugGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if is_debug() {
            write!(f, "{:?}", self.val)
        } else {
            write!(f, "{}", self.val)
        }
    }
}

#[derive(Clone, Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
#[error(transparent)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
pub struct Error(Arc<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Arc::new(details))
    }

    /// Constructs an error without logging it.
    /// Used for degradable failures that the caller logs itself at a lower level
    /// (e.g. a stats lookup that falls back to `{0, 0}`).
    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Arc::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn log(&self) {
        self.0.log();
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        self.0.log_at_level(prefix, level);
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ErrorDetails {
    AnalyticsEmit {
        sink: String,
        message: String,
    },
    AppState {
        message: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
    InvalidRedirectTarget {
        test_id: String,
        target: String,
        message: String,
    },
    Observability {
        message: String,
    },
    RouteNotFound {
        path: String,
        method: String,
    },
    Serialization {
        message: String,
    },
    StatsStoreTimeout {
        test_id: String,
        bucket_id: String,
        timeout_ms: u64,
    },
    TestNotFound {
        path: String,
    },
    UnknownTest {
        test_id: String,
    },
    ValkeyConnection {
        message: String,
    },
    ValkeyQuery {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AnalyticsEmit { .. } => tracing::Level::WARN,
            ErrorDetails::AppState { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidRedirectTarget { .. } => tracing::Level::ERROR,
            ErrorDetails::Observability { .. } => tracing::Level::WARN,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::StatsStoreTimeout { .. } => tracing::Level::WARN,
            ErrorDetails::TestNotFound { .. } => tracing::Level::DEBUG,
            ErrorDetails::UnknownTest { .. } => tracing::Level::WARN,
            ErrorDetails::ValkeyConnection { .. } => tracing::Level::ERROR,
            ErrorDetails::ValkeyQuery { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AnalyticsEmit { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidRedirectTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StatsStoreTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ErrorDetails::TestNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::UnknownTest { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::ValkeyConnection { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::ValkeyQuery { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        match level {
            tracing::Level::ERROR => tracing::error!("{prefix}{self}"),
            tracing::Level::WARN => tracing::warn!("{prefix}{self}"),
            tracing::Level::INFO => tracing::info!("{prefix}{self}"),
            tracing::Level::DEBUG => tracing::debug!("{prefix}{self}"),
            tracing::Level::TRACE => tracing::trace!("{prefix}{self}"),
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        self.log_at_level("", self.level());
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AnalyticsEmit { sink, message } => {
                write!(f, "Failed to emit analytics event to `{sink}`: {message}")
            }
            ErrorDetails::AppState { message } => {
                write!(f, "Error initializing AppState: {message}")
            }
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::InternalError { message } => write!(f, "Internal error: {message}"),
            ErrorDetails::InvalidRedirectTarget {
                test_id,
                target,
                message,
            } => {
                write!(
                    f,
                    "Invalid redirect target `{target}` for test `{test_id}`: {message}"
                )
            }
            ErrorDetails::Observability { message } => write!(f, "{message}"),
            ErrorDetails::RouteNotFound { path, method } => {
                write!(f, "Route not found: {method} {path}")
            }
            ErrorDetails::Serialization { message } => write!(f, "{message}"),
            ErrorDetails::StatsStoreTimeout {
                test_id,
                bucket_id,
                timeout_ms,
            } => {
                write!(
                    f,
                    "Stats lookup for test `{test_id}` bucket `{bucket_id}` timed out after {timeout_ms} ms"
                )
            }
            ErrorDetails::TestNotFound { path } => {
                write!(f, "No active test matches path `{path}`")
            }
            ErrorDetails::UnknownTest { test_id } => write!(f, "Unknown test `{test_id}`"),
            ErrorDetails::ValkeyConnection { message } => {
                write!(f, "Error connecting to Valkey: {message}")
            }
            ErrorDetails::ValkeyQuery { message } => write!(f, "Valkey query failed: {message}"),
        }
    }
}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
        });
        let mut response = (self.status_code(), Json(body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorDetails::Serialization {
            message: err.to_string(),
        })
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::new(ErrorDetails::ValkeyQuery {
            message: err.to_string(),
        })
    }
}
