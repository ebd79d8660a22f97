mod stats;
#[cfg(test)]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::timeout;

use crate::db::HealthCheckable;
use crate::error::{Error, ErrorDetails};

pub use stats::ValkeyStatsStore;

/// Connection info for the Valkey (Redis-compatible) stats backend.
///
/// `ConnectionManager` reconnects on connection loss and multiplexes requests,
/// so a single clone per request is all the router needs.
#[derive(Clone)]
pub enum ValkeyConnectionInfo {
    Enabled { connection: Box<ConnectionManager> },
    Disabled,
}

impl ValkeyConnectionInfo {
    pub async fn new(valkey_url: &str) -> Result<Self, Error> {
        let client = Client::open(valkey_url).map_err(|e| {
            Error::new(ErrorDetails::ValkeyConnection {
                message: format!("Failed to create Valkey client: {e}"),
            })
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            Error::new(ErrorDetails::ValkeyConnection {
                message: format!("Failed to connect to Valkey: {e}"),
            })
        })?;

        Ok(Self::Enabled {
            connection: Box::new(connection),
        })
    }

    pub fn new_disabled() -> Self {
        Self::Disabled
    }

    pub fn get_connection(&self) -> Option<&ConnectionManager> {
        match self {
            Self::Enabled { connection } => Some(connection),
            Self::Disabled => None,
        }
    }
}

const HEALTH_CHECK_TIMEOUT_MS: u64 = 1000;

#[async_trait]
impl HealthCheckable for ValkeyConnectionInfo {
    async fn health(&self) -> Result<(), Error> {
        match self {
            Self::Disabled => Ok(()),
            Self::Enabled { connection } => {
                let check = async {
                    let mut conn = connection.as_ref().clone();
                    let _: String = conn.ping().await.map_err(|e| {
                        Error::new(ErrorDetails::ValkeyConnection {
                            message: format!("Valkey health check failed: {e}"),
                        })
                    })?;
                    Ok(())
                };

                match timeout(Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS), check).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::new(ErrorDetails::ValkeyConnection {
                        message: "Valkey health check timed out".to_string(),
                    })),
                }
            }
        }
    }
}
