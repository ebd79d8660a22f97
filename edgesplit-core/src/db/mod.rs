use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::experimentation::BucketId;

pub mod memory;
pub mod valkey;

/// Point-in-time view and conversion counts for one bucket of one test.
///
/// These are written by the external sync job and only read here.
/// `conversions <= views` is expected but not enforced.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub views: u64,
    pub conversions: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsMetric {
    Views,
    Conversions,
}

impl StatsMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            StatsMetric::Views => "views",
            StatsMetric::Conversions => "conversions",
        }
    }
}

/// The typed identity of a single counter in the stats store.
///
/// This is the only place the key layout is defined; the sync job writes the same layout.
#[derive(Clone, Copy, Debug)]
pub struct StatsKey<'a> {
    pub test_id: &'a str,
    pub bucket_id: &'a BucketId,
    pub metric: StatsMetric,
}

impl<'a> StatsKey<'a> {
    pub fn new(test_id: &'a str, bucket_id: &'a BucketId, metric: StatsMetric) -> Self {
        Self {
            test_id,
            bucket_id,
            metric,
        }
    }

    /// Renders `{prefix}{test_id}:{metric}_{bucket_id}`, e.g. `test:pricing:views_control`.
    pub fn render(&self, prefix: &str) -> String {
        format!(
            "{prefix}{}:{}_{}",
            self.test_id,
            self.metric.as_str(),
            self.bucket_id
        )
    }
}

#[async_trait]
pub trait HealthCheckable {
    async fn health(&self) -> Result<(), Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatsQueries: Send + Sync {
    /// Returns `{0, 0}` when no record exists. Errors are reserved for backend failures.
    async fn get_bucket_stats(
        &self,
        test_id: &str,
        bucket_id: &BucketId,
    ) -> Result<BucketStats, Error>;
}

pub trait StatsStore: StatsQueries + HealthCheckable {}

impl<T: StatsQueries + HealthCheckable> StatsStore for T {}
