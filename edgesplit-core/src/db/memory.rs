use async_trait::async_trait;
use dashmap::DashMap;

use crate::db::{BucketStats, HealthCheckable, StatsQueries};
use crate::error::Error;
use crate::experimentation::BucketId;

/// A process-local stats store for local development and tests.
#[derive(Debug, Default)]
pub struct InMemoryStatsStore {
    stats: DashMap<(String, BucketId), BucketStats>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bucket_stats(&self, test_id: &str, bucket_id: BucketId, stats: BucketStats) {
        self.stats.insert((test_id.to_string(), bucket_id), stats);
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

#[async_trait]
impl StatsQueries for InMemoryStatsStore {
    async fn get_bucket_stats(
        &self,
        test_id: &str,
        bucket_id: &BucketId,
    ) -> Result<BucketStats, Error> {
        Ok(self
            .stats
            .get(&(test_id.to_string(), bucket_id.clone()))
            .map(|entry| *entry.value())
            .unwrap_or_default())
    }
}

#[async_trait]
impl HealthCheckable for InMemoryStatsStore {
    async fn health(&self) -> Result<(), Error> {
        Ok(())
    }
}
