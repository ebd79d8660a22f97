//! Valkey-backed bucket statistics.

use async_trait::async_trait;
use redis::aio::ConnectionLike;

use crate::db::{BucketStats, HealthCheckable, StatsKey, StatsMetric, StatsQueries};
use crate::error::Error;
use crate::experimentation::BucketId;

use super::ValkeyConnectionInfo;

pub struct ValkeyStatsStore {
    connection: ValkeyConnectionInfo,
    key_prefix: String,
}

impl ValkeyStatsStore {
    pub fn new(connection: ValkeyConnectionInfo, key_prefix: String) -> Self {
        Self {
            connection,
            key_prefix,
        }
    }

    pub fn connection(&self) -> &ValkeyConnectionInfo {
        &self.connection
    }
}

/// Fetch both counters for a bucket in a single round trip.
async fn execute_get_bucket_stats<C: ConnectionLike>(
    conn: &mut C,
    views_key: &str,
    conversions_key: &str,
) -> Result<BucketStats, Error> {
    let values: Vec<Option<String>> = redis::cmd("MGET")
        .arg(views_key)
        .arg(conversions_key)
        .query_async(conn)
        .await?;

    let mut values = values.into_iter();
    Ok(BucketStats {
        views: parse_count(values.next().flatten().as_deref()),
        conversions: parse_count(values.next().flatten().as_deref()),
    })
}

/// Missing or unparseable counters read as 0; negative ones are clamped to 0.
fn parse_count(raw: Option<&str>) -> u64 {
    let Some(raw) = raw.map(str::trim) else {
        return 0;
    };
    if let Ok(value) = raw.parse::<i64>() {
        return value.max(0) as u64;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value.floor() as u64,
        Ok(_) => 0,
        Err(_) => {
            tracing::debug!("Ignoring unparseable stats counter value `{raw}`");
            0
        }
    }
}

#[async_trait]
impl StatsQueries for ValkeyStatsStore {
    async fn get_bucket_stats(
        &self,
        test_id: &str,
        bucket_id: &BucketId,
    ) -> Result<BucketStats, Error> {
        let Some(connection) = self.connection.get_connection() else {
            return Ok(BucketStats::default());
        };
        let views_key = StatsKey::new(test_id, bucket_id, StatsMetric::Views).render(&self.key_prefix);
        let conversions_key =
            StatsKey::new(test_id, bucket_id, StatsMetric::Conversions).render(&self.key_prefix);

        let mut conn = connection.clone();
        execute_get_bucket_stats(&mut conn, &views_key, &conversions_key).await
    }
}

#[async_trait]
impl HealthCheckable for ValkeyStatsStore {
    async fn health(&self) -> Result<(), Error> {
        self.connection.health().await
    }
}
