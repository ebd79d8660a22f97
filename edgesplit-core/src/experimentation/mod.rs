//! Bucket assignment: static weighted splits and Thompson Sampling.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use serde::{Serialize, Serializer};

use crate::config::test::TestDefinition;
use crate::db::{BucketStats, StatsQueries};
use crate::error::{Error, ErrorDetails};

pub mod random;
pub mod sampler;
mod static_weights;
mod thompson_sampling;

pub use random::{RandSource, UniformSource};
pub use sampler::Sampler;

/// Number of Thompson draws used to estimate win probabilities for operators.
pub const DISPLAY_PROBABILITY_DRAWS: usize = 1_000;

/// A bucket of a test: the control or one of its named variants.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BucketId {
    Control,
    Variant(String),
}

impl BucketId {
    pub const CONTROL_TOKEN: &'static str = "control";

    /// Interprets a cookie value, query parameter, or config id as a bucket id.
    pub fn from_token(token: &str) -> Self {
        if token == Self::CONTROL_TOKEN {
            BucketId::Control
        } else {
            BucketId::Variant(token.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BucketId::Control => Self::CONTROL_TOKEN,
            BucketId::Variant(id) => id,
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BucketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Stats for the buckets of one test, as loaded for a single request.
/// Buckets without an entry read as `{0, 0}`.
#[derive(Clone, Debug, Default)]
pub struct BucketStatsSnapshot {
    stats: HashMap<BucketId, BucketStats>,
}

impl BucketStatsSnapshot {
    pub fn insert(&mut self, bucket: BucketId, stats: BucketStats) {
        self.stats.insert(bucket, stats);
    }

    pub fn get(&self, bucket: &BucketId) -> BucketStats {
        self.stats.get(bucket).copied().unwrap_or_default()
    }

    /// Total views across the buckets of `test`. Entries for other buckets are ignored.
    pub fn total_views(&self, test: &TestDefinition) -> u64 {
        test.bucket_ids()
            .map(|bucket| self.get(&bucket).views)
            .fold(0u64, u64::saturating_add)
    }
}

impl FromIterator<(BucketId, BucketStats)> for BucketStatsSnapshot {
    fn from_iter<I: IntoIterator<Item = (BucketId, BucketStats)>>(iter: I) -> Self {
        Self {
            stats: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The test is not adaptive.
    Static,
    /// The test is adaptive but has not collected enough views yet.
    ColdStart,
    ThompsonSampling,
}

impl SelectionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionPolicy::Static => "static",
            SelectionPolicy::ColdStart => "cold_start",
            SelectionPolicy::ThompsonSampling => "thompson_sampling",
        }
    }

    /// Which policy applies to `test` given its current stats.
    pub fn for_test(test: &TestDefinition, stats: &BucketStatsSnapshot) -> Self {
        if !test.adaptive {
            return SelectionPolicy::Static;
        }
        let floor = (test.bucket_count() as u64)
            .saturating_mul(test.min_samples_per_bucket_before_adaptive);
        if stats.total_views(test) < floor {
            SelectionPolicy::ColdStart
        } else {
            SelectionPolicy::ThompsonSampling
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub bucket: BucketId,
    pub policy: SelectionPolicy,
}

/// Picks a bucket for a visitor who has no assignment yet.
///
/// Never fails and always returns one of the test's buckets. `stats` is only
/// consulted for adaptive tests.
pub fn select_bucket<U: UniformSource + ?Sized>(
    test: &TestDefinition,
    stats: &BucketStatsSnapshot,
    rng: &mut U,
) -> Selection {
    let policy = SelectionPolicy::for_test(test, stats);
    let bucket = match policy {
        SelectionPolicy::Static | SelectionPolicy::ColdStart => {
            static_weights::sample_static_weights(test, rng)
        }
        SelectionPolicy::ThompsonSampling => thompson_sampling::sample_thompson(test, stats, rng),
    };
    Selection { bucket, policy }
}

/// Loads stats for every bucket of `test` concurrently.
///
/// Each lookup is bounded by `timeout`. A lookup that fails or times out reads
/// as `{0, 0}` so that routing never waits on, or fails because of, the store.
pub async fn load_bucket_stats<S: StatsQueries + ?Sized>(
    store: &S,
    test: &TestDefinition,
    timeout: Duration,
) -> BucketStatsSnapshot {
    let lookups = test.bucket_ids().map(|bucket| async move {
        let result = tokio::time::timeout(timeout, store.get_bucket_stats(&test.id, &bucket)).await;
        let stats = match result {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                record_lookup_failure(test, &bucket, &e);
                BucketStats::default()
            }
            Err(_) => {
                let e = Error::new_without_logging(ErrorDetails::StatsStoreTimeout {
                    test_id: test.id.clone(),
                    bucket_id: bucket.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
                record_lookup_failure(test, &bucket, &e);
                BucketStats::default()
            }
        };
        (bucket, stats)
    });
    join_all(lookups).await.into_iter().collect()
}

fn record_lookup_failure(test: &TestDefinition, bucket: &BucketId, error: &Error) {
    tracing::warn!(
        test_id = %test.id,
        bucket_id = %bucket,
        "Stats lookup failed, treating bucket as having no data: {error}"
    );
    metrics::counter!(
        "edgesplit_stats_lookup_failures_total",
        "test_id" => test.id.clone()
    )
    .increment(1);
}

#[derive(Clone, Debug, Serialize)]
pub struct BucketProbability {
    pub bucket_id: BucketId,
    pub probability: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DisplayProbabilities {
    pub test_id: String,
    pub policy: SelectionPolicy,
    pub buckets: Vec<BucketProbability>,
}

/// The probability that a new visitor lands in each bucket right now.
///
/// For static and cold-start tests these are the exact shares of the weighted
/// draw. Past the cold-start floor they are a Monte-Carlo estimate of each
/// bucket's Thompson win probability over `draws` samples.
pub fn display_probabilities<U: UniformSource + ?Sized>(
    test: &TestDefinition,
    stats: &BucketStatsSnapshot,
    rng: &mut U,
    draws: usize,
) -> DisplayProbabilities {
    let policy = SelectionPolicy::for_test(test, stats);
    let probabilities = match policy {
        SelectionPolicy::Static | SelectionPolicy::ColdStart => {
            static_weights::static_probabilities(test)
        }
        SelectionPolicy::ThompsonSampling => {
            let mut wins: HashMap<BucketId, usize> = HashMap::new();
            for _ in 0..draws {
                *wins
                    .entry(thompson_sampling::sample_thompson(test, stats, rng))
                    .or_default() += 1;
            }
            let draws = draws.max(1) as f64;
            test.bucket_ids()
                .map(|bucket| {
                    let count = wins.get(&bucket).copied().unwrap_or_default();
                    (bucket, count as f64 / draws)
                })
                .collect()
        }
    };
    DisplayProbabilities {
        test_id: test.id.clone(),
        policy,
        buckets: probabilities
            .into_iter()
            .map(|(bucket_id, probability)| BucketProbability {
                bucket_id,
                probability,
            })
            .collect(),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::test_helpers::definition;
    use super::*;
    use crate::db::MockStatsQueries;
    use crate::experimentation::random::SequenceSource;

    fn snapshot(entries: &[(BucketId, u64, u64)]) -> BucketStatsSnapshot {
        entries
            .iter()
            .map(|(bucket, views, conversions)| {
                (
                    bucket.clone(),
                    BucketStats {
                        views: *views,
                        conversions: *conversions,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_bucket_id_tokens() {
        assert_eq!(BucketId::from_token("control"), BucketId::Control);
        assert_eq!(
            BucketId::from_token("variant1"),
            BucketId::Variant("variant1".to_string())
        );
        assert_eq!(BucketId::Control.to_string(), "control");
        assert_eq!(
            serde_json::to_value(BucketId::Variant("b".to_string())).unwrap(),
            serde_json::json!("b")
        );
    }

    #[test]
    fn test_static_test_ignores_stats() {
        let test = definition(50.0, &[("b", 50.0)], false);
        let stats = snapshot(&[(BucketId::Control, 100_000, 0)]);
        let mut source = SequenceSource::new(vec![0.75]);
        let selection = select_bucket(&test, &stats, &mut source);
        assert_eq!(selection.policy, SelectionPolicy::Static);
        assert_eq!(selection.bucket, BucketId::Variant("b".to_string()));
        assert_eq!(source.draws(), 1);
    }

    #[test]
    fn test_cold_start_uses_static_weights() {
        let test = definition(50.0, &[("b", 50.0)], true);
        // 199 total views is below the 2 * 100 floor
        let stats = snapshot(&[
            (BucketId::Control, 150, 149),
            (BucketId::Variant("b".to_string()), 49, 0),
        ]);
        let mut source = SequenceSource::new(vec![0.25]);
        let selection = select_bucket(&test, &stats, &mut source);
        assert_eq!(selection.policy, SelectionPolicy::ColdStart);
        assert_eq!(selection.bucket, BucketId::Control);
        // Exactly one uniform draw: the static roll, no Beta sampling
        assert_eq!(source.draws(), 1);
    }

    #[test]
    fn test_floor_reached_switches_to_thompson() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let stats = snapshot(&[
            (BucketId::Control, 100, 1),
            (BucketId::Variant("b".to_string()), 100, 60),
        ]);
        let mut source = RandSource(StdRng::seed_from_u64(31));
        let selection = select_bucket(&test, &stats, &mut source);
        assert_eq!(selection.policy, SelectionPolicy::ThompsonSampling);
        assert!(test.contains_bucket(&selection.bucket));
    }

    #[test]
    fn test_floor_scales_with_bucket_count() {
        let test = definition(34.0, &[("b", 33.0), ("c", 33.0)], true);
        let stats = snapshot(&[
            (BucketId::Control, 100, 0),
            (BucketId::Variant("b".to_string()), 100, 0),
            (BucketId::Variant("c".to_string()), 99, 0),
        ]);
        assert_eq!(
            SelectionPolicy::for_test(&test, &stats),
            SelectionPolicy::ColdStart
        );
    }

    #[test]
    fn test_stats_for_unknown_buckets_are_ignored() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let stats = snapshot(&[(BucketId::Variant("removed".to_string()), 10_000, 5_000)]);
        assert_eq!(stats.total_views(&test), 0);
        assert_eq!(
            SelectionPolicy::for_test(&test, &stats),
            SelectionPolicy::ColdStart
        );
    }

    #[tokio::test]
    async fn test_load_bucket_stats_queries_every_bucket() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let mut store = MockStatsQueries::new();
        store
            .expect_get_bucket_stats()
            .times(2)
            .returning(|test_id, bucket| {
                assert_eq!(test_id, "pricing");
                Ok(match bucket {
                    BucketId::Control => BucketStats {
                        views: 300,
                        conversions: 30,
                    },
                    BucketId::Variant(_) => BucketStats {
                        views: 200,
                        conversions: 40,
                    },
                })
            });

        let stats = load_bucket_stats(&store, &test, Duration::from_millis(250)).await;
        assert_eq!(stats.get(&BucketId::Control).views, 300);
        assert_eq!(
            stats.get(&BucketId::Variant("b".to_string())).conversions,
            40
        );
        assert_eq!(stats.total_views(&test), 500);
    }

    #[tokio::test]
    async fn test_load_bucket_stats_degrades_errors_to_zero() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let mut store = MockStatsQueries::new();
        store
            .expect_get_bucket_stats()
            .returning(|_, bucket| match bucket {
                BucketId::Control => Ok(BucketStats {
                    views: 10,
                    conversions: 1,
                }),
                BucketId::Variant(_) => Err(Error::new_without_logging(
                    ErrorDetails::ValkeyQuery {
                        message: "connection reset".to_string(),
                    },
                )),
            });

        let stats = load_bucket_stats(&store, &test, Duration::from_millis(250)).await;
        assert_eq!(stats.get(&BucketId::Control).views, 10);
        assert_eq!(
            stats.get(&BucketId::Variant("b".to_string())),
            BucketStats::default()
        );
    }

    struct SlowStore {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StatsQueries for SlowStore {
        async fn get_bucket_stats(
            &self,
            _test_id: &str,
            _bucket_id: &BucketId,
        ) -> Result<BucketStats, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(BucketStats {
                views: 1,
                conversions: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_load_bucket_stats_times_out_to_zero() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let calls = Arc::new(AtomicUsize::new(0));
        let store = SlowStore {
            calls: calls.clone(),
        };

        let stats = load_bucket_stats(&store, &test, Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.get(&BucketId::Control), BucketStats::default());
        assert_eq!(
            stats.get(&BucketId::Variant("b".to_string())),
            BucketStats::default()
        );
    }

    #[test]
    fn test_display_probabilities_static() {
        let test = definition(40.0, &[("b", 60.0)], false);
        let mut source = SequenceSource::new(vec![0.5]);
        let probabilities = display_probabilities(
            &test,
            &BucketStatsSnapshot::default(),
            &mut source,
            DISPLAY_PROBABILITY_DRAWS,
        );
        assert_eq!(probabilities.policy, SelectionPolicy::Static);
        assert_eq!(probabilities.buckets.len(), 2);
        assert_eq!(probabilities.buckets[0].probability, 0.4);
        assert_eq!(probabilities.buckets[1].probability, 0.6);
        // Static shares are exact and need no randomness
        assert_eq!(source.draws(), 0);
    }

    #[test]
    fn test_display_probabilities_thompson() {
        let test = definition(50.0, &[("b", 50.0)], true);
        let stats = snapshot(&[
            (BucketId::Control, 1000, 500),
            (BucketId::Variant("b".to_string()), 1000, 100),
        ]);
        let mut source = RandSource(StdRng::seed_from_u64(32));
        let probabilities =
            display_probabilities(&test, &stats, &mut source, DISPLAY_PROBABILITY_DRAWS);
        assert_eq!(probabilities.policy, SelectionPolicy::ThompsonSampling);
        let total: f64 = probabilities.buckets.iter().map(|b| b.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(probabilities.buckets[0].probability > 0.9);

        let json = serde_json::to_value(&probabilities).unwrap();
        assert_eq!(json["policy"], "thompson_sampling");
        assert_eq!(json["buckets"][0]["bucket_id"], "control");
    }
}
