use crate::config::test::TestDefinition;

use super::random::UniformSource;
use super::sampler::Sampler;
use super::{BucketId, BucketStatsSnapshot};

/// Draws one posterior sample per bucket and returns the bucket with the largest draw.
///
/// Each bucket's conversion rate has a Beta(conversions + 1, failures + 1) posterior
/// under a uniform prior. Failures are computed in floating point, so corrupt stats
/// (more conversions than views) produce a non-positive parameter that the Beta
/// sampler clamps.
pub(crate) fn sample_thompson<U: UniformSource + ?Sized>(
    test: &TestDefinition,
    stats: &BucketStatsSnapshot,
    rng: &mut U,
) -> BucketId {
    let samples = test.bucket_ids().map(|bucket| {
        let bucket_stats = stats.get(&bucket);
        let conversions = bucket_stats.conversions as f64;
        let views = bucket_stats.views as f64;
        let alpha = conversions + 1.0;
        let beta = (views - conversions) + 1.0;
        let sample = rng.beta(alpha, beta);
        (bucket, sample)
    });
    first_strict_max(samples).unwrap_or(BucketId::Control)
}

/// Returns the item with the strictly greatest score; on ties the earliest item wins.
/// NaN scores never win.
pub(crate) fn first_strict_max<T>(scored: impl IntoIterator<Item = (T, f64)>) -> Option<T> {
    let mut best: Option<(T, f64)> = None;
    for (item, score) in scored {
        if score.is_nan() {
            continue;
        }
        if best
            .as_ref()
            .is_none_or(|(_, best_score)| score > *best_score)
        {
            best = Some((item, score));
        }
    }
    best.map(|(item, _)| item)
}
