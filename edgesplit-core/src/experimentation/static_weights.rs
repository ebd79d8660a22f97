use crate::config::test::TestDefinition;

use super::BucketId;
use super::random::UniformSource;

/// Pure function for static weights sampling.
///
/// Rolls a value in `[0, 100)` and walks the cumulative weights with control first.
/// A roll past the last cumulative weight (weights summing to less than 100, or
/// floating point drift) falls back to control.
pub(crate) fn sample_static_weights<U: UniformSource + ?Sized>(
    test: &TestDefinition,
    rng: &mut U,
) -> BucketId {
    let roll = rng.next_f64() * 100.0;
    if roll < test.control_weight {
        return BucketId::Control;
    }
    let mut cumulative = test.control_weight;
    for variant in &test.variants {
        cumulative += variant.weight;
        if cumulative > roll {
            return BucketId::Variant(variant.id.clone());
        }
    }
    BucketId::Control
}

/// The exact probability of each bucket under [`sample_static_weights`], in bucket order.
///
/// Cumulative weights past 100 can never be rolled, and any share left below 100 goes to control.
pub(crate) fn static_probabilities(test: &TestDefinition) -> Vec<(BucketId, f64)> {
    let control = test.control_weight.min(100.0);
    let mut probabilities = vec![(BucketId::Control, control / 100.0)];
    let mut cumulative = control;
    for variant in &test.variants {
        let next = (cumulative + variant.weight).min(100.0);
        probabilities.push((
            BucketId::Variant(variant.id.clone()),
            (next - cumulative) / 100.0,
        ));
        cumulative = next;
    }
    if let Some((_, control_share)) = probabilities.first_mut() {
        *control_share += (100.0 - cumulative) / 100.0;
    }
    probabilities
}
