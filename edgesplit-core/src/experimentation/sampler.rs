//! Continuous random variates built on top of a [`UniformSource`].
//!
//! Only the three distributions that Thompson Sampling over Bernoulli outcomes
//! needs are provided: a standard normal (Box–Muller), a Gamma (Marsaglia–Tsang,
//! with the `shape < 1` boost), and a Beta derived from two Gammas.

use std::f64::consts::PI;

use super::random::UniformSource;

/// Smallest shape parameter handed to the Gamma sampler by [`Sampler::beta`].
///
/// Corrupt stats (e.g. more conversions than views) can produce a non-positive
/// Beta parameter; those are raised to this value instead of failing.
pub const MIN_BETA_PARAMETER: f64 = 1e-6;

/// Random variate generation for any [`UniformSource`].
///
/// The Gamma sampler is an accept/reject loop with no iteration cap. Its
/// acceptance probability is bounded away from zero for every `shape > 0`, so
/// the expected number of iterations is small and bounded.
pub trait Sampler: UniformSource {
    /// A uniform draw in `[0, 1)`.
    fn uniform(&mut self) -> f64 {
        self.next_f64()
    }

    /// A draw from Normal(0, 1) using the Box–Muller transform.
    fn standard_normal(&mut self) -> f64 {
        // `u1` must be strictly positive so that `ln(u1)` is finite.
        let mut u1 = self.next_f64();
        while u1 <= 0.0 {
            u1 = self.next_f64();
        }
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// A draw from Gamma(shape, scale). `shape` must be positive.
    fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        if shape < 1.0 {
            // Boost: Gamma(k) = Gamma(k + 1) * U^(1/k)
            let boosted = self.gamma(shape + 1.0, scale);
            return boosted * self.next_f64().powf(1.0 / shape);
        }

        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = self.standard_normal();
            let v = (1.0 + c * x).powi(3);
            if v <= 0.0 {
                continue;
            }
            let u = self.next_f64();
            if u < 1.0 - 0.0331 * x.powi(4) || u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
                return d * v * scale;
            }
        }
    }

    /// A draw from Beta(alpha, beta), always in `[0, 1]`.
    fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        let alpha = clamp_beta_parameter(alpha);
        let beta = clamp_beta_parameter(beta);
        let x = self.gamma(alpha, 1.0);
        let y = self.gamma(beta, 1.0);
        let total = x + y;
        // Both Gammas can underflow to zero when the shapes are clamped to the minimum.
        if !total.is_finite() || total <= 0.0 {
            return 0.5;
        }
        (x / total).clamp(0.0, 1.0)
    }
}

impl<U: UniformSource + ?Sized> Sampler for U {}

fn clamp_beta_parameter(value: f64) -> f64 {
    if value.is_finite() && value > MIN_BETA_PARAMETER {
        value
    } else {
        MIN_BETA_PARAMETER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experimentation::random::{RandSource, SequenceSource};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn seeded(seed: u64) -> RandSource<StdRng> {
        RandSource(StdRng::seed_from_u64(seed))
    }

    fn mean_and_variance(samples: &[f64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, variance)
    }

    #[test]
    fn test_standard_normal_box_muller_formula() {
        let mut source = SequenceSource::new(vec![0.25, 0.125]);
        let expected = (-2.0 * 0.25_f64.ln()).sqrt() * (2.0 * PI * 0.125).cos();
        let value = source.standard_normal();
        assert!((value - expected).abs() < 1e-12);
        assert_eq!(source.draws(), 2);
    }

    #[test]
    fn test_standard_normal_resamples_zero() {
        // The first draw is exactly zero and must be discarded.
        let mut source = SequenceSource::new(vec![0.0, 0.25, 0.125]);
        let expected = (-2.0 * 0.25_f64.ln()).sqrt() * (2.0 * PI * 0.125).cos();
        let value = source.standard_normal();
        assert!(value.is_finite());
        assert!((value - expected).abs() < 1e-12);
        assert_eq!(source.draws(), 3);
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut source = seeded(1);
        let samples: Vec<f64> = (0..100_000).map(|_| source.standard_normal()).collect();
        let (mean, variance) = mean_and_variance(&samples);
        assert!(mean.abs() < 0.02, "mean = {mean}");
        assert!((variance - 1.0).abs() < 0.03, "variance = {variance}");
    }

    #[test]
    fn test_gamma_moments_shape_above_one() {
        let mut source = seeded(2);
        let (shape, scale) = (2.5, 2.0);
        let samples: Vec<f64> = (0..100_000).map(|_| source.gamma(shape, scale)).collect();
        let (mean, variance) = mean_and_variance(&samples);
        // Gamma(k, θ): mean kθ, variance kθ²
        assert!((mean - 5.0).abs() < 0.1, "mean = {mean}");
        assert!((variance - 10.0).abs() < 0.5, "variance = {variance}");
        assert!(samples.iter().all(|x| *x > 0.0));
    }

    #[test]
    fn test_gamma_moments_shape_below_one() {
        let mut source = seeded(3);
        let samples: Vec<f64> = (0..100_000).map(|_| source.gamma(0.3, 1.0)).collect();
        let (mean, variance) = mean_and_variance(&samples);
        assert!((mean - 0.3).abs() < 0.02, "mean = {mean}");
        assert!((variance - 0.3).abs() < 0.05, "variance = {variance}");
        assert!(samples.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_beta_uniform_prior_moments() {
        let mut source = seeded(4);
        let samples: Vec<f64> = (0..100_000).map(|_| source.beta(1.0, 1.0)).collect();
        assert!(samples.iter().all(|x| (0.0..=1.0).contains(x)));
        let (mean, variance) = mean_and_variance(&samples);
        assert!((mean - 0.5).abs() < 0.01, "mean = {mean}");
        assert!((variance - 1.0 / 12.0).abs() < 0.005, "variance = {variance}");
    }

    #[test]
    fn test_beta_posterior_mean() {
        let mut source = seeded(5);
        // 500 successes, 500 failures under a uniform prior
        let samples: Vec<f64> = (0..20_000).map(|_| source.beta(501.0, 501.0)).collect();
        let (mean, _) = mean_and_variance(&samples);
        assert!((mean - 0.5).abs() < 0.005, "mean = {mean}");

        let samples: Vec<f64> = (0..20_000).map(|_| source.beta(101.0, 901.0)).collect();
        let (mean, _) = mean_and_variance(&samples);
        assert!((mean - 101.0 / 1002.0).abs() < 0.005, "mean = {mean}");
    }

    #[test]
    fn test_beta_bounds_across_parameters() {
        let mut source = seeded(6);
        let parameters = [
            (1e-6, 1e-6),
            (1e-6, 1.0),
            (0.5, 0.5),
            (1.0, 1000.0),
            (1000.0, 1.0),
            (3.0, 7.0),
            (1e5, 1e5),
        ];
        for (alpha, beta) in parameters {
            for _ in 0..2_000 {
                let value = source.beta(alpha, beta);
                assert!(
                    (0.0..=1.0).contains(&value),
                    "Beta({alpha}, {beta}) produced {value}"
                );
            }
        }
    }

    #[test]
    fn test_beta_degenerate_parameters_are_clamped() {
        let mut source = seeded(7);
        let parameters = [
            (0.0, 0.0),
            (-5.0, 1.0),
            (1.0, -400.0),
            (f64::NAN, 2.0),
            (2.0, f64::NEG_INFINITY),
        ];
        for (alpha, beta) in parameters {
            for _ in 0..1_000 {
                let value = source.beta(alpha, beta);
                assert!(
                    (0.0..=1.0).contains(&value),
                    "Beta({alpha}, {beta}) produced {value}"
                );
            }
        }
    }

    #[test]
    fn test_clamp_beta_parameter() {
        assert_eq!(clamp_beta_parameter(2.0), 2.0);
        assert_eq!(clamp_beta_parameter(0.0), MIN_BETA_PARAMETER);
        assert_eq!(clamp_beta_parameter(-1.0), MIN_BETA_PARAMETER);
        assert_eq!(clamp_beta_parameter(f64::NAN), MIN_BETA_PARAMETER);
    }
}
