use rand::RngExt;

/// A source of uniform draws in `[0, 1)`.
///
/// Everything that consumes randomness in the bucket-assignment path takes one
/// of these explicitly, so tests can drive selection with a seeded or scripted
/// generator instead of an ambient one.
pub trait UniformSource {
    /// Returns a value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

/// Adapts any `rand` generator into a `UniformSource`.
#[derive(Debug)]
pub struct RandSource<R>(pub R);

impl RandSource<rand::rngs::ThreadRng> {
    /// A source backed by the thread-local generator.
    ///
    /// `ThreadRng` is `!Send`, so this must not be held across an `.await`.
    pub fn thread() -> Self {
        Self(rand::rng())
    }
}

impl<R: RngExt> UniformSource for RandSource<R> {
    fn next_f64(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

impl<U: UniformSource + ?Sized> UniformSource for &mut U {
    fn next_f64(&mut self) -> f64 {
        (**self).next_f64()
    }
}

/// Replays a fixed sequence of values, wrapping around at the end.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct SequenceSource {
    values: Vec<f64>,
    position: usize,
}

#[cfg(test)]
impl SequenceSource {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "SequenceSource needs at least one value");
        Self {
            values,
            position: 0,
        }
    }

    pub(crate) fn draws(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
impl UniformSource for SequenceSource {
    fn next_f64(&mut self) -> f64 {
        let value = self.values[self.position % self.values.len()];
        self.position += 1;
        value
    }
}
