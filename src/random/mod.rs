//! Random-number streams feeding job sources.
//!
//! A stream yields a lazy, effectively infinite sequence of doubles. Every
//! stream is deterministic given its seed, and cloning duplicates the
//! generator state: a clone consumed in the same order produces the exact
//! same sequence as the original.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// A lazy sequence of `f64` samples.
pub trait DblStream: Send {
    /// Produces the next value of the sequence.
    fn next_value(&mut self) -> f64;

    /// Re-initializes the stream's generator. Streams without a generator
    /// (constant sequences) ignore this.
    fn reseed(&mut self, _seed: u64) {}

    fn clone_stream(&self) -> Box<dyn DblStream>;
}

impl Clone for Box<dyn DblStream> {
    fn clone(&self) -> Self {
        self.clone_stream()
    }
}

/// Cycles a fixed vector of values indefinitely.
#[derive(Debug, Clone)]
pub struct DblConst {
    values: Vec<f64>,
    next: usize,
}

impl DblConst {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        let values = values.into();
        assert!(!values.is_empty(), "DblConst requires at least one value");
        Self { values, next: 0 }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl DblStream for DblConst {
    fn next_value(&mut self) -> f64 {
        let v = self.values[self.next];
        // wrap around
        self.next += 1;
        if self.next == self.values.len() {
            self.next = 0;
        }
        v
    }

    fn clone_stream(&self) -> Box<dyn DblStream> {
        Box::new(self.clone())
    }
}

/// Exponentially distributed samples with the given mean.
#[derive(Debug, Clone)]
pub struct DblExp {
    mean: f64,
    rng: ChaCha8Rng,
}

impl DblExp {
    pub fn new(mean: f64, seed: u64) -> Self {
        assert!(mean > 0.0, "mean of an exponential must be positive");
        Self {
            mean,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl DblStream for DblExp {
    fn next_value(&mut self) -> f64 {
        // inverse transform; 1-u keeps the argument strictly positive
        let u: f64 = self.rng.random();
        -self.mean * (1.0 - u).ln()
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn clone_stream(&self) -> Box<dyn DblStream> {
        Box::new(self.clone())
    }
}

/// Uniformly distributed samples over `[min, max)`.
#[derive(Debug, Clone)]
pub struct DblUniform {
    min: f64,
    max: f64,
    rng: ChaCha8Rng,
}

impl DblUniform {
    pub fn new(min: f64, max: f64, seed: u64) -> Self {
        assert!(min < max, "empty uniform range");
        Self {
            min,
            max,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl DblStream for DblUniform {
    fn next_value(&mut self) -> f64 {
        self.rng.random_range(self.min..self.max)
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn clone_stream(&self) -> Box<dyn DblStream> {
        Box::new(self.clone())
    }
}
