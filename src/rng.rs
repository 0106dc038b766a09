//! Seedable Random Number Generation
//!
//! Excitation phases and graph rewiring both draw from a small Xorshift128+
//! generator owned by the component that needs it. There is no global RNG:
//! every node and every topology carries its own stream, so a fixed seed
//! reproduces an entire session.
//!
//! With the `std` feature, [`Rng::from_entropy`] seeds from the `rand`
//! thread RNG. Without it, a fixed default seed is used.

use core::f64::consts::TAU;

/// A seedable random number generator using Xorshift128+.
///
/// Fast and allocation-free, so it is safe to call from the control cycle.
#[derive(Debug, Clone, Copy)]
pub struct Rng {
    s0: u64,
    s1: u64,
}

impl Rng {
    /// Create a new RNG with the given state words.
    ///
    /// The words should not both be zero.
    #[inline]
    pub const fn new(s0: u64, s1: u64) -> Self {
        let s0 = if s0 == 0 && s1 == 0 { 1 } else { s0 };
        Self { s0, s1 }
    }

    /// Create a new RNG from a single 64-bit seed.
    #[inline]
    pub fn from_seed(seed: u64) -> Self {
        let s0 = splitmix64(seed);
        let s1 = splitmix64(seed.wrapping_add(0x9e3779b97f4a7c15));
        Self::new(s0, s1)
    }

    /// Create a new RNG seeded from the thread RNG.
    #[cfg(feature = "std")]
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random::<u64>())
    }

    /// Create a new RNG with the fixed default seed.
    #[cfg(not(feature = "std"))]
    pub fn from_entropy() -> Self {
        Self::new(0x853c49e6748fea9b, 0xda3e39cb94b95bdb)
    }

    /// Derive an independent stream for a numbered child (voice, node, ...).
    pub fn fork(&mut self, stream: u64) -> Self {
        Self::from_seed(self.next_u64() ^ splitmix64(stream))
    }

    /// Generate the next u64 value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);

        result
    }

    /// Generate a random f64 in the range [0.0, 1.0).
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Generate a random f64 in the range [-1.0, 1.0).
    #[inline]
    pub fn next_f64_bipolar(&mut self) -> f64 {
        self.next_f64() * 2.0 - 1.0
    }

    /// Uniform angle in [0, 2π).
    #[inline]
    pub fn next_phase(&mut self) -> f64 {
        self.next_f64() * TAU
    }

    /// Uniform index in `0..bound`. Returns 0 when `bound` is 0.
    #[inline]
    pub fn next_below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        ((self.next_f64() * bound as f64) as usize).min(bound - 1)
    }

    /// Generate a random bool with the given probability (0.0 to 1.0).
    #[inline]
    pub fn next_bool_with_probability(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

/// Splitmix64 mixing function for deriving state from seeds.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(54321);
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_phase_range() {
        let mut rng = Rng::from_seed(42);

        for _ in 0..1000 {
            let p = rng.next_phase();
            assert!((0.0..TAU).contains(&p), "Phase {} out of range", p);
        }
    }

    #[test]
    fn test_next_below_covers_range() {
        let mut rng = Rng::from_seed(7);
        let mut seen = [false; 5];

        for _ in 0..1000 {
            let i = rng.next_below(5);
            assert!(i < 5);
            seen[i] = true;
        }

        assert!(seen.iter().all(|&s| s));
        assert_eq!(rng.next_below(0), 0);
    }

    #[test]
    fn test_probability() {
        let mut rng = Rng::from_seed(42);
        let count = 10000;
        let hits = (0..count)
            .filter(|_| rng.next_bool_with_probability(0.3))
            .count();

        let ratio = hits as f64 / count as f64;
        assert!((ratio - 0.3).abs() < 0.03, "Ratio {} too far from 0.3", ratio);
    }

    #[test]
    fn test_fork_streams_differ() {
        let mut parent = Rng::from_seed(1);
        let mut a = parent.fork(0);
        let mut b = parent.fork(1);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_zero_seed_handling() {
        let mut rng = Rng::new(0, 0);
        let v = rng.next_f64();
        assert!((0.0..1.0).contains(&v));
    }
}
