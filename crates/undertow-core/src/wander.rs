//! Bounded random walks for slowly drifting parameters.
//!
//! Each walk is keyed by name so independent voices can drift different
//! parameters without stepping on each other, and the same key called from
//! two places moves one shared walk.

use rand::Rng;
use std::collections::HashMap;

/// Fraction of `depth` a single call can move the offset.
const STEP_SCALE: f64 = 0.08;

/// Persistent state of one walk.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WanderState {
    /// Accumulated phase. Advances by the caller's step but does not shape
    /// the output.
    pub cursor: f64,
    /// Current offset from the base, always within `[-depth, depth]`.
    pub offset: f64,
}

/// All walks, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct WanderBank {
    walks: HashMap<String, WanderState>,
}

impl WanderBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the walk named `key` one step and return `base + offset`.
    ///
    /// A missing key starts at offset zero. Negative depth is treated as its
    /// magnitude; zero depth pins the offset at zero.
    pub fn wander<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        base: f64,
        depth: f64,
        step: f64,
        key: &str,
    ) -> f64 {
        let depth = if depth.is_finite() { depth.abs() } else { 0.0 };
        let state = self.walks.entry(key.to_string()).or_default();
        state.cursor += step;
        let nudge = if depth > 0.0 {
            rng.random_range(-depth..=depth) * STEP_SCALE
        } else {
            0.0
        };
        state.offset = (state.offset + nudge).clamp(-depth, depth);
        base + state.offset
    }

    pub fn get(&self, key: &str) -> Option<WanderState> {
        self.walks.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.walks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_offset_stays_within_depth() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut bank = WanderBank::new();
        for _ in 0..10_000 {
            let value = bank.wander(&mut rng, 75.0, 7.0, 0.03, "drone_cut");
            assert!((68.0..=82.0).contains(&value));
        }
        let state = bank.get("drone_cut").unwrap();
        assert!(state.offset.abs() <= 7.0);
        assert!((state.cursor - 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_first_call_starts_near_base() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bank = WanderBank::new();
        let value = bank.wander(&mut rng, 0.0, 0.22, 0.05, "climate");
        assert!(value.abs() <= 0.22 * STEP_SCALE + 1e-12);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut bank = WanderBank::new();
        bank.wander(&mut rng, 0.0, 1.0, 1.0, "a");
        bank.wander(&mut rng, 0.0, 1.0, 1.0, "a");
        bank.wander(&mut rng, 0.0, 1.0, 1.0, "b");
        assert_eq!(bank.len(), 2);
        assert!((bank.get("a").unwrap().cursor - 2.0).abs() < 1e-12);
        assert!((bank.get("b").unwrap().cursor - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_and_negative_depth() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut bank = WanderBank::new();
        assert_eq!(bank.wander(&mut rng, 5.0, 0.0, 0.1, "flat"), 5.0);
        for _ in 0..1000 {
            let v = bank.wander(&mut rng, 0.0, -0.5, 0.1, "neg");
            assert!(v.abs() <= 0.5);
        }
    }

    #[test]
    fn test_same_seed_same_walk() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut bank = WanderBank::new();
            (0..50)
                .map(|_| bank.wander(&mut rng, 0.0, 0.22, 0.05, "climate"))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }
}
