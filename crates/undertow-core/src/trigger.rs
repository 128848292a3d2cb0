//! Random trials for sparse events, with odds that grow longer as a fade
//! progresses.

use crate::timing::Beats;
use rand::Rng;

/// True with probability `1/n`. `one_in(1)` always fires, `one_in(0)` never.
pub fn one_in<R: Rng + ?Sized>(rng: &mut R, n: u32) -> bool {
    match n {
        0 => false,
        1 => true,
        n => rng.random_range(0..n) == 0,
    }
}

/// True with probability `p`, clamped to `[0, 1]`.
pub fn chance<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    if !p.is_finite() {
        return false;
    }
    rng.random_bool(p.clamp(0.0, 1.0))
}

/// Linear fade from 1 at the epoch to 0 once `window` has elapsed.
///
/// A zero or negative window means the fade is already complete.
pub fn fade_factor(elapsed: Beats, window: Beats) -> f64 {
    if window.0 <= 0.0 {
        return 0.0;
    }
    (1.0 - elapsed.0.max(0.0) / window.0).clamp(0.0, 1.0)
}

/// Odds of a fading one-in-N trial.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerPolicy {
    /// One-in-N odds at full strength.
    pub base_odds: u32,
    /// How many times longer the odds get at zero fade.
    pub rarity: f64,
    /// Fade at or below which nothing fires.
    pub floor: f64,
    /// Shortest odds ever used.
    pub min_odds: u32,
}

impl TriggerPolicy {
    /// Policy for an event with per-trial probability `p` at full strength.
    pub fn from_chance(p: f64) -> Self {
        let base_odds = if p > 0.0 && p.is_finite() {
            (1.0 / p).round().max(1.0) as u32
        } else {
            u32::MAX
        };
        Self {
            base_odds,
            rarity: 4.0,
            floor: 0.02,
            min_odds: 2,
        }
    }

    /// One-in-N odds for the given fade, or `None` when suppressed.
    pub fn odds(&self, fade: f64) -> Option<u32> {
        if !(fade > self.floor) {
            return None;
        }
        let fade = fade.min(1.0);
        let base = self.base_odds as f64;
        let stretched = (base + (1.0 - fade) * base * (self.rarity - 1.0)).round();
        Some((stretched.min(u32::MAX as f64) as u32).max(self.min_odds))
    }

    /// Probability of a single trial firing at the given fade.
    pub fn effective_rate(&self, fade: f64) -> f64 {
        self.odds(fade).map_or(0.0, |n| 1.0 / n as f64)
    }

    pub fn trial<R: Rng + ?Sized>(&self, rng: &mut R, fade: f64) -> bool {
        self.odds(fade).is_some_and(|n| one_in(rng, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Tempo;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_chime_odds_across_fade() {
        let policy = TriggerPolicy::from_chance(0.14);
        assert_eq!(policy.base_odds, 7);
        assert_eq!(policy.odds(1.0), Some(7));
        assert_eq!(policy.odds(0.5), Some(18));
        assert_eq!(policy.odds(0.03), Some(27));
        assert_eq!(policy.odds(0.02), None);
        assert_eq!(policy.odds(0.0), None);
        assert_eq!(policy.odds(f64::NAN), None);
    }

    #[test]
    fn test_effective_rate_never_exceeds_half() {
        let policy = TriggerPolicy::from_chance(0.9);
        assert_eq!(policy.odds(1.0), Some(2));
        assert!((policy.effective_rate(1.0) - 0.5).abs() < 1e-12);
        assert_eq!(policy.effective_rate(0.0), 0.0);
    }

    #[test]
    fn test_fade_factor() {
        let window = Beats(1500.0);
        assert_eq!(fade_factor(Beats(0.0), window), 1.0);
        assert!((fade_factor(Beats(750.0), window) - 0.5).abs() < 1e-12);
        assert_eq!(fade_factor(Beats(3000.0), window), 0.0);
        assert_eq!(fade_factor(Beats(10.0), Beats(0.0)), 0.0);
    }

    #[test]
    fn test_effective_rate_only_falls_over_the_window() {
        let policy = TriggerPolicy::from_chance(0.14);
        let window = Beats(1500.0);
        let mut last = f64::INFINITY;
        for step in 0..=1600 {
            let rate = policy.effective_rate(fade_factor(Beats(step as f64), window));
            assert!(rate <= last, "rate rose at {step}: {last} -> {rate}");
            last = rate;
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn test_chime_window_in_seconds() {
        let tempo = Tempo::new(72.0);
        let policy = TriggerPolicy::from_chance(0.14);
        let window = tempo.seconds_to_beats(1500.0);
        assert!((window.0 - 1800.0).abs() < 1e-9);
        let rate_at = |seconds: f64| {
            policy.effective_rate(fade_factor(tempo.seconds_to_beats(seconds), window))
        };

        assert!((rate_at(0.0) - 1.0 / 7.0).abs() < 1e-12);
        // Half way the odds have stretched from 1 in 7 to 1 in 18.
        assert!((rate_at(750.0) - 1.0 / 18.0).abs() < 1e-12);
        assert!(rate_at(1200.0) < rate_at(750.0));
        assert!(rate_at(1200.0) > 0.0);
        assert_eq!(rate_at(1490.0), 0.0);
        assert_eq!(rate_at(1500.0), 0.0);
        assert_eq!(rate_at(4000.0), 0.0);
    }

    #[test]
    fn test_one_in_edges() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!((0..100).all(|_| one_in(&mut rng, 1)));
        assert!((0..100).all(|_| !one_in(&mut rng, 0)));
        let hits = (0..10_000).filter(|_| one_in(&mut rng, 4)).count();
        assert!((2000..3000).contains(&hits));
    }

    #[test]
    fn test_chance_clamps() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(chance(&mut rng, 1.5));
        assert!(!chance(&mut rng, -0.5));
        assert!(!chance(&mut rng, f64::NAN));
    }

    #[test]
    fn test_trial_suppressed_at_zero_fade() {
        let mut rng = StdRng::seed_from_u64(5);
        let policy = TriggerPolicy::from_chance(0.14);
        assert!((0..1000).all(|_| !policy.trial(&mut rng, 0.0)));
    }
}
