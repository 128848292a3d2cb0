//! Timing primitives for scheduling voices.
//!
//! - [`BeatTime`] - Fixed-point beat position, the scheduler's notion of "now"
//! - [`Beats`] - A duration in beats as returned by voice steps
//! - [`TimeSignature`] - Bar length used by the form conductor
//! - [`Tempo`] - Conversion between beats and wall-clock seconds
//! - [`Clock`] - Where the engine gets "how long until" from: [`VirtualClock`]
//!   for renders and tests, [`WallClock`] for live playback

use std::time::{Duration, Instant};

/// Fixed-point beat representation with 16 fractional bits.
///
/// Hours of accumulated `sleep` values never drift the way a running `f64`
/// sum would.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BeatTime {
    beats: i64,
}

impl BeatTime {
    const SCALE: i64 = 65_536;

    /// Zero beat time constant.
    pub const ZERO: BeatTime = BeatTime { beats: 0 };

    /// Create a BeatTime from a floating-point beat value.
    #[inline]
    pub fn from_float(value: f64) -> Self {
        Self {
            beats: (value * Self::SCALE as f64).round() as i64,
        }
    }

    /// Convert to a floating-point beat value.
    #[inline]
    pub fn to_float(self) -> f64 {
        self.beats as f64 / Self::SCALE as f64
    }

    /// Duration elapsed since `earlier`, never negative.
    pub fn since(self, earlier: BeatTime) -> Beats {
        if self <= earlier {
            Beats(0.0)
        } else {
            Beats((self - earlier).to_float())
        }
    }
}

impl std::ops::Add for BeatTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_add(rhs.beats),
        }
    }
}

impl std::ops::Sub for BeatTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_sub(rhs.beats),
        }
    }
}

impl std::ops::Add<Beats> for BeatTime {
    type Output = Self;

    fn add(self, rhs: Beats) -> Self::Output {
        self + BeatTime::from_float(rhs.0)
    }
}

impl From<f64> for BeatTime {
    fn from(value: f64) -> Self {
        BeatTime::from_float(value)
    }
}

impl From<BeatTime> for f64 {
    fn from(value: BeatTime) -> Self {
        value.to_float()
    }
}

/// Wrapper type for beats (floating-point).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default)]
pub struct Beats(pub f64);

impl Beats {
    /// Get the beat value as f64.
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Negative and non-finite durations collapse to zero.
    pub fn sanitized(self) -> Beats {
        if self.0.is_finite() && self.0 > 0.0 {
            self
        } else {
            Beats(0.0)
        }
    }
}

impl std::ops::Add for Beats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Beats(self.0 + rhs.0)
    }
}

/// Musical time signature (numerator/denominator).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }

    /// Bar length as a duration.
    pub fn bar(&self) -> Beats {
        Beats(self.beats_per_bar())
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Beats-per-minute with conversions to and from seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    /// Create a tempo, clamped to 1..=999 BPM.
    pub fn new(bpm: f64) -> Self {
        let bpm = if bpm.is_finite() { bpm } else { 120.0 };
        Self {
            bpm: bpm.clamp(1.0, 999.0),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beats_to_seconds(&self, beats: Beats) -> f64 {
        beats.0 * 60.0 / self.bpm
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> Beats {
        Beats(seconds * self.bpm / 60.0)
    }

    /// Absolute beat position to elapsed wall-clock time since beat zero.
    pub fn position_to_duration(&self, at: BeatTime) -> Duration {
        Duration::from_secs_f64(self.beats_to_seconds(Beats(at.to_float())).max(0.0))
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::new(120.0)
    }
}

/// Source of time for the engine's driver loop.
pub trait Clock: Send {
    /// Current position.
    fn now(&self) -> BeatTime;

    /// Real time still to wait before `target` is reached, `None` once it has.
    fn remaining(&self, target: BeatTime) -> Option<Duration>;

    /// Inform the clock that the engine has processed everything up to `target`.
    fn advance_to(&mut self, target: BeatTime);
}

/// Logical clock that jumps straight to each wake time.
///
/// Used by renders and tests: an eight hour piece runs in milliseconds and
/// the same seed always yields the same event stream.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: BeatTime,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> BeatTime {
        self.now
    }

    fn remaining(&self, _target: BeatTime) -> Option<Duration> {
        None
    }

    fn advance_to(&mut self, target: BeatTime) {
        if target > self.now {
            self.now = target;
        }
    }
}

/// Clock anchored to an [`Instant`] at beat zero.
#[derive(Clone, Debug)]
pub struct WallClock {
    tempo: Tempo,
    anchor: Instant,
}

impl WallClock {
    /// Start counting from now.
    pub fn start(tempo: Tempo) -> Self {
        Self {
            tempo,
            anchor: Instant::now(),
        }
    }

    /// Calculate the beat position at a given instant.
    pub fn beat_at(&self, time: Instant) -> BeatTime {
        if time <= self.anchor {
            return BeatTime::ZERO;
        }
        let elapsed = time.duration_since(self.anchor).as_secs_f64();
        BeatTime::from_float(self.tempo.seconds_to_beats(elapsed).0)
    }
}

impl Clock for WallClock {
    fn now(&self) -> BeatTime {
        self.beat_at(Instant::now())
    }

    fn remaining(&self, target: BeatTime) -> Option<Duration> {
        let due = self.anchor + self.tempo.position_to_duration(target);
        due.checked_duration_since(Instant::now())
            .filter(|wait| !wait.is_zero())
    }

    fn advance_to(&mut self, _target: BeatTime) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_time_roundtrip() {
        for val in [0.0, 1.0, 1.5, 3.75, 100.0, -5.0] {
            let bt = BeatTime::from_float(val);
            let back = bt.to_float();
            assert!((back - val).abs() < 0.0001, "Roundtrip failed for {val}");
        }
    }

    #[test]
    fn test_fixed_point_does_not_drift() {
        let mut t = BeatTime::ZERO;
        for _ in 0..100_000 {
            t = t + Beats(0.25);
        }
        assert_eq!(t, BeatTime::from_float(25_000.0));
    }

    #[test]
    fn test_since_never_negative() {
        let a = BeatTime::from_float(4.0);
        let b = BeatTime::from_float(6.0);
        assert_eq!(b.since(a), Beats(2.0));
        assert_eq!(a.since(b), Beats(0.0));
    }

    #[test]
    fn test_tempo_conversions() {
        let tempo = Tempo::new(60.0);
        assert!((tempo.beats_to_seconds(Beats(28.0)) - 28.0).abs() < 1e-9);
        let tempo = Tempo::new(72.0);
        assert!((tempo.seconds_to_beats(60.0).0 - 72.0).abs() < 1e-9);
        assert_eq!(Tempo::new(0.0).bpm(), 1.0);
    }

    #[test]
    fn test_sanitized_beats() {
        assert_eq!(Beats(-1.0).sanitized(), Beats(0.0));
        assert_eq!(Beats(f64::NAN).sanitized(), Beats(0.0));
        assert_eq!(Beats(0.5).sanitized(), Beats(0.5));
    }

    #[test]
    fn test_virtual_clock_only_moves_forward() {
        let mut clock = VirtualClock::new();
        clock.advance_to(BeatTime::from_float(8.0));
        clock.advance_to(BeatTime::from_float(2.0));
        assert_eq!(clock.now(), BeatTime::from_float(8.0));
        assert!(clock.remaining(BeatTime::from_float(100.0)).is_none());
    }

    #[test]
    fn test_wall_clock_waits_for_future_beats() {
        let clock = WallClock::start(Tempo::new(60.0));
        let wait = clock.remaining(BeatTime::from_float(10.0));
        assert!(wait.is_some_and(|w| w > Duration::from_secs(9)));
        assert!(clock.remaining(BeatTime::ZERO).is_none());
    }

    #[test]
    fn test_time_signature_bar() {
        assert_eq!(TimeSignature::default().bar(), Beats(4.0));
        assert_eq!(TimeSignature::new(6, 8).bar(), Beats(3.0));
    }
}
