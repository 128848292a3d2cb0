//! Small sequencing helpers voices build their material from.

/// A cyclic list indexed by an ever-growing tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Ring<T> {
    items: Vec<T>,
}

impl<T: Clone> Ring<T> {
    pub fn new(items: impl Into<Vec<T>>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Item at `index`, wrapping. `None` only for an empty ring.
    pub fn get(&self, index: u64) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let idx = (index % self.items.len() as u64) as usize;
        Some(self.items[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Bjorklund distribution of `hits` onsets over `steps` slots.
///
/// Rotated so the first slot is always a hit when `hits > 0`.
pub fn euclid(hits: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return Vec::new();
    }
    let hits = hits.min(steps);
    let mut pattern: Vec<bool> = (0..steps)
        .map(|i| (i * hits) % steps < hits)
        .collect();
    if let Some(first) = pattern.iter().position(|&hit| hit) {
        pattern.rotate_left(first);
    }
    pattern
}

/// Minor pentatonic intervals in semitones.
pub const MINOR_PENTATONIC: [i32; 5] = [0, 3, 5, 7, 10];

/// Build a scale over `octaves` octaves, including the closing root.
pub fn scale(root: i32, intervals: &[i32], octaves: u32) -> Vec<i32> {
    let mut notes: Vec<i32> = (0..octaves as i32)
        .flat_map(|octave| intervals.iter().map(move |step| root + octave * 12 + step))
        .collect();
    notes.push(root + octaves as i32 * 12);
    notes
}

/// Frequency in Hz to a fractional MIDI note number.
pub fn hz_to_midi(hz: f64) -> f64 {
    69.0 + 12.0 * (hz.max(1e-6) / 440.0).log2()
}
