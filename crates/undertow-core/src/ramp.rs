//! Controller ramps that step through a list of values over a duration.

use crate::midi::{MidiChannel, MidiMessage, MidiOut};
use crate::scheduler::{RampId, Scheduler, Task};
use crate::timing::{BeatTime, Beats};
use rand::Rng;
use std::collections::BTreeMap;

/// What to ramp and how.
#[derive(Clone, Debug, PartialEq)]
pub struct CcRampSpec {
    pub controller: i32,
    pub channel: MidiChannel,
    pub values: Vec<i32>,
    pub total: Beats,
    /// Each value is displaced by up to this much either way.
    pub jitter: u8,
}

impl CcRampSpec {
    pub fn new(controller: i32, channel: MidiChannel, values: Vec<i32>, total: Beats) -> Self {
        Self {
            controller,
            channel,
            values,
            total,
            jitter: 0,
        }
    }

    pub fn with_jitter(mut self, jitter: u8) -> Self {
        self.jitter = jitter;
        self
    }

    /// Spacing between consecutive values.
    pub fn step(&self) -> Beats {
        if self.values.is_empty() {
            return Beats(0.0);
        }
        Beats(self.total.sanitized().0 / self.values.len() as f64)
    }
}

#[derive(Debug)]
struct ActiveRamp {
    spec: CcRampSpec,
    next: usize,
}

/// Every running ramp.
#[derive(Debug, Default)]
pub struct RampBank {
    next_id: u64,
    active: BTreeMap<RampId, ActiveRamp>,
}

impl RampBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the first value now and schedule the rest.
    ///
    /// Returns `None` for an empty ramp, which emits nothing.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        midi: &mut MidiOut,
        sched: &mut Scheduler,
        rng: &mut R,
        now: BeatTime,
        spec: CcRampSpec,
    ) -> Option<RampId> {
        if spec.values.is_empty() {
            return None;
        }
        self.next_id += 1;
        let id = RampId(self.next_id);
        self.active.insert(id, ActiveRamp { spec, next: 0 });
        self.advance(midi, sched, rng, now, id);
        Some(id)
    }

    /// Emit the next value of ramp `id` and reschedule it if more remain.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        midi: &mut MidiOut,
        sched: &mut Scheduler,
        rng: &mut R,
        now: BeatTime,
        id: RampId,
    ) {
        let Some(ramp) = self.active.get_mut(&id) else {
            return;
        };
        let Some(&target) = ramp.spec.values.get(ramp.next) else {
            self.active.remove(&id);
            return;
        };
        let jitter = ramp.spec.jitter as i32;
        let value = if jitter > 0 {
            target + rng.random_range(-jitter..=jitter)
        } else {
            target
        };
        midi.send_cc(now, MidiMessage::cc(ramp.spec.channel, ramp.spec.controller, value));
        ramp.next += 1;

        if ramp.next < ramp.spec.values.len() {
            sched.schedule(now + ramp.spec.step(), Task::RampStep(id));
        } else {
            self.active.remove(&id);
        }
    }

    /// Drop every ramp. Their queued steps become no-ops.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.active.len();
        self.active.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MemorySink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(spec: CcRampSpec, seed: u64) -> Vec<(f64, u8)> {
        let sink = MemorySink::new();
        let mut midi = MidiOut::new(Box::new(sink.clone()), []);
        let mut sched = Scheduler::new();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut bank = RampBank::new();
        bank.start(&mut midi, &mut sched, &mut rng, BeatTime::from_float(10.0), spec);
        while let Some((at, task)) = sched.pop_due(BeatTime::from_float(1000.0)) {
            if let Task::RampStep(id) = task {
                bank.advance(&mut midi, &mut sched, &mut rng, at, id);
            }
        }
        assert!(bank.is_empty());
        sink.messages()
            .into_iter()
            .map(|c| match c.message {
                MidiMessage::ControlChange { value, .. } => (c.at.to_float(), value),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_ramp_is_evenly_spaced_and_exact() {
        let values = vec![72, 84, 96];
        let out = run(CcRampSpec::new(1, MidiChannel::new(1), values, Beats(0.9)), 0);
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![72, 84, 96]);
        assert!((out[0].0 - 10.0).abs() < 1e-4);
        assert!((out[1].0 - 10.3).abs() < 1e-4);
        assert!((out[2].0 - 10.6).abs() < 1e-4);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let values = vec![0, 2, 125, 127, 64];
        for seed in 0..50 {
            let out = run(
                CcRampSpec::new(1, MidiChannel::new(1), values.clone(), Beats(4.0)).with_jitter(2),
                seed,
            );
            assert_eq!(out.len(), values.len());
            for ((_, got), want) in out.iter().zip(&values) {
                assert!(*got <= 127);
                assert!((*got as i32 - want).abs() <= 2);
            }
        }
    }

    #[test]
    fn test_empty_ramp_emits_nothing() {
        assert!(run(CcRampSpec::new(74, MidiChannel::new(2), vec![], Beats(1.0)), 0).is_empty());
    }

    #[test]
    fn test_cancelled_ramp_stops() {
        let sink = MemorySink::new();
        let mut midi = MidiOut::new(Box::new(sink.clone()), []);
        let mut sched = Scheduler::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut bank = RampBank::new();
        let spec = CcRampSpec::new(1, MidiChannel::new(1), vec![64, 56, 48, 40], Beats(4.0));
        bank.start(&mut midi, &mut sched, &mut rng, BeatTime::ZERO, spec);
        assert_eq!(bank.cancel_all(), 1);
        while let Some((at, task)) = sched.pop_due(BeatTime::from_float(10.0)) {
            if let Task::RampStep(id) = task {
                bank.advance(&mut midi, &mut sched, &mut rng, at, id);
            }
        }
        assert_eq!(sink.messages().len(), 1);
    }
}
