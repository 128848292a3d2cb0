//! The voice contract and the context a step runs in.
//!
//! A voice is a step function with private state. The engine calls
//! [`Voice::step`], the voice reads the bus, emits through the context and
//! returns how long to sleep. Nothing else runs while a step is in
//! progress.

use crate::audio::{AudioEvent, AudioOut};
use crate::bus::StateBus;
use crate::form::{Cue, Section};
use crate::midi::{MidiChannel, MidiMessage, MidiOut};
use crate::notes::{HeldNote, NoteEvent, NoteLifecycle};
use crate::ramp::{CcRampSpec, RampBank};
use crate::scheduler::{NoteId, RampId, Scheduler, VoiceId};
use crate::timing::{BeatTime, Beats, Tempo, TimeSignature};
use crate::trigger;
use crate::Result;
use rand::rngs::StdRng;
use rand::Rng;

/// An independently scheduled generator.
pub trait Voice: Send {
    /// Unique name, used for logs and `sync` targets.
    fn name(&self) -> &str;

    /// Run one step and return the time until the next one.
    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats>;
}

/// A voice plus how it joins the schedule.
pub struct VoiceSpec {
    pub(crate) voice: Box<dyn Voice>,
    pub(crate) sync: Option<String>,
}

impl VoiceSpec {
    pub fn new(voice: impl Voice + 'static) -> Self {
        Self {
            voice: Box::new(voice),
            sync: None,
        }
    }

    /// Hold the first step until `target` next wakes, then free-run.
    pub fn synced_to(mut self, target: &str) -> Self {
        self.sync = Some(target.to_string());
        self
    }

    pub fn name(&self) -> &str {
        self.voice.name()
    }

    pub fn sync(&self) -> Option<&str> {
        self.sync.as_deref()
    }
}

/// Lifecycle of a voice slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceStatus {
    /// Waiting on its sync target.
    Waiting,
    Running,
    /// Stopped by the global stop flag.
    Retired,
    /// Returned an error or panicked.
    Faulted,
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VoiceStatus::Waiting => "waiting",
            VoiceStatus::Running => "running",
            VoiceStatus::Retired => "retired",
            VoiceStatus::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Everything a step may touch, lent by the engine for one call.
pub struct StepContext<'a> {
    pub(crate) voice: Option<VoiceId>,
    pub(crate) name: &'a str,
    pub(crate) now: BeatTime,
    pub(crate) tempo: Tempo,
    pub(crate) signature: TimeSignature,
    pub(crate) bus: &'a mut StateBus,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) midi: &'a mut MidiOut,
    pub(crate) audio: &'a mut AudioOut,
    pub(crate) notes: &'a mut NoteLifecycle,
    pub(crate) ramps: &'a mut RampBank,
    pub(crate) sched: &'a mut Scheduler,
    pub(crate) cues: &'a mut Vec<Cue>,
}

impl<'a> StepContext<'a> {
    pub fn now(&self) -> BeatTime {
        self.now
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn bar_length(&self) -> Beats {
        self.signature.bar()
    }

    /// Seconds to beats at the current tempo.
    pub fn seconds(&self, seconds: f64) -> Beats {
        self.tempo.seconds_to_beats(seconds)
    }

    pub fn voice_name(&self) -> &str {
        self.name
    }

    pub fn section(&self) -> Section {
        self.bus.section()
    }

    pub fn bus(&self) -> &StateBus {
        &*self.bus
    }

    pub fn bus_mut(&mut self) -> &mut StateBus {
        &mut *self.bus
    }

    /// Numeric bus value or `default`.
    pub fn knob(&self, key: &str, default: f64) -> f64 {
        self.bus.number(key, default)
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.bus.flag(key, default)
    }

    /// Step the shared walk named `key`.
    pub fn wander(&mut self, base: f64, depth: f64, step: f64, key: &str) -> f64 {
        self.bus
            .wander_mut()
            .wander(&mut *self.rng, base, depth, step, key)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    /// Uniform float in `[lo, hi]`, either order.
    pub fn rrand(&mut self, lo: f64, hi: f64) -> f64 {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if lo == hi {
            return lo;
        }
        self.rng.random_range(lo..=hi)
    }

    pub fn one_in(&mut self, n: u32) -> bool {
        trigger::one_in(&mut *self.rng, n)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        trigger::chance(&mut *self.rng, p)
    }

    pub fn choose<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[self.rng.random_range(0..items.len())])
    }

    pub fn midi_enabled(&self) -> bool {
        self.midi.is_enabled()
    }

    pub fn cc_enabled(&self) -> bool {
        self.midi.is_enabled() && self.midi.cc_enabled()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_enabled()
    }

    /// Timed note: on now, off after `duration` regardless of this voice.
    pub fn play(&mut self, pitch: i32, velocity: i32, channel: MidiChannel, duration: Beats) -> Option<NoteId> {
        self.notes.play(
            self.midi,
            self.sched,
            self.now,
            NoteEvent::new(pitch, velocity, channel, duration),
        )
    }

    /// Timed notes sharing velocity and duration.
    pub fn play_chord(&mut self, pitches: &[i32], velocity: i32, channel: MidiChannel, duration: Beats) {
        for &pitch in pitches {
            self.play(pitch, velocity, channel, duration);
        }
    }

    /// Held note owned by this voice. Released automatically if the voice
    /// is retired without releasing it.
    pub fn note_on(&mut self, pitch: i32, velocity: i32, channel: MidiChannel) -> Option<HeldNote> {
        self.notes
            .note_on(self.midi, self.now, pitch, velocity, channel, self.voice)
    }

    pub fn note_off(&mut self, held: HeldNote) {
        self.notes.note_off(self.midi, self.now, held);
    }

    pub fn release_after(&mut self, held: HeldNote, duration: Beats) {
        self.notes.release_after(self.sched, self.now, held, duration);
    }

    /// Single controller value.
    pub fn cc(&mut self, controller: i32, value: i32, channel: MidiChannel) -> bool {
        self.midi
            .send_cc(self.now, MidiMessage::cc(channel, controller, value))
    }

    /// Start a ramp that runs on its own timeline.
    pub fn ramp(&mut self, spec: CcRampSpec) -> Option<RampId> {
        if !self.cc_enabled() {
            return None;
        }
        self.ramps
            .start(self.midi, self.sched, &mut *self.rng, self.now, spec)
    }

    pub fn audio(&mut self, mut event: AudioEvent) -> bool {
        if event.voice_name.is_none() {
            event.voice_name = Some(self.name.to_string());
        }
        self.audio.play(self.now, event)
    }

    pub(crate) fn cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }
}
