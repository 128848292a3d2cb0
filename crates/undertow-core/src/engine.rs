//! The cooperative core.
//!
//! One [`Engine`] owns every voice, the bus, the task queue, the note
//! registry, ramps, sinks and the random source. It is single-threaded: a
//! step runs to completion before anything else happens, so voices never
//! observe a half-written bus. [`Engine::run`] drives it against a
//! [`Clock`]; [`crate::runtime::Runtime`] puts that on its own thread.

use crate::audio::AudioOut;
use crate::bus::{keys, StateBus, Value};
use crate::control::ControlMessage;
use crate::form::{Conductor, Cue, FormPlan};
use crate::midi::{MidiOut, PortOpener};
use crate::notes::NoteLifecycle;
use crate::ramp::RampBank;
use crate::scheduler::{Scheduler, Task, VoiceId};
use crate::state::{BusSnapshot, StateManager, VoiceInfo};
use crate::timing::{BeatTime, Beats, Clock, Tempo, TimeSignature};
use crate::voice::{StepContext, Voice, VoiceSpec, VoiceStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Longest single wait, so the stop flag is seen promptly.
const MAX_WAIT: Duration = Duration::from_millis(250);

/// Consecutive zero-length steps before a voice is treated as stuck.
const MAX_ZERO_STEPS: u32 = 10_000;

struct VoiceSlot {
    name: String,
    voice: Box<dyn Voice>,
    sync: Option<String>,
    status: VoiceStatus,
    steps: u64,
    zero_streak: u32,
}

/// Single-threaded scheduler of voices.
pub struct Engine {
    tempo: Tempo,
    signature: TimeSignature,
    now: BeatTime,
    sched: Scheduler,
    bus: StateBus,
    rng: StdRng,
    midi: MidiOut,
    audio: AudioOut,
    notes: NoteLifecycle,
    ramps: RampBank,
    conductor: Option<Conductor>,
    voices: Vec<VoiceSlot>,
    cues: Vec<Cue>,
    cue_tx: Option<Sender<Cue>>,
    port_opener: Option<PortOpener>,
    stop: Arc<AtomicBool>,
    stopping: bool,
    started: bool,
    state: StateManager,
}

impl Engine {
    pub fn new(
        plan: FormPlan,
        voices: Vec<VoiceSpec>,
        midi: MidiOut,
        audio: AudioOut,
        tempo: Tempo,
    ) -> Self {
        let mut bus = StateBus::new(plan.initial());
        let signature = plan.signature();
        let conductor = bus
            .take_authority()
            .map(|authority| Conductor::new(plan, authority));
        let voices = voices
            .into_iter()
            .map(|spec| VoiceSlot {
                name: spec.voice.name().to_string(),
                voice: spec.voice,
                sync: spec.sync,
                status: VoiceStatus::Waiting,
                steps: 0,
                zero_streak: 0,
            })
            .collect();

        Self {
            tempo,
            signature,
            now: BeatTime::ZERO,
            sched: Scheduler::new(),
            bus,
            rng: StdRng::from_os_rng(),
            midi,
            audio,
            notes: NoteLifecycle::new(),
            ramps: RampBank::new(),
            conductor,
            voices,
            cues: Vec::new(),
            cue_tx: None,
            port_opener: None,
            stop: Arc::new(AtomicBool::new(false)),
            stopping: false,
            started: false,
            state: StateManager::new(),
        }
    }

    /// Fix the random source. `None` keeps OS entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Initial bus values.
    pub fn with_knobs<K: Into<String>>(mut self, knobs: impl IntoIterator<Item = (K, Value)>) -> Self {
        for (key, value) in knobs {
            self.bus.set(&key.into(), value);
        }
        self
    }

    pub fn with_cue_sender(mut self, tx: Sender<Cue>) -> Self {
        self.cue_tx = Some(tx);
        self
    }

    pub fn with_port_opener(mut self, opener: PortOpener) -> Self {
        self.port_opener = Some(opener);
        self
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn now(&self) -> BeatTime {
        self.now
    }

    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    pub fn notes(&self) -> &NoteLifecycle {
        &self.notes
    }

    pub fn state_manager(&self) -> StateManager {
        self.state.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn voice_status(&self, name: &str) -> Option<VoiceStatus> {
        self.voices.iter().find(|v| v.name == name).map(|v| v.status)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Stopped, and every note that went out has had its off.
    pub fn is_finished(&self) -> bool {
        self.stopping && self.notes.sounding() == 0
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Put the conductor and every unsynced voice on the schedule.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let now = self.now;
        if self.conductor.is_some() {
            self.sched.schedule(now, Task::Form);
        }

        let names: Vec<String> = self.voices.iter().map(|v| v.name.clone()).collect();
        for (index, slot) in self.voices.iter_mut().enumerate() {
            let waits = match slot.sync.as_deref() {
                Some(target) if target != slot.name && names.iter().any(|n| n == target) => true,
                Some(target) => {
                    log::warn!(
                        "[VOICE] '{}' syncs to unknown voice '{}', starting free",
                        slot.name,
                        target
                    );
                    false
                }
                None => false,
            };
            if !waits {
                slot.status = VoiceStatus::Running;
                self.sched.schedule(now, Task::Voice(VoiceId(index)));
            }
        }
        log::info!(
            "[VOICE] Started {} voices at {:.0} bpm",
            self.voices.len(),
            self.tempo.bpm()
        );
        self.publish();
    }

    /// Run every task due at or before `target`, then move to `target`.
    pub fn advance_to(&mut self, target: BeatTime) {
        self.start();
        if self.stop_requested() {
            self.begin_shutdown();
        }
        while let Some((at, task)) = self.sched.pop_due(target) {
            if at > self.now {
                self.now = at;
            }
            log::trace!("wake @{:.3}: {:?}", self.now.to_float(), task);
            match task {
                Task::NoteOff(id) => self.notes.fire(&mut self.midi, self.now, id),
                Task::RampStep(id) => {
                    self.ramps
                        .advance(&mut self.midi, &mut self.sched, &mut self.rng, self.now, id)
                }
                Task::Form => self.step_conductor(),
                Task::Voice(id) => self.step_voice(id),
            }
        }
        if target > self.now {
            self.now = target;
        }
        self.publish();
    }

    fn step_conductor(&mut self) {
        if self.stopping {
            return;
        }
        let Some(conductor) = self.conductor.as_mut() else {
            return;
        };
        let mut ctx = StepContext {
            voice: None,
            name: "conductor",
            now: self.now,
            tempo: self.tempo,
            signature: self.signature,
            bus: &mut self.bus,
            rng: &mut self.rng,
            midi: &mut self.midi,
            audio: &mut self.audio,
            notes: &mut self.notes,
            ramps: &mut self.ramps,
            sched: &mut self.sched,
            cues: &mut self.cues,
        };
        match conductor.step(&mut ctx) {
            Ok(sleep) => {
                let sleep = sleep.sanitized();
                let at = self.now + if sleep.0 > 0.0 { sleep } else { self.signature.bar() };
                self.sched.schedule(at, Task::Form);
            }
            Err(e) => {
                log::error!("[FORM] Conductor failed, section is frozen: {}", e);
                self.conductor = None;
            }
        }
        self.flush_cues();
    }

    fn step_voice(&mut self, id: VoiceId) {
        if self.stop_requested() {
            self.begin_shutdown();
        }
        if self.stopping {
            return;
        }
        let Some(slot) = self.voices.get_mut(id.0) else {
            return;
        };
        if slot.status != VoiceStatus::Running {
            return;
        }

        let voice = &mut slot.voice;
        let mut ctx = StepContext {
            voice: Some(id),
            name: slot.name.as_str(),
            now: self.now,
            tempo: self.tempo,
            signature: self.signature,
            bus: &mut self.bus,
            rng: &mut self.rng,
            midi: &mut self.midi,
            audio: &mut self.audio,
            notes: &mut self.notes,
            ramps: &mut self.ramps,
            sched: &mut self.sched,
            cues: &mut self.cues,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| voice.step(&mut ctx)));
        let result = match outcome {
            Ok(Ok(sleep)) => Ok(sleep.sanitized()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(panic_message(payload.as_ref())),
        };

        match result {
            Ok(sleep) => {
                slot.steps += 1;
                if sleep.0 > 0.0 {
                    slot.zero_streak = 0;
                } else {
                    slot.zero_streak += 1;
                }
                if slot.zero_streak >= MAX_ZERO_STEPS {
                    self.fault(id, "voice never sleeps".to_string());
                    return;
                }
                let at = self.now + sleep;
                self.sched.schedule(at, Task::Voice(id));
                let name = slot.name.clone();
                self.release_waiters(&name, at);
            }
            Err(message) => self.fault(id, message),
        }
    }

    /// Start every voice waiting on `target`, at `at`.
    fn release_waiters(&mut self, target: &str, at: BeatTime) {
        for (index, slot) in self.voices.iter_mut().enumerate() {
            if slot.status == VoiceStatus::Waiting && slot.sync.as_deref() == Some(target) {
                log::debug!("[VOICE] '{}' synced to '{}' @{:.3}", slot.name, target, at.to_float());
                slot.status = VoiceStatus::Running;
                self.sched.schedule(at, Task::Voice(VoiceId(index)));
            }
        }
    }

    fn fault(&mut self, id: VoiceId, message: String) {
        let Some(slot) = self.voices.get_mut(id.0) else {
            return;
        };
        log::error!("[VOICE] '{}' failed and was retired: {}", slot.name, message);
        slot.status = VoiceStatus::Faulted;
        let name = slot.name.clone();
        let released = self.notes.release_owned(&mut self.midi, self.now, id);
        if released > 0 {
            log::info!("[NOTE_LIFECYCLE] Released {} notes held by '{}'", released, name);
        }
        let now = self.now;
        self.release_waiters(&name, now);
    }

    /// Retire voices and ramps, flush held notes. Timed offs stay queued.
    fn begin_shutdown(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        self.stop.store(true, Ordering::Relaxed);
        for slot in &mut self.voices {
            if matches!(slot.status, VoiceStatus::Running | VoiceStatus::Waiting) {
                slot.status = VoiceStatus::Retired;
            }
        }
        self.conductor = None;
        self.sched.retain(|task| matches!(task, Task::NoteOff(_)));
        let ramps = self.ramps.cancel_all();
        let flushed = self.notes.flush_held(&mut self.midi, self.now);
        log::info!(
            "[VOICE] Stopping @{:.2}: {} ramps cancelled, {} held notes flushed, {} offs pending",
            self.now.to_float(),
            ramps,
            flushed,
            self.notes.pending_offs()
        );
    }

    fn flush_cues(&mut self) {
        for cue in self.cues.drain(..) {
            let Some(tx) = &self.cue_tx else {
                continue;
            };
            match tx.try_send(cue) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(cue)) => {
                    log::debug!("[FORM] Cue '{}' dropped, nobody is listening", cue.name);
                }
            }
        }
    }

    /// Apply one control message.
    pub fn apply(&mut self, msg: ControlMessage) {
        log::info!("[CONTROL] {:?}", msg);
        match msg {
            ControlMessage::SetMidiEnabled(on) => self.midi.set_enabled(on),
            ControlMessage::SetAudioEnabled(on) => self.audio.set_enabled(on),
            ControlMessage::SetCcEnabled(on) => self.midi.set_cc_enabled(on),
            ControlMessage::Panic => {
                self.notes
                    .all_notes_off(&mut self.midi, &mut self.sched, self.now)
            }
            ControlMessage::ForcePort(port) => self.switch_port(port.as_deref()),
            ControlMessage::SetHeartbeat(on) => self.bus.set(keys::HEARTBEAT, on),
            ControlMessage::SetKnob { key, value } => self.bus.set(&key, value),
            ControlMessage::Stop => {
                self.stop.store(true, Ordering::Relaxed);
                self.begin_shutdown();
            }
        }
        self.publish();
    }

    fn switch_port(&mut self, port: Option<&str>) {
        let Some(opener) = self.port_opener.as_mut() else {
            log::warn!("[MIDI] Port switching is not available for this output");
            return;
        };
        match opener(port) {
            Ok(sink) => {
                // Whatever is sounding on the old port will never get its off.
                self.notes
                    .all_notes_off(&mut self.midi, &mut self.sched, self.now);
                let old = self.midi.replace_sink(sink);
                log::info!(
                    "[MIDI] Switched output from '{}' to '{}'",
                    old.port_name(),
                    self.midi.port_name()
                );
            }
            Err(e) => log::warn!("[MIDI] Keeping '{}': {}", self.midi.port_name(), e),
        }
    }

    fn publish(&self) {
        let voices = self
            .voices
            .iter()
            .map(|slot| VoiceInfo {
                name: slot.name.clone(),
                status: slot.status,
                steps: slot.steps,
            })
            .collect();
        self.state.publish(BusSnapshot {
            beat: self.now.to_float(),
            bar: self.bus.bar(),
            section: self.bus.section(),
            section_entered: self.bus.section_entered().to_float(),
            values: self.bus.values(),
            voices,
            midi_enabled: self.midi.is_enabled(),
            cc_enabled: self.midi.cc_enabled(),
            audio_enabled: self.audio.is_enabled(),
            midi_port: self.midi.port_name().to_string(),
            sounding_notes: self.notes.sounding(),
            stopped: self.stopping,
            version: 0,
        });
    }

    /// Drive until stopped and every note is off.
    pub fn run(&mut self, clock: &mut dyn Clock, control: Option<&Receiver<ControlMessage>>) {
        self.drive(clock, None, control);
    }

    /// Drive until `until`, or until stopped and drained if that comes first.
    pub fn run_until(
        &mut self,
        clock: &mut dyn Clock,
        until: BeatTime,
        control: Option<&Receiver<ControlMessage>>,
    ) {
        self.drive(clock, Some(until), control);
    }

    /// Run for `duration` on `clock`, stop, and let pending offs land.
    pub fn render(&mut self, clock: &mut dyn Clock, duration: Beats) {
        let end = self.now + duration.sanitized();
        self.run_until(clock, end, None);
        self.apply(ControlMessage::Stop);
        self.run(clock, None);
    }

    fn drive(
        &mut self,
        clock: &mut dyn Clock,
        until: Option<BeatTime>,
        control: Option<&Receiver<ControlMessage>>,
    ) {
        self.start();
        loop {
            if let Some(rx) = control {
                while let Ok(msg) = rx.try_recv() {
                    self.apply(msg);
                }
            }
            if self.stop_requested() {
                self.begin_shutdown();
            }
            if self.is_finished() {
                break;
            }

            let Some(next) = self.sched.peek_time() else {
                // Nothing scheduled: every voice has faulted.
                match (until, control) {
                    (Some(limit), _) => {
                        clock.advance_to(limit);
                        self.advance_to(limit);
                        break;
                    }
                    (None, Some(rx)) => match rx.recv_timeout(MAX_WAIT) {
                        Ok(msg) => self.apply(msg),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    (None, None) => break,
                }
                continue;
            };

            if let Some(limit) = until {
                if next > limit {
                    clock.advance_to(limit);
                    self.advance_to(limit);
                    break;
                }
            }

            if !self.wait_until(clock, next, control) {
                continue;
            }
            clock.advance_to(next);
            self.advance_to(next);
        }
        self.publish();
    }

    /// Block until `target` on `clock`. Returns `false` if a control message
    /// or stop arrived first and the caller should re-plan.
    fn wait_until(
        &mut self,
        clock: &mut dyn Clock,
        target: BeatTime,
        control: Option<&Receiver<ControlMessage>>,
    ) -> bool {
        while let Some(wait) = clock.remaining(target) {
            let wait = wait.min(MAX_WAIT);
            match control {
                Some(rx) => match rx.recv_timeout(wait) {
                    Ok(msg) => {
                        self.apply(msg);
                        return false;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => std::thread::sleep(wait),
                },
                None => std::thread::sleep(wait),
            }
            if self.stop_requested() && !self.stopping {
                return false;
            }
        }
        true
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LogAudio;
    use crate::form::{Ending, Section, Span, Stage};
    use crate::midi::{Captured, MemorySink, MidiChannel, MidiMessage, ALL_NOTES_OFF};
    use crate::notes::HeldNote;
    use crate::timing::VirtualClock;
    use crate::{Error, Result};

    /// Plays `pitch` for `length` every `period`.
    struct Pulse {
        name: &'static str,
        pitch: i32,
        period: f64,
        length: f64,
    }

    impl Voice for Pulse {
        fn name(&self) -> &str {
            self.name
        }

        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
            ctx.play(self.pitch, 90, MidiChannel::new(1), Beats(self.length));
            Ok(Beats(self.period))
        }
    }

    /// Plays once, then fails or panics.
    struct Fragile {
        panics: bool,
        steps: u32,
        held: Option<HeldNote>,
    }

    impl Voice for Fragile {
        fn name(&self) -> &str {
            "fragile"
        }

        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
            self.steps += 1;
            if self.steps == 1 {
                ctx.play(50, 90, MidiChannel::new(2), Beats(8.0));
                self.held = ctx.note_on(51, 90, MidiChannel::new(2));
                return Ok(Beats(1.0));
            }
            if self.panics {
                panic!("boom");
            }
            Err(Error::voice("fragile", "gave up"))
        }
    }

    /// Holds a note forever.
    struct Drone {
        held: Option<HeldNote>,
    }

    impl Voice for Drone {
        fn name(&self) -> &str {
            "drone"
        }

        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
            if self.held.is_none() {
                self.held = ctx.note_on(40, 60, MidiChannel::new(3));
            }
            Ok(Beats(4.0))
        }
    }

    /// Records the beat and section of each step.
    struct Watcher {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<(f64, Section)>>>,
        period: f64,
    }

    impl Voice for Watcher {
        fn name(&self) -> &str {
            self.name
        }

        fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
            self.log
                .lock()
                .unwrap()
                .push((ctx.now().to_float(), ctx.section()));
            Ok(Beats(self.period))
        }
    }

    fn plan() -> FormPlan {
        FormPlan::new(
            vec![
                Stage::new(Section::Intro, Span::Bars(2)),
                Stage::new(Section::Groove, Span::Forever),
            ],
            Ending::Hold,
        )
        .unwrap()
    }

    fn engine(voices: Vec<VoiceSpec>) -> (Engine, MemorySink) {
        let sink = MemorySink::new();
        let midi = MidiOut::new(Box::new(sink.clone()), [MidiChannel::new(1), MidiChannel::new(2)]);
        let engine = Engine::new(
            plan(),
            voices,
            midi,
            AudioOut::new(Box::new(LogAudio)),
            Tempo::new(120.0),
        )
        .with_seed(Some(1));
        (engine, sink)
    }

    fn ons(log: &[Captured]) -> usize {
        log.iter()
            .filter(|c| matches!(c.message, MidiMessage::NoteOn { .. }))
            .count()
    }

    fn offs(log: &[Captured]) -> usize {
        log.iter()
            .filter(|c| matches!(c.message, MidiMessage::NoteOff { .. }))
            .count()
    }

    #[test]
    fn test_voices_wake_on_their_own_periods() {
        let (mut engine, sink) = engine(vec![
            VoiceSpec::new(Pulse { name: "a", pitch: 36, period: 1.0, length: 0.1 }),
            VoiceSpec::new(Pulse { name: "b", pitch: 38, period: 3.0, length: 0.1 }),
        ]);
        engine.run_until(&mut VirtualClock::new(), BeatTime::from_float(11.9), None);

        let log = sink.messages();
        let hits = |pitch| {
            log.iter()
                .filter(|c| c.message == MidiMessage::note_on(MidiChannel::new(1), pitch, 90))
                .count()
        };
        assert_eq!(hits(36), 12);
        assert_eq!(hits(38), 4);
        assert_eq!(engine.now(), BeatTime::from_float(11.9));
    }

    #[test]
    fn test_faulted_voice_still_gets_its_offs() {
        for panics in [false, true] {
            let (mut engine, sink) = engine(vec![
                VoiceSpec::new(Fragile { panics, steps: 0, held: None }),
                VoiceSpec::new(Pulse { name: "steady", pitch: 60, period: 1.0, length: 0.5 }),
            ]);
            engine.run_until(&mut VirtualClock::new(), BeatTime::from_float(20.0), None);

            assert_eq!(engine.voice_status("fragile"), Some(VoiceStatus::Faulted));
            assert_eq!(engine.voice_status("steady"), Some(VoiceStatus::Running));
            // The held note is released at the fault, the timed one at beat 8.
            let channel_two: Vec<Captured> = sink
                .messages()
                .into_iter()
                .filter(|c| c.message.channel() == MidiChannel::new(2))
                .collect();
            assert_eq!(ons(&channel_two), 2);
            assert_eq!(offs(&channel_two), 2);
            let timed_off = channel_two
                .iter()
                .find(|c| c.message == MidiMessage::note_off(MidiChannel::new(2), 50))
                .unwrap();
            assert_eq!(timed_off.at, BeatTime::from_float(8.0));
            let held_off = channel_two
                .iter()
                .find(|c| c.message == MidiMessage::note_off(MidiChannel::new(2), 51))
                .unwrap();
            assert_eq!(held_off.at, BeatTime::from_float(1.0));
        }
    }

    #[test]
    fn test_stop_completes_offs_and_flushes_held() {
        let (mut engine, sink) = engine(vec![
            VoiceSpec::new(Drone { held: None }),
            VoiceSpec::new(Pulse { name: "long", pitch: 45, period: 1.0, length: 6.0 }),
        ]);
        let mut clock = VirtualClock::new();
        engine.run_until(&mut clock, BeatTime::from_float(4.5), None);
        engine.apply(ControlMessage::Stop);
        let ons_at_stop = ons(&sink.messages());
        engine.run(&mut clock, None);

        assert!(engine.is_finished());
        let log = sink.messages();
        assert_eq!(ons(&log), ons_at_stop);
        assert_eq!(ons(&log), offs(&log));
        let last = log.last().unwrap();
        // The note started at beat 4 ends at beat 10.
        assert_eq!(last.at, BeatTime::from_float(10.0));
        assert!(engine.voice_status("drone") == Some(VoiceStatus::Retired));
    }

    #[test]
    fn test_stop_flag_from_outside() {
        let (mut engine, sink) = engine(vec![VoiceSpec::new(Pulse {
            name: "a",
            pitch: 36,
            period: 1.0,
            length: 0.25,
        })]);
        let flag = engine.stop_flag();
        let mut clock = VirtualClock::new();
        engine.run_until(&mut clock, BeatTime::from_float(2.0), None);
        flag.store(true, Ordering::Relaxed);
        engine.run(&mut clock, None);
        let log = sink.messages();
        assert_eq!(ons(&log), 3);
        assert_eq!(offs(&log), 3);
    }

    #[test]
    fn test_panic_message_cancels_offs() {
        let (mut engine, sink) = engine(vec![VoiceSpec::new(Pulse {
            name: "long",
            pitch: 45,
            period: 10.0,
            length: 8.0,
        })]);
        let mut clock = VirtualClock::new();
        engine.run_until(&mut clock, BeatTime::from_float(1.0), None);
        engine.apply(ControlMessage::Panic);
        engine.run_until(&mut clock, BeatTime::from_float(9.0), None);

        let log = sink.messages();
        assert_eq!(offs(&log), 0);
        let panics = log
            .iter()
            .filter(|c| {
                matches!(c.message, MidiMessage::ControlChange { controller: ALL_NOTES_OFF, .. })
            })
            .count();
        assert_eq!(panics, 2);
        assert_eq!(engine.notes().sounding(), 0);
    }

    #[test]
    fn test_sync_waits_for_target_boundary() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (mut engine, _sink) = engine(vec![
            VoiceSpec::new(Watcher { name: "lead", log: Arc::new(Default::default()), period: 0.75 }),
            VoiceSpec::new(Watcher { name: "follower", log: Arc::clone(&log), period: 2.0 })
                .synced_to("lead"),
        ]);
        engine.run_until(&mut VirtualClock::new(), BeatTime::from_float(5.0), None);
        let beats: Vec<f64> = log.lock().unwrap().iter().map(|(b, _)| *b).collect();
        assert_eq!(beats, vec![0.75, 2.75, 4.75]);
    }

    #[test]
    fn test_voices_see_section_change_on_the_boundary() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (mut engine, _sink) = engine(vec![VoiceSpec::new(Watcher {
            name: "w",
            log: Arc::clone(&log),
            period: 4.0,
        })]);
        let (tx, rx) = crossbeam_channel::bounded(8);
        engine = engine.with_cue_sender(tx);
        engine.run_until(&mut VirtualClock::new(), BeatTime::from_float(12.0), None);

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen[0], (0.0, Section::Intro));
        assert_eq!(seen[1], (4.0, Section::Intro));
        assert_eq!(seen[2], (8.0, Section::Groove));
        let cues: Vec<String> = rx.try_iter().map(|c| c.name).collect();
        assert_eq!(cues, vec!["intro_start", "groove_start"]);
        assert_eq!(engine.bus().bar(), 4);
    }

    #[test]
    fn test_knobs_and_heartbeat_reach_the_bus() {
        let (mut engine, _sink) = engine(vec![]);
        engine = engine.with_knobs([("density", Value::Number(0.55))]);
        engine.apply(ControlMessage::SetKnob {
            key: "density".into(),
            value: Value::Number(0.9),
        });
        engine.apply(ControlMessage::SetHeartbeat(true));
        assert_eq!(engine.bus().number("density", 0.0), 0.9);
        assert!(engine.bus().flag(keys::HEARTBEAT, false));
        let snapshot = engine.state_manager().snapshot();
        assert_eq!(snapshot.value("density"), Some(&Value::Number(0.9)));
    }

    #[test]
    fn test_force_port_swaps_sink_after_panic() {
        let (engine, old) = engine(vec![VoiceSpec::new(Pulse {
            name: "a",
            pitch: 36,
            period: 1.0,
            length: 4.0,
        })]);
        let new = MemorySink::named("new");
        let opener_sink = new.clone();
        let mut engine = engine.with_port_opener(Box::new(move |_port: Option<&str>| {
            Ok(Box::new(opener_sink.clone()) as Box<dyn crate::midi::MidiSink>)
        }));
        let mut clock = VirtualClock::new();
        engine.run_until(&mut clock, BeatTime::from_float(0.5), None);
        engine.apply(ControlMessage::ForcePort(Some("new".into())));
        engine.run_until(&mut clock, BeatTime::from_float(1.5), None);

        assert_eq!(offs(&old.messages()), 0);
        assert_eq!(engine.state_manager().snapshot().midi_port, "new");
        assert_eq!(ons(&new.messages()), 1);
    }

    #[test]
    fn test_same_seed_same_output() {
        struct Random;
        impl Voice for Random {
            fn name(&self) -> &str {
                "random"
            }
            fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
                let pitch = ctx.choose(&[40, 43, 47, 50]).unwrap_or(40);
                let wait = ctx.rrand(0.25, 1.5);
                ctx.play(pitch, 80, MidiChannel::new(1), Beats(0.2));
                Ok(Beats(wait))
            }
        }
        let run = || {
            let (mut engine, sink) = engine(vec![VoiceSpec::new(Random)]);
            engine.render(&mut VirtualClock::new(), Beats(64.0));
            sink.messages()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_voice_that_never_sleeps_is_retired() {
        struct Spinner;
        impl Voice for Spinner {
            fn name(&self) -> &str {
                "spinner"
            }
            fn step(&mut self, _ctx: &mut StepContext<'_>) -> Result<Beats> {
                Ok(Beats(0.0))
            }
        }
        let (mut engine, _sink) = engine(vec![VoiceSpec::new(Spinner)]);
        engine.run_until(&mut VirtualClock::new(), BeatTime::from_float(1.0), None);
        assert_eq!(engine.voice_status("spinner"), Some(VoiceStatus::Faulted));
    }
}
