//! Runs an [`Engine`] on its own thread against the wall clock.

use crate::control::ControlMessage;
use crate::engine::Engine;
use crate::form::Cue;
use crate::state::{BusSnapshot, StateManager};
use crate::timing::WallClock;
use crate::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cues beyond this many unread are dropped.
const CUE_BACKLOG: usize = 64;

/// Handle for talking to a running engine.
#[derive(Clone)]
pub struct RuntimeHandle {
    control_tx: Sender<ControlMessage>,
    state: StateManager,
    stop: Arc<AtomicBool>,
    cues: Receiver<Cue>,
}

impl RuntimeHandle {
    /// Send a control message.
    pub fn send(&self, msg: ControlMessage) -> Result<()> {
        self.control_tx.send(msg).map_err(|_| Error::ChannelClosed)
    }

    /// All notes off on every channel.
    pub fn panic(&self) -> Result<()> {
        self.send(ControlMessage::Panic)
    }

    /// Ask the engine to stop. Pending note-offs still go out.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.control_tx.send(ControlMessage::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Copy of the latest published state.
    pub fn state(&self) -> BusSnapshot {
        self.state.snapshot()
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    /// Section cues as they happen.
    pub fn cues(&self) -> &Receiver<Cue> {
        &self.cues
    }

    pub fn control_sender(&self) -> Sender<ControlMessage> {
        self.control_tx.clone()
    }
}

/// Owns the engine thread.
pub struct Runtime {
    handle: RuntimeHandle,
    thread: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Spawn the engine thread and start playing.
    pub fn start(engine: Engine) -> Result<Self> {
        let (control_tx, control_rx) = unbounded();
        let (cue_tx, cue_rx) = bounded(CUE_BACKLOG);
        let mut engine = engine.with_cue_sender(cue_tx);

        let handle = RuntimeHandle {
            control_tx,
            state: engine.state_manager(),
            stop: engine.stop_flag(),
            cues: cue_rx,
        };

        let tempo = engine.tempo();
        let thread = thread::Builder::new()
            .name("undertow-engine".to_string())
            .spawn(move || {
                log::info!("[VOICE] Engine thread started");
                let mut clock = WallClock::start(tempo);
                engine.run(&mut clock, Some(&control_rx));
                log::info!("[VOICE] Engine thread finished");
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Block until the engine thread exits.
    pub fn join(mut self) {
        self.wait();
    }

    /// Stop and wait for every pending note-off.
    pub fn shutdown(mut self) {
        self.handle.stop();
        self.wait();
    }

    fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Engine thread panicked");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.stop();
            self.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioOut, LogAudio};
    use crate::form::{Ending, FormPlan, Section, Span, Stage};
    use crate::midi::{MemorySink, MidiChannel, MidiMessage, MidiOut};
    use crate::timing::{Beats, Tempo};
    use crate::voice::{StepContext, Voice, VoiceSpec};
    use std::time::{Duration, Instant};

    struct Tick;

    impl Voice for Tick {
        fn name(&self) -> &str {
            "tick"
        }

        fn step(&mut self, ctx: &mut StepContext<'_>) -> crate::Result<Beats> {
            ctx.play(72, 100, MidiChannel::new(1), Beats(2.0));
            Ok(Beats(1.0))
        }
    }

    fn fast_engine(sink: &MemorySink) -> Engine {
        let plan = FormPlan::new(
            vec![
                Stage::new(Section::Intro, Span::Bars(1)),
                Stage::new(Section::Groove, Span::Forever),
            ],
            Ending::Hold,
        )
        .unwrap();
        // 600 bpm: a beat every 100ms.
        Engine::new(
            plan,
            vec![VoiceSpec::new(Tick)],
            MidiOut::new(Box::new(sink.clone()), [MidiChannel::new(1)]),
            AudioOut::new(Box::new(LogAudio)),
            Tempo::new(600.0),
        )
        .with_seed(Some(3))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_runtime_plays_and_stops_cleanly() {
        let sink = MemorySink::new();
        let runtime = Runtime::start(fast_engine(&sink)).unwrap();
        let handle = runtime.handle();

        assert!(wait_for(|| handle.state().bar >= 2));
        assert_eq!(handle.state().section, Section::Groove);
        let cue = handle.cues().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(cue.name, "intro_start");

        runtime.shutdown();
        assert!(handle.is_stopped());
        assert!(handle.state().stopped);

        let log = sink.messages();
        let ons = log
            .iter()
            .filter(|c| matches!(c.message, MidiMessage::NoteOn { .. }))
            .count();
        let offs = log
            .iter()
            .filter(|c| matches!(c.message, MidiMessage::NoteOff { .. }))
            .count();
        assert!(ons > 0);
        assert_eq!(ons, offs);
    }

    #[test]
    fn test_toggle_reaches_running_engine() {
        let sink = MemorySink::new();
        let runtime = Runtime::start(fast_engine(&sink)).unwrap();
        let handle = runtime.handle();

        handle.send(ControlMessage::SetMidiEnabled(false)).unwrap();
        assert!(wait_for(|| !handle.state().midi_enabled));
        handle.panic().unwrap();
        runtime.shutdown();

        assert!(handle.send(ControlMessage::Panic).is_err());
    }
}
