//! Undertow Core - engine for long-running procedural MIDI and audio pieces.
//!
//! This crate provides the building blocks for undertow:
//!
//! - **Timing** - Beat time, tempo, time signatures, virtual and wall clocks
//! - **Scheduler** - Cooperative, beat-ordered wake-ups for voices and note-offs
//! - **Bus** - Shared control state with a single section writer
//! - **Form** - Sections, spans and cues
//! - **Notes** - MIDI note lifecycle with guaranteed note-offs
//! - **Ramps** - Stepped controller ramps
//! - **Pieces** - Emerald Rite, Abyssal Conduit and Root Sleep
//! - **Runtime** - Engine thread, control messages and state snapshots
//!
//! # Architecture
//!
//! A single [`Engine`] owns every voice, the [`StateBus`] and the outputs.
//! Voices are stepped one at a time; a step returns how long to sleep. Other
//! threads never touch the engine directly: they send [`ControlMessage`]s
//! and read [`BusSnapshot`]s published through a [`StateManager`].
//!
//! # Feature Flags
//!
//! - `native` (default) - midir MIDI ports and UDP OSC audio output

pub mod audio;
pub mod bus;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod form;
pub mod midi;
pub mod notes;
pub mod pattern;
pub mod pieces;
pub mod ramp;
pub mod runtime;
pub mod scheduler;
pub mod score;
pub mod state;
pub mod timing;
pub mod trigger;
pub mod voice;
pub mod wander;

pub use audio::{AudioEvent, AudioOut, AudioSink, LogAudio, MemoryAudio, Room};
pub use bus::{StateBus, Value};
pub use config::Config;
pub use control::{Command, ControlMessage};
pub use engine::Engine;
pub use error::{Error, Result};
pub use form::{Cue, Ending, FormPlan, Section, Span, Stage};
pub use midi::{LogSink, MemorySink, MidiChannel, MidiMessage, MidiOut, MidiSink, PortOpener};
pub use pieces::{Piece, PieceSetup};
pub use runtime::{Runtime, RuntimeHandle};
pub use score::ScoreWriter;
pub use state::{BusSnapshot, StateManager, VoiceInfo};
pub use timing::{BeatTime, Beats, Clock, Tempo, TimeSignature, VirtualClock, WallClock};
pub use voice::{StepContext, Voice, VoiceSpec, VoiceStatus};

// Native-only re-exports
#[cfg(feature = "native")]
pub use audio::OscAudioSink;
#[cfg(feature = "native")]
pub use midi::MidirSink;
