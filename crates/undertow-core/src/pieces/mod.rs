//! The pieces undertow can play.
//!
//! A piece is a form plan, a tempo, a set of voices and the bus knobs they
//! start from. [`Piece::setup`] builds those from a [`Config`];
//! [`PieceSetup::into_engine`] wires them to outputs.

pub mod abyssal;
pub mod emerald;
pub mod root_sleep;
pub mod script;

use crate::audio::{AudioEvent, AudioOut, AudioSink, Room};
use crate::bus::{keys, Value};
use crate::config::Config;
use crate::engine::Engine;
use crate::form::FormPlan;
use crate::midi::{MidiChannel, MidiOut, MidiSink};
use crate::timing::{Beats, Tempo};
use crate::voice::{StepContext, Voice, VoiceSpec};
use crate::{Error, Result};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Piece {
    /// Bar-counted dub ritual, ends in a held dissolve.
    Emerald,
    /// Cycling MIDI-only groove.
    Abyssal,
    /// Slow audio field that settles into sleep.
    RootSleep,
}

impl Piece {
    pub const ALL: [Piece; 3] = [Piece::Emerald, Piece::Abyssal, Piece::RootSleep];

    pub fn name(&self) -> &'static str {
        match self {
            Piece::Emerald => "emerald",
            Piece::Abyssal => "abyssal",
            Piece::RootSleep => "root-sleep",
        }
    }

    pub fn default_bpm(&self) -> f64 {
        match self {
            Piece::Emerald | Piece::Abyssal => 72.0,
            Piece::RootSleep => 60.0,
        }
    }

    /// Build the form, voices and knobs for this piece.
    pub fn setup(&self, config: &Config) -> Result<PieceSetup> {
        let tempo = Tempo::new(config.engine.bpm.unwrap_or_else(|| self.default_bpm()));
        match self {
            Piece::Emerald => emerald::setup(config, tempo),
            Piece::Abyssal => abyssal::setup(config, tempo),
            Piece::RootSleep => root_sleep::setup(config, tempo),
        }
    }
}

impl std::fmt::Display for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Piece {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "emerald" | "emerald-rite" => Ok(Piece::Emerald),
            "abyssal" | "abyssal-conduit" => Ok(Piece::Abyssal),
            "root-sleep" | "rootsleep" | "sleep" => Ok(Piece::RootSleep),
            other => Err(Error::Config(format!(
                "Unknown piece '{other}' (expected emerald, abyssal or root-sleep)"
            ))),
        }
    }
}

/// Everything an engine needs for one piece.
pub struct PieceSetup {
    pub piece: Piece,
    pub tempo: Tempo,
    pub plan: FormPlan,
    pub voices: Vec<VoiceSpec>,
    pub knobs: Vec<(String, Value)>,
    /// Channels panic covers even before they are used.
    pub channels: Vec<MidiChannel>,
    /// Whether audio events go out unless the config says otherwise.
    pub audio_default: bool,
}

impl PieceSetup {
    /// Wire the piece to its outputs, applying toggles, mix and seed.
    pub fn into_engine(
        self,
        config: &Config,
        midi_sink: Box<dyn MidiSink>,
        audio_sink: Box<dyn AudioSink>,
    ) -> Engine {
        let mut midi = MidiOut::new(midi_sink, self.channels);
        midi.set_enabled(config.midi.enabled);
        midi.set_cc_enabled(config.midi.cc_enabled);

        let mut audio = AudioOut::new(audio_sink)
            .with_master_amplitude(config.mix.master_amplitude)
            .with_room(Room {
                mix: config.mix.room_mix,
                size: config.mix.room_size,
                damp: config.mix.room_damp,
            });
        audio.set_enabled(config.audio.enabled.unwrap_or(self.audio_default));

        log::info!(
            "Piece '{}' at {:.0} bpm with {} voices (midi {}, audio {})",
            self.piece,
            self.tempo.bpm(),
            self.voices.len(),
            if midi.is_enabled() { "on" } else { "off" },
            if audio.is_enabled() { "on" } else { "off" },
        );

        Engine::new(self.plan, self.voices, midi, audio, self.tempo)
            .with_seed(config.engine.seed)
            .with_knobs(self.knobs)
    }
}

fn channel(number: u8) -> MidiChannel {
    MidiChannel::new(number as i32)
}

/// Debug click: a short high note every beat while the heartbeat flag is on.
pub struct Heartbeat {
    channel: MidiChannel,
}

impl Heartbeat {
    pub fn new(channel: MidiChannel) -> Self {
        Self { channel }
    }
}

impl Voice for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if ctx.flag(keys::HEARTBEAT, false) {
            ctx.play(84, 50, self.channel, Beats(0.08));
            if ctx.audio_enabled() {
                ctx.audio(AudioEvent::new("elec_tick").with_control("amp", 0.08));
            }
        }
        Ok(Beats(1.0))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::control::ControlMessage;

    #[test]
    fn test_piece_names_round_trip() {
        for piece in Piece::ALL {
            assert_eq!(piece.name().parse::<Piece>().unwrap(), piece);
        }
        assert_eq!("Emerald_Rite".parse::<Piece>().unwrap(), Piece::Emerald);
        assert!("bolero".parse::<Piece>().is_err());
    }

    #[test]
    fn test_bpm_override() {
        let mut config = Config::default();
        assert_eq!(Piece::RootSleep.setup(&config).unwrap().tempo.bpm(), 60.0);
        config.engine.bpm = Some(90.0);
        assert_eq!(Piece::Emerald.setup(&config).unwrap().tempo.bpm(), 90.0);
    }

    #[test]
    fn test_heartbeat_follows_flag() {
        let config = Config::default();
        let mut out = render(Piece::Emerald, &config, 2.5);
        let phrase = config.midi.channels.phrase;
        let clicks = |out: &Rendered| {
            note_ons(&out.midi(), phrase)
                .into_iter()
                .filter(|(_, note, _)| *note == 84)
                .map(|(at, _, _)| at)
                .collect::<Vec<_>>()
        };
        assert!(clicks(&out).is_empty());

        out.engine.apply(ControlMessage::SetHeartbeat(true));
        out.until(5.5);
        assert_eq!(clicks(&out), vec![3.0, 4.0, 5.0]);
        let snapshot = out.engine.state_manager().snapshot();
        assert_eq!(snapshot.value(keys::HEARTBEAT), Some(&Value::Flag(true)));
    }

    #[test]
    fn test_every_piece_starts_all_voices() {
        let config = Config::default();
        for piece in Piece::ALL {
            let out = render(piece, &config, 64.0);
            let snapshot = out.engine.state_manager().snapshot();
            assert!(!snapshot.voices.is_empty());
            for voice in &snapshot.voices {
                assert_eq!(
                    voice.status,
                    crate::voice::VoiceStatus::Running,
                    "{piece}: {} is {}",
                    voice.name,
                    voice.status
                );
            }
        }
    }
}
