//! Abyssal Conduit: a cycling MIDI groove.
//!
//! Intro, rise and ritual last 32, 64 and 96 beats and then start over.
//! Everything follows two bus knobs: `root`, the MIDI note the harmony sits
//! on, and `density`, which raises velocities and hit probabilities.

use super::{channel, Heartbeat, Piece, PieceSetup};
use crate::bus::{keys, Value};
use crate::config::Config;
use crate::form::{Ending, FormPlan, Section, Span, Stage};
use crate::midi::MidiChannel;
use crate::notes::HeldNote;
use crate::pattern::{euclid, scale, Ring, MINOR_PENTATONIC};
use crate::timing::{Beats, Tempo};
use crate::voice::{StepContext, Voice, VoiceSpec};
use crate::Result;

const KICK: i32 = 36;
const CLOSED_HAT: i32 = 42;
/// E2
const DEFAULT_ROOT: f64 = 40.0;
const DEFAULT_DENSITY: f64 = 0.55;

const SWING: [f64; 8] = [0.25, 0.25, 0.25, 0.25, 0.25, 0.23, 0.27, 0.25];
const CHANT_DEGREES: [usize; 8] = [0, 0, 3, 0, 5, 3, 7, 3];
const CHANT_LENGTHS: [f64; 4] = [0.2, 0.25, 0.35, 0.18];
const CHANT_WAITS: [f64; 5] = [0.5, 0.25, 0.25, 0.5, 1.0];

pub(crate) fn setup(config: &Config, tempo: Tempo) -> Result<PieceSetup> {
    let plan = FormPlan::new(
        vec![
            Stage::new(Section::Intro, Span::Beats(Beats(32.0))),
            Stage::new(Section::Rise, Span::Beats(Beats(64.0))),
            Stage::new(Section::Ritual, Span::Beats(Beats(96.0))),
        ],
        Ending::Cycle { to: 0 },
    )?;

    let ch = &config.midi.channels;
    let channels = Channels {
        drums: channel(ch.drums),
        bass: channel(ch.bass),
        sub: channel(ch.sub),
        drone: channel(ch.drone),
        chant: channel(ch.chant),
        hats: channel(ch.hats),
    };

    let voices = vec![
        VoiceSpec::new(Thump {
            ch: channels,
            step: 0,
            swing: 0,
        }),
        VoiceSpec::new(Bass {
            ch: channels,
            tick: 0,
        })
        .synced_to("thump"),
        VoiceSpec::new(Drone { ch: channels }),
        VoiceSpec::new(Hats {
            ch: channels,
            step: 0,
        })
        .synced_to("thump"),
        VoiceSpec::new(Chant {
            ch: channels,
            degree: 0,
            length: 0,
            wait: 0,
        }),
        VoiceSpec::new(Heartbeat::new(channel(ch.phrase))),
    ];

    Ok(PieceSetup {
        piece: Piece::Abyssal,
        tempo,
        plan,
        voices,
        knobs: vec![
            (keys::ROOT.to_string(), Value::Number(DEFAULT_ROOT)),
            (keys::DENSITY.to_string(), Value::Number(DEFAULT_DENSITY)),
        ],
        channels: vec![
            channels.bass,
            channels.sub,
            channels.drone,
            channels.chant,
            channels.hats,
            channels.drums,
        ],
        audio_default: false,
    })
}

#[derive(Clone, Copy, Debug)]
struct Channels {
    drums: MidiChannel,
    bass: MidiChannel,
    sub: MidiChannel,
    drone: MidiChannel,
    chant: MidiChannel,
    hats: MidiChannel,
}

fn root(ctx: &StepContext<'_>) -> i32 {
    ctx.knob(keys::ROOT, DEFAULT_ROOT).round() as i32
}

fn density(ctx: &StepContext<'_>) -> f64 {
    ctx.knob(keys::DENSITY, DEFAULT_DENSITY).clamp(0.0, 1.0)
}

/// Kick plus a short sub note on a Euclidean 16-step pattern.
struct Thump {
    ch: Channels,
    step: u64,
    swing: u64,
}

impl Voice for Thump {
    fn name(&self) -> &str {
        "thump"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let hits = match ctx.section() {
            Section::Intro => 3,
            Section::Rise => 5,
            _ => 7,
        };
        let pattern = euclid(hits, 16);
        let hit = pattern[(self.step % 16) as usize];
        self.step += 1;

        let dens = density(ctx);
        if hit && ctx.chance(0.85 + dens * 0.1) {
            let r = root(ctx);
            ctx.play(KICK, (90.0 + dens * 30.0) as i32, self.ch.drums, Beats(0.04));
            ctx.play(r, (70.0 + dens * 40.0) as i32, self.ch.sub, Beats(0.18));
        }

        let wait = Ring::new(SWING.to_vec()).get(self.swing).unwrap_or(0.25);
        self.swing += 1;
        Ok(Beats(wait))
    }
}

/// Root movement, held from the first thump.
struct Bass {
    ch: Channels,
    tick: u64,
}

impl Voice for Bass {
    fn name(&self) -> &str {
        "bass"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let r = root(ctx);
        let intro = ctx.section() == Section::Intro;
        let line = if intro {
            [r, r, r - 5, r]
        } else {
            [r, r - 5, r - 7, r]
        };
        let note = line[(self.tick % 4) as usize];
        self.tick += 1;

        let dens = density(ctx);
        let length = if intro { 0.35 } else { 0.5 };
        ctx.play(note, (75.0 + dens * 45.0) as i32, self.ch.bass, Beats(length));
        Ok(Beats(0.5))
    }
}

/// Three-note minor seventh bed.
struct Drone {
    ch: Channels,
}

impl Voice for Drone {
    fn name(&self) -> &str {
        "drone"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let r = root(ctx);
        let velocity = (45.0 + density(ctx) * 20.0) as i32;
        let intro = ctx.section() == Section::Intro;
        let (hold, gap) = if intro { (6.0, 2.0) } else { (4.0, 1.0) };

        let held: Vec<HeldNote> = [r, r + 3, r + 7]
            .into_iter()
            .filter_map(|note| ctx.note_on(note, velocity, self.ch.drone))
            .collect();
        for note in held {
            ctx.release_after(note, Beats(hold));
        }
        Ok(Beats(hold + gap))
    }
}

/// Off-intro hats on an 11-of-16 pattern, held from the first thump.
struct Hats {
    ch: Channels,
    step: u64,
}

impl Voice for Hats {
    fn name(&self) -> &str {
        "hats"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if ctx.section() != Section::Intro {
            let hit = euclid(11, 16)[(self.step % 16) as usize];
            self.step += 1;
            let dens = density(ctx);
            if hit && ctx.chance(0.6 + dens * 0.25) {
                let velocity = (25.0 + dens * 55.0) as i32;
                ctx.play(CLOSED_HAT, velocity, self.ch.hats, Beats(0.04));
            }
        }
        Ok(Beats(0.25))
    }
}

/// Pentatonic line for the ritual, with the odd octave flick.
struct Chant {
    ch: Channels,
    degree: u64,
    length: u64,
    wait: u64,
}

impl Voice for Chant {
    fn name(&self) -> &str {
        "chant"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let degree = CHANT_DEGREES[(self.degree % CHANT_DEGREES.len() as u64) as usize];
        self.degree += 1;
        let r = root(ctx);
        let note = scale(r, &MINOR_PENTATONIC, 2).get(degree).copied().unwrap_or(r);

        let dens = density(ctx);
        if ctx.section() == Section::Ritual && ctx.chance(0.45 + dens * 0.25) {
            let note = if ctx.chance(0.12) { note + 12 } else { note };
            let velocity = (35.0 + dens * 55.0) as i32;
            let length = Ring::new(CHANT_LENGTHS.to_vec())
                .get(self.length)
                .unwrap_or(0.2);
            self.length += 1;
            ctx.play(note, velocity, self.ch.chant, Beats(length));
        }

        let wait = Ring::new(CHANT_WAITS.to_vec()).get(self.wait).unwrap_or(0.5);
        self.wait += 1;
        Ok(Beats(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::control::ControlMessage;
    use crate::midi::MidiMessage;

    #[test]
    fn test_form_cycles_back_to_intro() {
        let config = Config::default();
        let mut out = render(Piece::Abyssal, &config, 31.9);
        assert_eq!(out.engine.bus().section(), Section::Intro);
        out.until(32.0);
        assert_eq!(out.engine.bus().section(), Section::Rise);
        out.until(96.0);
        assert_eq!(out.engine.bus().section(), Section::Ritual);
        out.until(192.0);
        assert_eq!(out.engine.bus().section(), Section::Intro);
        assert_eq!(out.engine.bus().section_entered().to_float(), 192.0);
    }

    #[test]
    fn test_intro_thump_follows_three_of_sixteen() {
        let mut config = Config::default();
        config.engine.seed = Some(5);
        let out = render(Piece::Abyssal, &config, 31.9);
        let kicks = note_ons(&out.midi(), config.midi.channels.drums);
        // Eight cycles of 3-in-16.
        assert!(!kicks.is_empty());
        assert!(kicks.len() <= 3 * 8);
        assert!(kicks.iter().all(|(_, note, vel)| *note == 36 && *vel == 106));
        let sub = note_ons(&out.midi(), config.midi.channels.sub);
        assert_eq!(sub.len(), kicks.len());
        assert!(sub.iter().all(|(_, note, vel)| *note == 40 && *vel == 92));
    }

    #[test]
    fn test_bass_waits_for_thump_and_tracks_root() {
        let config = Config::default();
        let mut out = render(Piece::Abyssal, &config, 1.9);
        let bass = note_ons(&out.midi(), config.midi.channels.bass);
        let pitches: Vec<u8> = bass.iter().map(|(_, n, _)| *n).collect();
        assert_eq!(pitches, vec![40, 40, 35, 40]);
        assert!((bass[0].0 - 0.25).abs() < 1e-9);

        out.engine.apply(ControlMessage::SetKnob {
            key: keys::ROOT.into(),
            value: Value::Number(45.0),
        });
        out.sink.clear();
        out.until(2.4);
        let next = note_ons(&out.midi(), config.midi.channels.bass);
        assert_eq!(next[0].1, 45);
    }

    #[test]
    fn test_drone_holds_chord_and_always_releases() {
        let config = Config::default();
        let mut out = render(Piece::Abyssal, &config, 7.5);
        let drone_ch = config.midi.channels.drone;
        let chord: Vec<u8> = note_ons(&out.midi(), drone_ch)
            .iter()
            .filter(|(at, _, _)| *at == 0.0)
            .map(|(_, n, _)| *n)
            .collect();
        assert_eq!(chord, vec![40, 43, 47]);

        let offs: Vec<f64> = out
            .midi()
            .iter()
            .filter(|c| matches!(c.message, MidiMessage::NoteOff { channel, .. } if channel.number() == drone_ch))
            .map(|c| c.at.to_float())
            .collect();
        assert_eq!(offs, vec![6.0, 6.0, 6.0]);

        out.engine.apply(ControlMessage::Stop);
        out.engine.run(&mut crate::timing::VirtualClock::new(), None);
        let log = out.midi();
        let ons = log.iter().filter(|c| matches!(c.message, MidiMessage::NoteOn { .. })).count();
        let offs = log.iter().filter(|c| matches!(c.message, MidiMessage::NoteOff { .. })).count();
        assert_eq!(ons, offs);
    }

    #[test]
    fn test_chant_only_in_ritual() {
        let config = Config::default();
        let out = render(Piece::Abyssal, &config, 192.0);
        let chant = note_ons(&out.midi(), config.midi.channels.chant);
        assert!(!chant.is_empty());
        assert!(chant.iter().all(|(at, _, _)| *at >= 96.0 && *at < 192.0));
        let allowed = scale(40, &MINOR_PENTATONIC, 2);
        assert!(chant.iter().all(|(_, note, _)| {
            let n = *note as i32;
            allowed.contains(&n) || allowed.contains(&(n - 12))
        }));
    }

    #[test]
    fn test_hats_silent_in_intro() {
        let config = Config::default();
        let out = render(Piece::Abyssal, &config, 40.0);
        let hats = note_ons(&out.midi(), config.midi.channels.hats);
        assert!(!hats.is_empty());
        assert!(hats.iter().all(|(at, _, _)| *at >= 32.0));
    }
}
