//! Emerald Rite: a bar-counted dub ritual.
//!
//! 72 bpm in 4/4. Intro for 32 bars, groove for 64, axis and edict for 32
//! each, then dissolve for good. Drums, skank, halo and phrases go out as
//! timed notes; the sub bass holds its notes and moves the mod wheel under
//! them.

use super::script::Script;
use super::{channel, Heartbeat, Piece, PieceSetup};
use crate::audio::AudioEvent;
use crate::bus::Value;
use crate::config::Config;
use crate::form::{FormPlan, Section};
use crate::midi::MidiChannel;
use crate::pattern::Ring;
use crate::ramp::CcRampSpec;
use crate::timing::{Beats, Tempo};
use crate::voice::{StepContext, Voice, VoiceSpec};
use crate::Result;

const KICK: i32 = 36;
const SNARE: i32 = 38;
const CLOSED_HAT: i32 = 42;
const CUTOFF_CC: i32 = 74;

const BASSLINE: [i32; 8] = [28, 28, 31, 23, 21, 28, 31, 26];
const DISSOLVE_NOTE: i32 = 28;

const MW_GROOVE: [i32; 8] = [28, 34, 40, 46, 52, 46, 40, 34];
const MW_AXIS: [i32; 8] = [42, 54, 66, 78, 70, 60, 50, 58];
const MW_EDICT: [i32; 8] = [72, 84, 96, 110, 102, 92, 118, 88];
const MW_DISSOLVE: [i32; 9] = [64, 56, 48, 40, 32, 24, 16, 8, 0];

const SKANK_CHORDS: [&[i32]; 4] = [
    &[52, 55, 59, 62], // e3 minor7
    &[55, 58, 62, 65], // g3 minor7
    &[57, 62, 64],     // a3 sus4
    &[47, 50, 54, 57], // b2 minor7
];

const HALO_TONES: [i32; 4] = [76, 79, 83, 86];
const SIREN_ROOTS: [i32; 4] = [64, 67, 69, 71];

pub(crate) fn setup(config: &Config, tempo: Tempo) -> Result<PieceSetup> {
    let plan = FormPlan::from_bar_thresholds(&[
        (1, Section::Intro),
        (33, Section::Groove),
        (97, Section::Axis),
        (129, Section::Edict),
        (161, Section::Dissolve),
    ])?;

    let ch = &config.midi.channels;
    let drums = channel(ch.drums);
    let phrase = channel(ch.phrase);
    let midi = &config.midi;

    let voices = vec![
        VoiceSpec::new(Kick::new(drums)),
        VoiceSpec::new(Snare::new(drums)),
        VoiceSpec::new(Hats::new(drums)),
        VoiceSpec::new(Skank::new(channel(ch.skank))),
        VoiceSpec::new(SubBass {
            channel: channel(ch.bass),
            tick: 0,
            mw_tick: 0,
            velocity: midi.bass_velocity as i32,
            velocity_edict: midi.bass_velocity_edict as i32,
            velocity_dissolve: midi.bass_velocity_dissolve as i32,
            controller: midi.mod_wheel_cc as i32,
            jitter: midi.mod_wheel_jitter,
        }),
        VoiceSpec::new(SpireHalo::new(channel(ch.halo))),
        VoiceSpec::new(TabletPhrases::new(phrase)),
        VoiceSpec::new(DubSiren::default()),
        VoiceSpec::new(Dust),
        VoiceSpec::new(Heartbeat::new(phrase)),
    ];

    let knobs = vec![
        ("skank_cutoff".to_string(), Value::Number(95.0)),
        ("bass_cutoff".to_string(), Value::Number(75.0)),
        ("dub_mix".to_string(), Value::Number(0.60)),
        ("space".to_string(), Value::Number(0.85)),
        ("damp".to_string(), Value::Number(0.55)),
        // Beats.
        ("swing".to_string(), Value::Number(0.03)),
    ];

    Ok(PieceSetup {
        piece: Piece::Emerald,
        tempo,
        plan,
        voices,
        knobs,
        channels: vec![
            channel(ch.bass),
            channel(ch.skank),
            channel(ch.halo),
            phrase,
            drums,
        ],
        audio_default: false,
    })
}

fn in_groove(section: Section) -> bool {
    matches!(section, Section::Groove | Section::Axis | Section::Edict)
}

/// Echo and room from the live knobs.
fn dub(ctx: &StepContext<'_>, event: AudioEvent) -> AudioEvent {
    event
        .with_control("echo_mix", ctx.knob("dub_mix", 0.6))
        .with_control("room_size", ctx.knob("space", 0.85))
        .with_control("room_damp", ctx.knob("damp", 0.55))
}

fn sample(ctx: &StepContext<'_>, name: &str, amp: f64) -> AudioEvent {
    dub(ctx, AudioEvent::new(name).with_control("amp", amp))
}

struct Kick {
    channel: MidiChannel,
    script: Script,
}

impl Kick {
    fn new(channel: MidiChannel) -> Self {
        Self {
            channel,
            script: Script::new(),
        }
    }
}

impl Voice for Kick {
    fn name(&self) -> &str {
        "kick"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            let s = ctx.section();
            if in_groove(s) {
                let heavy = if s == Section::Edict { 1.9 } else { 1.4 };
                self.script
                    .note(KICK, 100, self.channel, 0.06)
                    .audio(sample(ctx, "bd_fat", 1.6))
                    .rest(3.0)
                    .note(KICK, 112, self.channel, 0.06)
                    .audio(sample(ctx, "bd_fat", heavy))
                    .rest(1.0);
            } else {
                self.script.rest(4.0);
            }
        }
        Ok(self.script.run(ctx))
    }
}

struct Snare {
    channel: MidiChannel,
    script: Script,
}

impl Snare {
    fn new(channel: MidiChannel) -> Self {
        Self {
            channel,
            script: Script::new(),
        }
    }
}

impl Voice for Snare {
    fn name(&self) -> &str {
        "snare"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            let s = ctx.section();
            if in_groove(s) {
                let amp = if s == Section::Edict { 1.2 } else { 0.9 };
                self.script
                    .rest(2.0)
                    .note(SNARE, 92, self.channel, 0.05)
                    .audio(sample(ctx, "sn_dolf", amp).with_control("rate", 0.9))
                    .rest(2.0);
            } else {
                self.script.rest(4.0);
            }
        }
        Ok(self.script.run(ctx))
    }
}

/// Closed hats with every other hit pushed late by the `swing` knob.
struct Hats {
    channel: MidiChannel,
    script: Script,
    swing_tick: u64,
}

impl Hats {
    fn new(channel: MidiChannel) -> Self {
        Self {
            channel,
            script: Script::new(),
            swing_tick: 0,
        }
    }

    fn swung(&mut self, ctx: &StepContext<'_>, beats: f64) -> f64 {
        let late = self.swing_tick % 2 == 0;
        self.swing_tick += 1;
        if late {
            beats + ctx.knob("swing", 0.03).max(0.0)
        } else {
            beats
        }
    }
}

impl Voice for Hats {
    fn name(&self) -> &str {
        "hats"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            let (hits, spacing, velocity, amp, rate) = match ctx.section() {
                Section::Groove | Section::Axis => (8, 0.5, 50, 0.20, 1.25),
                Section::Edict => (4, 1.0, 40, 0.12, 1.15),
                _ => (0, 0.0, 0, 0.0, 0.0),
            };
            if hits == 0 {
                self.script.rest(4.0);
            }
            for _ in 0..hits {
                let wait = self.swung(ctx, spacing);
                self.script
                    .note(CLOSED_HAT, velocity, self.channel, 0.03)
                    .audio(sample(ctx, "drum_cymbal_closed", amp).with_control("rate", rate))
                    .rest(wait);
            }
        }
        Ok(self.script.run(ctx))
    }
}

/// Offbeat chord stabs with the filter on CC 74.
struct Skank {
    channel: MidiChannel,
    chords: Ring<&'static [i32]>,
    tick: u64,
    script: Script,
}

impl Skank {
    fn new(channel: MidiChannel) -> Self {
        Self {
            channel,
            chords: Ring::new(SKANK_CHORDS.to_vec()),
            tick: 0,
            script: Script::new(),
        }
    }

    fn next_chord(&mut self) -> &'static [i32] {
        let chord = self.chords.get(self.tick).unwrap_or(&[]);
        self.tick += 1;
        chord
    }

    fn stab(&self, ctx: &StepContext<'_>, chord: &[i32], amp: f64) -> Vec<AudioEvent> {
        let cutoff = ctx.knob("skank_cutoff", 95.0);
        chord
            .iter()
            .map(|&note| {
                dub(
                    ctx,
                    AudioEvent::new("pluck")
                        .with_control("note", note as f64)
                        .with_control("amp", amp)
                        .with_control("release", 0.18)
                        .with_control("cutoff", cutoff),
                )
            })
            .collect()
    }
}

impl Voice for Skank {
    fn name(&self) -> &str {
        "skank"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            if in_groove(ctx.section()) {
                let cutoff = ctx.knob("skank_cutoff", 95.0).round() as i32;
                ctx.cc(CUTOFF_CC, cutoff, self.channel);

                let first = self.next_chord();
                let second = self.next_chord();
                self.script
                    .rest(0.5)
                    .chord(first, 76, self.channel, 0.16);
                for event in self.stab(ctx, first, 0.45) {
                    self.script.audio(event);
                }
                self.script.rest(2.5).chord(second, 82, self.channel, 0.16);
                for event in self.stab(ctx, second, 0.50) {
                    self.script.audio(event);
                }
                self.script.rest(1.0);
            } else {
                self.script.rest(4.0);
            }
        }
        Ok(self.script.run(ctx))
    }
}

/// Held bass notes with mod-wheel movement while they sound. The
/// `bass_cutoff` knob rides CC 74 ahead of each note.
struct SubBass {
    channel: MidiChannel,
    tick: u64,
    mw_tick: u64,
    velocity: i32,
    velocity_edict: i32,
    velocity_dissolve: i32,
    controller: i32,
    jitter: u8,
}

impl SubBass {
    const SUSTAIN: f64 = 0.9;
    const GAP: f64 = 0.1;

    fn mod_wheel(&mut self, section: Section) -> Vec<i32> {
        let (ring, steps) = match section {
            Section::Edict => (&MW_EDICT[..], 3),
            Section::Axis => (&MW_AXIS[..], 2),
            _ => (&MW_GROOVE[..], 1),
        };
        let ring = Ring::new(ring.to_vec());
        (0..steps)
            .map(|_| {
                let value = ring.get(self.mw_tick).unwrap_or(0);
                self.mw_tick += 1;
                value
            })
            .collect()
    }
}

impl Voice for SubBass {
    fn name(&self) -> &str {
        "sub_bass"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let s = ctx.section();

        if in_groove(s) {
            let note = Ring::new(BASSLINE.to_vec()).get(self.tick).unwrap_or(DISSOLVE_NOTE);
            self.tick += 1;
            let velocity = if s == Section::Edict {
                self.velocity_edict
            } else {
                self.velocity
            };

            let cutoff = ctx.knob("bass_cutoff", 75.0).round() as i32;
            ctx.cc(CUTOFF_CC, cutoff, self.channel);
            if let Some(held) = ctx.note_on(note, velocity, self.channel) {
                ctx.release_after(held, Beats(Self::SUSTAIN));
            }
            if ctx.cc_enabled() {
                let values = self.mod_wheel(s);
                ctx.ramp(
                    CcRampSpec::new(self.controller, self.channel, values, Beats(Self::SUSTAIN))
                        .with_jitter(self.jitter),
                );
            }
            return Ok(Beats(Self::SUSTAIN + Self::GAP));
        }

        if s == Section::Dissolve {
            // Closes the previous tail's ramp.
            ctx.cc(self.controller, 0, self.channel);
            if let Some(held) = ctx.note_on(DISSOLVE_NOTE, self.velocity_dissolve, self.channel) {
                ctx.release_after(held, Beats(4.0));
            }
            ctx.ramp(
                CcRampSpec::new(self.controller, self.channel, MW_DISSOLVE.to_vec(), Beats(4.0))
                    .with_jitter(self.jitter),
            );
            return Ok(Beats(4.0));
        }

        // Keep the channel clean between sections.
        ctx.cc(self.controller, 0, self.channel);
        Ok(Beats(1.0))
    }
}

/// Sparse high witness tones.
struct SpireHalo {
    channel: MidiChannel,
}

impl SpireHalo {
    fn new(channel: MidiChannel) -> Self {
        Self { channel }
    }
}

impl Voice for SpireHalo {
    fn name(&self) -> &str {
        "spire_halo"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let s = ctx.section();
        if !matches!(s, Section::Intro | Section::Axis | Section::Dissolve) {
            return Ok(Beats(4.0));
        }

        let note = ctx.choose(&HALO_TONES).unwrap_or(HALO_TONES[0]);
        ctx.play(note, 40, self.channel, Beats(1.0));

        let amp = if s == Section::Intro { 0.25 } else { 0.18 };
        let pan = ctx.rrand(-0.4, 0.4);
        let event = dub(
            ctx,
            AudioEvent::new("hollow")
                .with_control("note", note as f64)
                .with_control("amp", amp)
                .with_control("attack", 0.3)
                .with_control("release", 1.8)
                .with_control("pan", pan),
        );
        let sounded = ctx.audio(event);

        Ok(Beats(if sounded && s != Section::Intro { 6.0 } else { 4.0 }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Utterance {
    Alethe,
    Lyare,
    MerRa,
    Truen,
    Nyathe,
    Sur,
    FalTa,
}

/// Short motifs, scripted per section.
struct TabletPhrases {
    channel: MidiChannel,
    script: Script,
}

impl TabletPhrases {
    fn new(channel: MidiChannel) -> Self {
        Self {
            channel,
            script: Script::new(),
        }
    }

    fn utter(&mut self, ctx: &StepContext<'_>, word: Utterance) {
        let ch = self.channel;
        let voice = |note: i32, amp: f64, release: f64| {
            dub(
                ctx,
                AudioEvent::new("prophet")
                    .with_control("note", note as f64)
                    .with_control("amp", amp)
                    .with_control("release", release),
            )
        };
        let s = &mut self.script;
        match word {
            Utterance::Alethe => {
                s.note(64, 44, ch, 1.0)
                    .rest(1.0)
                    .note(59, 40, ch, 0.9)
                    .audio(voice(64, 0.22, 1.4));
            }
            Utterance::Lyare => {
                s.note(67, 42, ch, 0.35).audio(voice(67, 0.18, 1.0));
            }
            Utterance::MerRa => {
                s.note(52, 52, ch, 0.25)
                    .rest(0.25)
                    .note(55, 50, ch, 0.5)
                    .audio(voice(55, 0.18, 0.9));
            }
            Utterance::Truen => {
                s.note(59, 48, ch, 0.2).audio(voice(59, 0.20, 1.1));
            }
            Utterance::Nyathe => {
                s.note(74, 38, ch, 1.0).audio(voice(74, 0.14, 1.3));
            }
            Utterance::Sur => {
                s.note(40, 52, ch, 1.0).audio(voice(40, 0.16, 1.0));
            }
            Utterance::FalTa => {
                s.note(40, 56, ch, 0.9)
                    .rest(0.25)
                    .note(35, 54, ch, 0.9)
                    .audio(voice(35, 0.16, 1.0));
            }
        }
    }
}

impl Voice for TabletPhrases {
    fn name(&self) -> &str {
        "tablet_phrases"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            match ctx.section() {
                Section::Intro => {
                    self.utter(ctx, Utterance::Alethe);
                    self.script.rest(8.0);
                }
                Section::Groove => {
                    if ctx.one_in(4) {
                        let word = ctx
                            .choose(&[Utterance::MerRa, Utterance::Truen, Utterance::Lyare])
                            .unwrap_or(Utterance::MerRa);
                        self.utter(ctx, word);
                    }
                    self.script.rest(8.0);
                }
                Section::Axis => {
                    self.utter(ctx, Utterance::Nyathe);
                    self.script.rest(2.0);
                    self.utter(ctx, Utterance::Sur);
                    self.script.rest(2.0);
                    self.utter(ctx, Utterance::FalTa);
                    self.script.rest(4.0);
                }
                Section::Edict => {
                    self.utter(ctx, Utterance::Nyathe);
                    self.script.rest(1.0);
                    self.utter(ctx, Utterance::Sur);
                    self.script.rest(3.0);
                }
                Section::Dissolve => {
                    self.utter(ctx, Utterance::Alethe);
                    self.script.rest(8.0);
                }
                _ => {
                    self.script.rest(4.0);
                }
            }
        }
        Ok(self.script.run(ctx))
    }
}

/// Occasional two-note swell, audio only.
#[derive(Default)]
struct DubSiren {
    script: Script,
}

impl Voice for DubSiren {
    fn name(&self) -> &str {
        "dub_siren"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if self.script.is_empty() {
            if matches!(ctx.section(), Section::Groove | Section::Axis) && ctx.one_in(6) {
                let root = ctx.choose(&SIREN_ROOTS).unwrap_or(SIREN_ROOTS[0]);
                let blade = |note: i32, amp: f64, sustain: f64, release: f64, cutoff: f64| {
                    AudioEvent::new("blade")
                        .with_control("note", note as f64)
                        .with_control("amp", amp)
                        .with_control("sustain", sustain)
                        .with_control("release", release)
                        .with_control("cutoff", cutoff)
                        .with_control("echo_mix", 0.55)
                };
                self.script
                    .audio(blade(root, 0.25, 0.25, 0.6, 95.0))
                    .rest(0.25)
                    .audio(blade(root + 7, 0.22, 0.20, 0.7, 105.0))
                    .rest(6.0);
            } else {
                self.script.rest(4.0);
            }
        }
        Ok(self.script.run(ctx))
    }
}

/// Tape dust: rare ticks and snaps.
struct Dust;

impl Voice for Dust {
    fn name(&self) -> &str {
        "dust"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if !matches!(ctx.section(), Section::Intro | Section::Axis | Section::Dissolve) {
            return Ok(Beats(2.0));
        }
        if ctx.one_in(3) {
            ctx.audio(AudioEvent::new("elec_tick").with_control("amp", 0.06));
        }
        if ctx.one_in(5) {
            ctx.audio(
                AudioEvent::new("perc_snap")
                    .with_control("amp", 0.04)
                    .with_control("rate", 0.8),
            );
        }
        Ok(Beats(1.0))
    }
}
