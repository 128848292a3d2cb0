//! Root Sleep: a slow audio field for falling asleep to.
//!
//! Winddown, then descent, then sleep forever. One shared `climate` value
//! wanders on the bus and nudges most layers so the field moves as one.
//! Nothing here has a sharp edge; every event carries long envelopes and the
//! rare chimes fade away as sleep deepens.

use super::script::Script;
use super::{channel, Heartbeat, Piece, PieceSetup};
use crate::audio::AudioEvent;
use crate::bus::{keys, Value};
use crate::config::{ClimateSettings, Config, SleepSettings};
use crate::form::{Ending, FormPlan, Section, Span, Stage};
use crate::pattern::{hz_to_midi, scale, MINOR_PENTATONIC};
use crate::timing::{Beats, Tempo};
use crate::trigger::{fade_factor, TriggerPolicy};
use crate::voice::{StepContext, Voice, VoiceSpec};
use crate::Result;

/// C2
const BASE_NOTE: f64 = 36.0;
const DRONE_AMP: f64 = 0.28;
const DRONE_CUTOFF: f64 = 75.0;
const PULSE_AMP: f64 = 0.10;
const WIND_AMP: f64 = 0.14;
const WIND_CUTOFF: f64 = 80.0;
const CHIME_AMP: f64 = 0.035;
const BINAURAL_AMP: f64 = 0.045;
const WHISPER_AMP: f64 = 0.04;

const WHISPER_MOTIFS: [[i32; 3]; 4] = [[57, 57, 52], [55, 52, 55], [48, 48, 43], [50, 48, 50]];
const WHISPER_GAPS: [f64; 3] = [0.6, 0.9, 1.2];

pub(crate) fn setup(config: &Config, tempo: Tempo) -> Result<PieceSetup> {
    let sleep = &config.sleep;
    let plan = FormPlan::new(
        vec![
            Stage::new(
                Section::Winddown,
                Span::Beats(tempo.seconds_to_beats(sleep.guide_minutes * 60.0)),
            ),
            Stage::new(
                Section::Descent,
                Span::Beats(tempo.seconds_to_beats(sleep.descent_minutes * 60.0)),
            ),
            Stage::new(Section::Sleep, Span::Forever),
        ],
        Ending::Hold,
    )?;

    let phrase = channel(config.midi.channels.phrase);
    let voices = vec![
        VoiceSpec::new(Climate {
            settings: config.climate.clone(),
        }),
        VoiceSpec::new(Binaural {
            settings: sleep.clone(),
        }),
        VoiceSpec::new(DroneBed),
        VoiceSpec::new(SubPulse {
            settings: sleep.clone(),
        }),
        VoiceSpec::new(Wind),
        VoiceSpec::new(MicroChime {
            settings: sleep.clone(),
            policy: TriggerPolicy::from_chance(sleep.chime_odds),
        }),
        VoiceSpec::new(Whisper {
            enabled: sleep.whisper_enabled,
            script: Script::new(),
        }),
        VoiceSpec::new(Guide {
            settings: sleep.clone(),
        }),
        VoiceSpec::new(Heartbeat::new(phrase)),
    ];

    Ok(PieceSetup {
        piece: Piece::RootSleep,
        tempo,
        plan,
        voices,
        knobs: vec![(keys::CLIMATE.to_string(), Value::Number(0.0))],
        channels: vec![phrase],
        audio_default: true,
    })
}

fn climate(ctx: &StepContext<'_>) -> f64 {
    ctx.knob(keys::CLIMATE, 0.0)
}

/// Walks the shared climate value.
struct Climate {
    settings: ClimateSettings,
}

impl Voice for Climate {
    fn name(&self) -> &str {
        "climate"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if !self.settings.enabled {
            return Ok(ctx.seconds(10.0));
        }
        let c = ctx.wander(0.0, self.settings.depth, 0.05, "climate");
        ctx.bus_mut().set(keys::CLIMATE, c);
        log::debug!("[VOICE] climate {:+.3}", c);
        Ok(ctx.seconds(self.settings.update_seconds))
    }
}

/// Two sines a few Hz apart, hard left and right.
struct Binaural {
    settings: SleepSettings,
}

impl Voice for Binaural {
    fn name(&self) -> &str {
        "binaural"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if !self.settings.binaural_enabled {
            return Ok(Beats(2.0));
        }
        let drift = climate(ctx) * 1.2;
        let left = self.settings.binaural_carrier_hz + drift;
        let right = left + self.settings.binaural_beat_hz;
        for (hz, pan) in [(left, -1.0), (right, 1.0)] {
            ctx.audio(
                AudioEvent::new("sine")
                    .with_control("note", hz_to_midi(hz))
                    .with_control("amp", BINAURAL_AMP)
                    .with_control("pan", pan)
                    .with_control("attack", 2.0)
                    .with_control("sustain", 10.0)
                    .with_control("release", 2.0),
            );
        }
        Ok(Beats(12.0))
    }
}

struct DroneBed;

impl Voice for DroneBed {
    fn name(&self) -> &str {
        "drone_bed"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let c = climate(ctx);
        let cutoff = ctx.wander(DRONE_CUTOFF + c * 18.0, 7.0, 0.03, "drone_cut");
        let detune = ctx.wander(c * 0.08, 0.10, 0.02, "drone_det");
        let amp = DRONE_AMP * (1.0 + c * 0.18);

        ctx.audio(
            AudioEvent::new("tri")
                .with_control("note", BASE_NOTE)
                .with_control("amp", amp * 0.65)
                .with_control("attack", 6.0)
                .with_control("sustain", 24.0)
                .with_control("release", 6.0)
                .with_control("detune", detune)
                .with_control("cutoff", cutoff),
        );
        ctx.audio(
            AudioEvent::new("sine")
                .with_control("note", BASE_NOTE - 12.0)
                .with_control("amp", amp * 0.35)
                .with_control("attack", 8.0)
                .with_control("sustain", 26.0)
                .with_control("release", 8.0)
                .with_control("cutoff", cutoff),
        );
        ctx.audio(
            AudioEvent::new("sine")
                .with_control("note", BASE_NOTE + 12.0)
                .with_control("amp", amp * 0.10)
                .with_control("attack", 10.0)
                .with_control("sustain", 18.0)
                .with_control("release", 10.0)
                .with_control("cutoff", cutoff),
        );
        Ok(Beats(24.0))
    }
}

/// Uncountable low pulse. The period is redrawn every time.
struct SubPulse {
    settings: SleepSettings,
}

impl Voice for SubPulse {
    fn name(&self) -> &str {
        "sub_pulse"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let [lo, hi] = if ctx.section() == Section::Sleep {
            self.settings.pulse_sleep_range
        } else {
            self.settings.pulse_winddown_range
        };
        let c = climate(ctx);
        let period = (ctx.rrand(lo, hi) + c * 2.0).clamp(lo.min(hi), lo.max(hi));

        ctx.audio(
            AudioEvent::new("sine")
                .with_control("note", BASE_NOTE - 12.0)
                .with_control("amp", PULSE_AMP)
                .with_control("attack", 1.0)
                .with_control("sustain", 0.35)
                .with_control("release", 3.2)
                .with_control("cutoff", 70.0),
        );
        ctx.audio(
            AudioEvent::new("tri")
                .with_control("note", BASE_NOTE)
                .with_control("amp", PULSE_AMP * 0.30)
                .with_control("attack", 1.1)
                .with_control("sustain", 0.2)
                .with_control("release", 2.8)
                .with_control("cutoff", 70.0),
        );
        Ok(ctx.seconds(period))
    }
}

/// Filtered noise breath.
struct Wind;

impl Voice for Wind {
    fn name(&self) -> &str {
        "wind"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let c = climate(ctx);
        let cutoff = ctx.wander(WIND_CUTOFF + c * 20.0, 14.0, 0.04, "wind_cut");
        let amp = ctx.wander(WIND_AMP * (1.0 + c * 0.16), 0.04, 0.03, "wind_amp");
        ctx.audio(
            AudioEvent::new("bnoise")
                .with_control("amp", amp.max(0.0))
                .with_control("cutoff", cutoff)
                .with_control("attack", 5.0)
                .with_control("sustain", 11.0)
                .with_control("release", 5.0),
        );
        Ok(Beats(14.0))
    }
}

/// Sparse bell that only sounds in sleep and fades out from its start.
struct MicroChime {
    settings: SleepSettings,
    policy: TriggerPolicy,
}

impl Voice for MicroChime {
    fn name(&self) -> &str {
        "micro_chime"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if !self.settings.chime_enabled {
            return Ok(Beats(10.0));
        }
        if ctx.section() == Section::Sleep {
            let elapsed = ctx.now().since(ctx.bus().section_entered());
            let window = ctx.seconds(self.settings.chime_fade_minutes * 60.0);
            let fade = fade_factor(elapsed, window);
            if self.policy.trial(ctx.rng(), fade) {
                let notes = scale(60, &MINOR_PENTATONIC, 1);
                let note = ctx.choose(&notes[..]).unwrap_or(60);
                let pan = ctx.rrand(-0.35, 0.35);
                ctx.audio(
                    AudioEvent::new("pretty_bell")
                        .with_control("note", note as f64)
                        .with_control("amp", CHIME_AMP * fade)
                        .with_control("attack", 0.7)
                        .with_control("sustain", 0.15)
                        .with_control("release", 4.0)
                        .with_control("pan", pan)
                        .with_control("cutoff", 95.0),
                );
            }
        }
        Ok(Beats(20.0))
    }
}

/// Breathy three-note hints, mostly during winddown.
struct Whisper {
    enabled: bool,
    script: Script,
}

impl Voice for Whisper {
    fn name(&self) -> &str {
        "whisper"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        if !self.enabled {
            return Ok(Beats(10.0));
        }
        if self.script.is_empty() {
            let density = match ctx.section() {
                Section::Winddown => 0.24,
                Section::Descent => 0.12,
                _ => 0.06,
            };
            if ctx.chance(density) {
                if let Some(motif) = ctx.choose(&WHISPER_MOTIFS) {
                    for note in motif {
                        let pan = ctx.rrand(-0.35, 0.35);
                        let gap = ctx.choose(&WHISPER_GAPS).unwrap_or(0.9);
                        self.script
                            .audio(
                                AudioEvent::new("hollow")
                                    .with_control("note", note as f64)
                                    .with_control("amp", WHISPER_AMP)
                                    .with_control("attack", 0.8)
                                    .with_control("sustain", 0.1)
                                    .with_control("release", 2.2)
                                    .with_control("pan", pan),
                            )
                            .rest(gap);
                    }
                }
            }
            self.script.rest(8.0);
        }
        Ok(self.script.run(ctx))
    }
}

/// Optional narration sample, started once per winddown.
struct Guide {
    settings: SleepSettings,
}

impl Voice for Guide {
    fn name(&self) -> &str {
        "guide"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let Some(path) = self.settings.guide_sample.as_deref() else {
            return Ok(Beats(2.0));
        };
        if ctx.section() != Section::Winddown {
            return Ok(Beats(5.0));
        }
        log::info!("[VOICE] guide sample '{}'", path);
        ctx.audio(AudioEvent::new(path).with_control("amp", self.settings.guide_sample_amp));
        Ok(ctx.seconds(self.settings.guide_minutes * 60.0))
    }
}
