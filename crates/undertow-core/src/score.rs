//! Standard MIDI File export of captured output.
//!
//! Offline renders run the engine on a virtual clock into a [`MemorySink`];
//! [`ScoreWriter`] turns what it captured into an SMF with a tempo track and
//! one track per MIDI channel. Uses `midly`, Format 1 (parallel tracks).

use crate::midi::{Captured, MemorySink, MidiMessage};
use crate::timing::Tempo;
use crate::{Error, Result};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::collections::BTreeMap;
use std::path::Path;

/// Ticks per quarter note (one beat).
pub const TICKS_PER_BEAT: u16 = 480;

const TRACK_NAMES: [&str; 16] = [
    "ch 1", "ch 2", "ch 3", "ch 4", "ch 5", "ch 6", "ch 7", "ch 8", "ch 9", "ch 10", "ch 11",
    "ch 12", "ch 13", "ch 14", "ch 15", "ch 16",
];

/// Collects MIDI output and writes it as a score.
#[derive(Debug, Clone)]
pub struct ScoreWriter {
    tempo: Tempo,
    sink: MemorySink,
}

impl ScoreWriter {
    pub fn new(tempo: Tempo) -> Self {
        Self {
            tempo,
            sink: MemorySink::named("score"),
        }
    }

    /// A sink whose output ends up in this score.
    pub fn sink(&self) -> MemorySink {
        self.sink.clone()
    }

    pub fn event_count(&self) -> usize {
        self.sink.messages().len()
    }

    /// Encode everything captured so far.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let events = self.sink.messages();
        let smf = build_smf(self.tempo, &events);
        let mut buf = Vec::new();
        smf.write_std(&mut buf)
            .map_err(|e| Error::Score(format!("Failed to encode MIDI file: {e}")))?;
        Ok(buf)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        log::info!(
            "Wrote {} MIDI events to {}",
            self.event_count(),
            path.display()
        );
        Ok(())
    }
}

fn to_tick(beat: f64) -> u32 {
    (beat.max(0.0) * TICKS_PER_BEAT as f64).round() as u32
}

fn build_smf(tempo: Tempo, events: &[Captured]) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT)),
    ));

    let micros = (60_000_000.0 / tempo.bpm()).round() as u32;
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    // Captured output is already in time order; the sort keeps same-tick
    // events in emission order.
    let mut per_channel: BTreeMap<u8, Vec<&Captured>> = BTreeMap::new();
    for event in events {
        per_channel
            .entry(event.message.channel().index())
            .or_default()
            .push(event);
    }

    for (index, mut list) in per_channel {
        list.sort_by_key(|e| e.at);
        let channel = u4::new(index);
        let mut track: Track<'static> = Vec::with_capacity(list.len() + 2);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(
                TRACK_NAMES[index as usize].as_bytes(),
            )),
        });

        let mut last_tick = 0u32;
        for event in list {
            let tick = to_tick(event.at.to_float());
            let message = match event.message {
                MidiMessage::NoteOn { note, velocity, .. } => midly::MidiMessage::NoteOn {
                    key: u7::new(note),
                    vel: u7::new(velocity),
                },
                MidiMessage::NoteOff { note, .. } => midly::MidiMessage::NoteOff {
                    key: u7::new(note),
                    vel: u7::new(0),
                },
                MidiMessage::ControlChange { controller, value, .. } => {
                    midly::MidiMessage::Controller {
                        controller: u7::new(controller),
                        value: u7::new(value),
                    }
                }
            };
            track.push(TrackEvent {
                delta: u28::new(tick.saturating_sub(last_tick)),
                kind: TrackEventKind::Midi { channel, message },
            });
            last_tick = last_tick.max(tick);
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}
