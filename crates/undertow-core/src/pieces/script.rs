//! Queued gestures for voices whose cycle has several waits in it.
//!
//! A step runs gestures up to and including the next rest and sleeps for
//! that rest, so a phrase like "play, wait 1, play, wait 3" spreads over
//! several steps without the voice tracking where it is.

use crate::audio::AudioEvent;
use crate::midi::MidiChannel;
use crate::timing::Beats;
use crate::voice::StepContext;
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq)]
pub enum Gesture {
    /// Timed MIDI note.
    Note {
        pitch: i32,
        velocity: i32,
        channel: MidiChannel,
        length: Beats,
    },
    Chord {
        pitches: Vec<i32>,
        velocity: i32,
        channel: MidiChannel,
        length: Beats,
    },
    Audio(AudioEvent),
    Rest(Beats),
}

#[derive(Clone, Debug, Default)]
pub struct Script {
    queue: VecDeque<Gesture>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn push(&mut self, gesture: Gesture) -> &mut Self {
        self.queue.push_back(gesture);
        self
    }

    pub fn note(&mut self, pitch: i32, velocity: i32, channel: MidiChannel, length: f64) -> &mut Self {
        self.push(Gesture::Note {
            pitch,
            velocity,
            channel,
            length: Beats(length),
        })
    }

    pub fn chord(&mut self, pitches: &[i32], velocity: i32, channel: MidiChannel, length: f64) -> &mut Self {
        self.push(Gesture::Chord {
            pitches: pitches.to_vec(),
            velocity,
            channel,
            length: Beats(length),
        })
    }

    pub fn audio(&mut self, event: AudioEvent) -> &mut Self {
        self.push(Gesture::Audio(event))
    }

    pub fn rest(&mut self, beats: f64) -> &mut Self {
        self.push(Gesture::Rest(Beats(beats)))
    }

    /// Run gestures up to the next rest and return it.
    ///
    /// An empty queue, or one without a rest, gives zero.
    pub fn run(&mut self, ctx: &mut StepContext<'_>) -> Beats {
        while let Some(gesture) = self.queue.pop_front() {
            match gesture {
                Gesture::Note {
                    pitch,
                    velocity,
                    channel,
                    length,
                } => {
                    ctx.play(pitch, velocity, channel, length);
                }
                Gesture::Chord {
                    pitches,
                    velocity,
                    channel,
                    length,
                } => ctx.play_chord(&pitches, velocity, channel, length),
                Gesture::Audio(event) => {
                    ctx.audio(event);
                }
                Gesture::Rest(beats) => return beats.sanitized(),
            }
        }
        Beats(0.0)
    }
}
