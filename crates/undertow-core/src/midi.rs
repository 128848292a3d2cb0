//! MIDI output: messages, channel handling and sinks.
//!
//! Sinks never fail the caller. A device that disappears mid-run logs a
//! warning and scheduling carries on.

use crate::timing::BeatTime;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Channel Mode message: All Notes Off.
pub const ALL_NOTES_OFF: u8 = 123;

/// Clamp any integer into the 7-bit MIDI data range.
pub fn clamp_u7(value: i32) -> u8 {
    value.clamp(0, 127) as u8
}

/// A MIDI channel, 1-16 as musicians number them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MidiChannel(u8);

impl MidiChannel {
    /// Out-of-range channel numbers clamp to 1..=16.
    pub fn new(number: i32) -> Self {
        Self(number.clamp(1, 16) as u8)
    }

    /// Channel number 1-16.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Wire index 0-15.
    pub fn index(self) -> u8 {
        self.0 - 1
    }
}

impl std::fmt::Display for MidiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MIDI message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn {
        channel: MidiChannel,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: MidiChannel,
        note: u8,
    },
    ControlChange {
        channel: MidiChannel,
        controller: u8,
        value: u8,
    },
}

impl MidiMessage {
    /// Note on with pitch and velocity clamped.
    pub fn note_on(channel: MidiChannel, note: i32, velocity: i32) -> Self {
        MidiMessage::NoteOn {
            channel,
            note: clamp_u7(note),
            velocity: clamp_u7(velocity),
        }
    }

    pub fn note_off(channel: MidiChannel, note: i32) -> Self {
        MidiMessage::NoteOff {
            channel,
            note: clamp_u7(note),
        }
    }

    /// Control change with controller and value clamped.
    pub fn cc(channel: MidiChannel, controller: i32, value: i32) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller: clamp_u7(controller),
            value: clamp_u7(value),
        }
    }

    pub fn channel(&self) -> MidiChannel {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => channel,
        }
    }

    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | channel.index(), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, note } => [0x80 | channel.index(), note & 0x7F, 0],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => [0xB0 | channel.index(), controller & 0x7F, value & 0x7F],
        }
    }
}

/// Destination for MIDI messages.
pub trait MidiSink: Send {
    /// Deliver one message. Failures are logged by the sink, not returned.
    fn send(&mut self, at: BeatTime, message: MidiMessage);

    /// Get the port name
    fn port_name(&self) -> &str;

    /// Check if connected to a real device
    fn is_connected(&self) -> bool;
}

/// Sink that only logs, used when no device is available.
#[derive(Debug, Default)]
pub struct LogSink;

impl MidiSink for LogSink {
    fn send(&mut self, at: BeatTime, message: MidiMessage) {
        log::debug!("MIDI @{:.3}: {:?}", at.to_float(), message);
    }

    fn port_name(&self) -> &str {
        "log"
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// A message captured by [`MemorySink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Captured {
    pub at: BeatTime,
    pub message: MidiMessage,
}

/// Sink that records everything; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    name: String,
    log: Arc<Mutex<Vec<Captured>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::default(),
        }
    }

    /// Copy of everything captured so far.
    pub fn messages(&self) -> Vec<Captured> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl MidiSink for MemorySink {
    fn send(&mut self, at: BeatTime, message: MidiMessage) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Captured { at, message });
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Hardware or virtual MIDI port via midir.
#[cfg(feature = "native")]
pub struct MidirSink {
    connection: midir::MidiOutputConnection,
    port_name: String,
    failed: bool,
}

#[cfg(feature = "native")]
impl MidirSink {
    const CLIENT_NAME: &'static str = "undertow";

    /// Open an output port.
    ///
    /// `wanted` is matched case-insensitively as a substring of the port
    /// name. When `forced` is set a missing match is an error; otherwise the
    /// first available port is used.
    pub fn open(wanted: Option<&str>, forced: bool) -> crate::Result<Self> {
        let output = midir::MidiOutput::new(Self::CLIENT_NAME)?;
        let ports = output.ports();
        let named: Vec<(midir::MidiOutputPort, String)> = ports
            .into_iter()
            .filter_map(|port| {
                let name = output.port_name(&port).ok()?;
                Some((port, name))
            })
            .collect();

        let matched = wanted.and_then(|wanted| {
            let needle = wanted.to_lowercase();
            named
                .iter()
                .position(|(_, name)| name.to_lowercase().contains(&needle))
        });

        let index = match (matched, wanted) {
            (Some(i), _) => i,
            (None, Some(wanted)) if forced => {
                return Err(crate::Error::Midi(format!(
                    "Forced port '{wanted}' not found"
                )));
            }
            (None, _) if named.is_empty() => {
                return Err(crate::Error::Midi("No MIDI output ports available".into()));
            }
            (None, wanted) => {
                if let Some(wanted) = wanted {
                    log::warn!("MIDI port '{}' not found, using first port", wanted);
                }
                0
            }
        };

        let (port, port_name) = named
            .into_iter()
            .nth(index)
            .ok_or_else(|| crate::Error::Midi("MIDI port vanished while opening".into()))?;
        let connection = output.connect(&port, "undertow-out")?;
        log::info!("[MIDI] Opened output port '{}'", port_name);

        Ok(Self {
            connection,
            port_name,
            failed: false,
        })
    }

    /// Names of every available output port.
    pub fn list_ports() -> crate::Result<Vec<String>> {
        let output = midir::MidiOutput::new(Self::CLIENT_NAME)?;
        Ok(output
            .ports()
            .iter()
            .filter_map(|port| output.port_name(port).ok())
            .collect())
    }
}

#[cfg(feature = "native")]
impl MidiSink for MidirSink {
    fn send(&mut self, _at: BeatTime, message: MidiMessage) {
        match self.connection.send(&message.to_bytes()) {
            Ok(()) => self.failed = false,
            Err(e) => {
                // Warn once per outage rather than per message.
                if !self.failed {
                    log::warn!("[MIDI] Send to '{}' failed: {}", self.port_name, e);
                }
                self.failed = true;
            }
        }
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn is_connected(&self) -> bool {
        !self.failed
    }
}

/// Opens a new sink when a port is forced at runtime.
pub type PortOpener = Box<dyn FnMut(Option<&str>) -> crate::Result<Box<dyn MidiSink>> + Send>;

/// The engine's MIDI output: a sink plus the enable toggles.
pub struct MidiOut {
    sink: Box<dyn MidiSink>,
    enabled: bool,
    cc_enabled: bool,
    channels: BTreeSet<MidiChannel>,
}

impl MidiOut {
    /// `channels` are the configured channels panic always covers.
    pub fn new(sink: Box<dyn MidiSink>, channels: impl IntoIterator<Item = MidiChannel>) -> Self {
        Self {
            sink,
            enabled: true,
            cc_enabled: true,
            channels: channels.into_iter().collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn cc_enabled(&self) -> bool {
        self.cc_enabled
    }

    pub fn set_cc_enabled(&mut self, enabled: bool) {
        self.cc_enabled = enabled;
    }

    pub fn port_name(&self) -> &str {
        self.sink.port_name()
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_connected()
    }

    /// Configured channels plus every channel used so far.
    pub fn channels(&self) -> impl Iterator<Item = MidiChannel> + '_ {
        self.channels.iter().copied()
    }

    /// Swap in a new sink, returning the old one.
    pub fn replace_sink(&mut self, sink: Box<dyn MidiSink>) -> Box<dyn MidiSink> {
        std::mem::replace(&mut self.sink, sink)
    }

    /// Send if MIDI is enabled. Returns whether the message went out.
    pub fn send(&mut self, at: BeatTime, message: MidiMessage) -> bool {
        if !self.enabled {
            return false;
        }
        self.emit(at, message);
        true
    }

    /// Send a controller value if both MIDI and CC output are enabled.
    pub fn send_cc(&mut self, at: BeatTime, message: MidiMessage) -> bool {
        if !self.cc_enabled {
            return false;
        }
        self.send(at, message)
    }

    /// Send regardless of the toggle. Used for note-offs owed to notes that
    /// already went out.
    pub fn send_release(&mut self, at: BeatTime, message: MidiMessage) {
        self.emit(at, message);
    }

    fn emit(&mut self, at: BeatTime, message: MidiMessage) {
        self.channels.insert(message.channel());
        self.sink.send(at, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_message_bytes() {
        let ch1 = MidiChannel::new(1);
        assert_eq!(MidiMessage::note_on(ch1, 60, 100).to_bytes(), [0x90, 60, 100]);
        assert_eq!(MidiMessage::note_off(MidiChannel::new(10), 36).to_bytes(), [0x89, 36, 0]);
        assert_eq!(
            MidiMessage::cc(MidiChannel::new(16), ALL_NOTES_OFF as i32, 0).to_bytes(),
            [0xBF, 123, 0]
        );
    }

    #[test]
    fn test_values_are_clamped() {
        let ch = MidiChannel::new(0);
        assert_eq!(ch.number(), 1);
        assert_eq!(MidiChannel::new(99).number(), 16);
        assert_eq!(
            MidiMessage::note_on(ch, 200, -4),
            MidiMessage::NoteOn {
                channel: ch,
                note: 127,
                velocity: 0
            }
        );
        assert_eq!(
            MidiMessage::cc(ch, 1, 140),
            MidiMessage::ControlChange {
                channel: ch,
                controller: 1,
                value: 127
            }
        );
    }

    #[test]
    fn test_memory_sink_clones_share_log() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.send(BeatTime::ZERO, MidiMessage::note_on(MidiChannel::new(2), 40, 90));
        assert_eq!(sink.messages().len(), 1);
        sink.clear();
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_midi_out_toggles() {
        let sink = MemorySink::new();
        let mut out = MidiOut::new(Box::new(sink.clone()), [MidiChannel::new(1)]);
        let ch = MidiChannel::new(3);

        out.set_cc_enabled(false);
        assert!(!out.send_cc(BeatTime::ZERO, MidiMessage::cc(ch, 1, 64)));
        assert!(out.send(BeatTime::ZERO, MidiMessage::note_on(ch, 60, 90)));

        out.set_enabled(false);
        assert!(!out.send(BeatTime::ZERO, MidiMessage::note_on(ch, 62, 90)));
        out.send_release(BeatTime::ZERO, MidiMessage::note_off(ch, 60));

        assert_eq!(sink.messages().len(), 2);
        let channels: Vec<u8> = out.channels().map(MidiChannel::number).collect();
        assert_eq!(channels, vec![1, 3]);
    }

    #[test]
    fn test_log_sink_is_not_connected() {
        let mut sink = LogSink;
        sink.send(BeatTime::ZERO, MidiMessage::note_on(MidiChannel::new(1), 60, 1));
        assert_eq!(sink.port_name(), "log");
        assert!(!sink.is_connected());
    }
}
