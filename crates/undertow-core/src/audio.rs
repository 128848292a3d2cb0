//! Audio events handed to an external synthesis engine.
//!
//! Undertow never makes sound itself. An [`AudioEvent`] names an instrument
//! and carries a bag of controls; whatever listens on the other side of the
//! sink decides what that means.

use crate::timing::BeatTime;
use std::sync::{Arc, Mutex, PoisonError};

/// One "play this now" request.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioEvent {
    /// Name of the instrument (synth definition or sample) to trigger.
    pub instrument: String,
    /// Control name/value pairs.
    pub controls: Vec<(String, f32)>,
    /// Name of the voice that created this event.
    pub voice_name: Option<String>,
}

impl AudioEvent {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            controls: Vec::new(),
            voice_name: None,
        }
    }

    /// Add a control value to the event.
    pub fn with_control(mut self, name: impl Into<String>, value: f64) -> Self {
        self.controls.push((name.into(), value as f32));
        self
    }

    pub fn control(&self, name: &str) -> Option<f32> {
        self.controls
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    fn control_mut(&mut self, name: &str) -> Option<&mut f32> {
        self.controls
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Destination for audio events.
pub trait AudioSink: Send {
    fn play(&mut self, at: BeatTime, event: &AudioEvent);

    fn name(&self) -> &str;
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogAudio;

impl AudioSink for LogAudio {
    fn play(&mut self, at: BeatTime, event: &AudioEvent) {
        log::debug!(
            "AUDIO @{:.3}: {} {:?}",
            at.to_float(),
            event.instrument,
            event.controls
        );
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Sink that records events; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct MemoryAudio {
    log: Arc<Mutex<Vec<(BeatTime, AudioEvent)>>>,
}

impl MemoryAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(BeatTime, AudioEvent)> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AudioSink for MemoryAudio {
    fn play(&mut self, at: BeatTime, event: &AudioEvent) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((at, event.clone()));
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// UDP OSC sink. Each event becomes an `/s_new` message:
/// `[instrument, -1, 0, 0, name, value, ...]`.
#[cfg(feature = "native")]
pub struct OscAudioSink {
    sock: std::net::UdpSocket,
    addr: String,
    failed: bool,
}

#[cfg(feature = "native")]
impl OscAudioSink {
    /// Bind an ephemeral local socket targeting `addr` ("host:port").
    pub fn new(addr: impl Into<String>) -> crate::Result<Self> {
        let sock = std::net::UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            sock,
            addr: addr.into(),
            failed: false,
        })
    }

    /// Encode an event as an OSC packet.
    pub fn encode(event: &AudioEvent) -> crate::Result<Vec<u8>> {
        use rosc::{encoder, OscMessage, OscPacket, OscType};

        let mut args = vec![
            OscType::String(event.instrument.clone()),
            OscType::Int(-1),
            OscType::Int(0),
            OscType::Int(0),
        ];
        for (name, value) in &event.controls {
            args.push(OscType::String(name.clone()));
            args.push(OscType::Float(*value));
        }
        let packet = OscPacket::Message(OscMessage {
            addr: "/s_new".into(),
            args,
        });
        Ok(encoder::encode(&packet)?)
    }

    fn try_send(&self, event: &AudioEvent) -> crate::Result<()> {
        let buf = Self::encode(event)?;
        self.sock.send_to(&buf, &self.addr)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
impl AudioSink for OscAudioSink {
    fn play(&mut self, _at: BeatTime, event: &AudioEvent) {
        match self.try_send(event) {
            Ok(()) => self.failed = false,
            Err(e) => {
                if !self.failed {
                    log::warn!("[AUDIO] Send to {} failed: {}", self.addr, e);
                }
                self.failed = true;
            }
        }
    }

    fn name(&self) -> &str {
        &self.addr
    }
}

/// Shared room settings appended to every event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Room {
    pub mix: f64,
    pub size: f64,
    pub damp: f64,
}

/// The engine's audio output: a sink plus toggle, master level and room.
pub struct AudioOut {
    sink: Box<dyn AudioSink>,
    enabled: bool,
    master_amplitude: f64,
    room: Option<Room>,
}

impl AudioOut {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            enabled: true,
            master_amplitude: 1.0,
            room: None,
        }
    }

    pub fn with_master_amplitude(mut self, amp: f64) -> Self {
        self.master_amplitude = amp.clamp(0.0, 2.0);
        self
    }

    pub fn with_room(mut self, room: Room) -> Self {
        self.room = Some(room);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Scale `amp` by the master level, add room controls and send.
    pub fn play(&mut self, at: BeatTime, mut event: AudioEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(amp) = event.control_mut("amp") {
            *amp *= self.master_amplitude as f32;
        }
        if let Some(room) = self.room {
            for (name, value) in [("room_mix", room.mix), ("room_size", room.size), ("room_damp", room.damp)] {
                if event.control(name).is_none() {
                    event.controls.push((name.to_string(), value as f32));
                }
            }
        }
        self.sink.play(at, &event);
        true
    }
}
