//! Note-on/note-off pairing.
//!
//! Every note that reaches the sink is registered here until its off goes
//! out. Timed notes get their off scheduled as a standalone task the moment
//! they start, so the owning voice can die, stop or panic without leaving the
//! note hanging. Held notes hand back a [`HeldNote`] token; dropping the
//! token without releasing is covered by [`NoteLifecycle::release_owned`].

use crate::midi::{MidiChannel, MidiMessage, MidiOut, ALL_NOTES_OFF};
use crate::scheduler::{NoteId, Scheduler, Task, VoiceId};
use crate::timing::{BeatTime, Beats};
use std::collections::BTreeMap;

/// A note to play for a fixed duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    pub pitch: i32,
    pub velocity: i32,
    pub channel: MidiChannel,
    pub duration: Beats,
}

impl NoteEvent {
    pub fn new(pitch: i32, velocity: i32, channel: MidiChannel, duration: Beats) -> Self {
        Self {
            pitch,
            velocity,
            channel,
            duration,
        }
    }
}

/// Token for a sounding held note. Not `Clone`: releasing consumes it, so a
/// note can only be released once.
#[derive(Debug, PartialEq, Eq)]
pub struct HeldNote {
    id: NoteId,
    pitch: u8,
    channel: MidiChannel,
}

impl HeldNote {
    pub fn pitch(&self) -> u8 {
        self.pitch
    }

    pub fn channel(&self) -> MidiChannel {
        self.channel
    }
}

#[derive(Debug, Clone, Copy)]
struct Sounding {
    pitch: u8,
    channel: MidiChannel,
    owner: Option<VoiceId>,
    off_at: Option<BeatTime>,
}

/// Registry of sounding notes.
#[derive(Debug, Default)]
pub struct NoteLifecycle {
    next_id: u64,
    sounding: BTreeMap<NoteId, Sounding>,
}

impl NoteLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        midi: &mut MidiOut,
        now: BeatTime,
        pitch: i32,
        velocity: i32,
        channel: MidiChannel,
        owner: Option<VoiceId>,
    ) -> Option<(NoteId, u8)> {
        let message = MidiMessage::note_on(channel, pitch, velocity);
        let MidiMessage::NoteOn { note, .. } = message else {
            return None;
        };
        if !midi.send(now, message) {
            return None;
        }
        self.next_id += 1;
        let id = NoteId(self.next_id);
        self.sounding.insert(
            id,
            Sounding {
                pitch: note,
                channel,
                owner,
                off_at: None,
            },
        );
        Some((id, note))
    }

    /// Start a timed note and schedule its off. Returns `None` when MIDI is
    /// disabled and nothing was sent.
    pub fn play(
        &mut self,
        midi: &mut MidiOut,
        sched: &mut Scheduler,
        now: BeatTime,
        note: NoteEvent,
    ) -> Option<NoteId> {
        let (id, _) = self.register(midi, now, note.pitch, note.velocity, note.channel, None)?;
        self.schedule_off(sched, id, now + note.duration.sanitized());
        Some(id)
    }

    /// Start a held note owned by `owner`.
    pub fn note_on(
        &mut self,
        midi: &mut MidiOut,
        now: BeatTime,
        pitch: i32,
        velocity: i32,
        channel: MidiChannel,
        owner: Option<VoiceId>,
    ) -> Option<HeldNote> {
        let (id, pitch) = self.register(midi, now, pitch, velocity, channel, owner)?;
        Some(HeldNote { id, pitch, channel })
    }

    /// Release a held note immediately.
    pub fn note_off(&mut self, midi: &mut MidiOut, now: BeatTime, held: HeldNote) {
        self.fire(midi, now, held.id);
    }

    /// Release a held note after `duration`, independent of its owner.
    pub fn release_after(
        &mut self,
        sched: &mut Scheduler,
        now: BeatTime,
        held: HeldNote,
        duration: Beats,
    ) {
        if self.sounding.contains_key(&held.id) {
            self.schedule_off(sched, held.id, now + duration.sanitized());
        }
    }

    fn schedule_off(&mut self, sched: &mut Scheduler, id: NoteId, at: BeatTime) {
        if let Some(note) = self.sounding.get_mut(&id) {
            note.off_at = Some(at);
            sched.schedule(at, Task::NoteOff(id));
        }
    }

    /// Send the off for `id` if it is still sounding. Stale ids (cancelled by
    /// panic, already released) are ignored.
    pub fn fire(&mut self, midi: &mut MidiOut, now: BeatTime, id: NoteId) {
        if let Some(note) = self.sounding.remove(&id) {
            log::trace!(
                "[NOTE_LIFECYCLE] off ch={} note={} @{:.3}",
                note.channel,
                note.pitch,
                now.to_float()
            );
            midi.send_release(now, MidiMessage::note_off(note.channel, note.pitch as i32));
        }
    }

    /// Release every held note belonging to `owner` that has no off scheduled.
    ///
    /// Called when a voice is retired or faults.
    pub fn release_owned(&mut self, midi: &mut MidiOut, now: BeatTime, owner: VoiceId) -> usize {
        let ids: Vec<NoteId> = self
            .sounding
            .iter()
            .filter(|(_, n)| n.owner == Some(owner) && n.off_at.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.fire(midi, now, *id);
        }
        ids.len()
    }

    /// Release every held note with no off scheduled.
    pub fn flush_held(&mut self, midi: &mut MidiOut, now: BeatTime) -> usize {
        let ids: Vec<NoteId> = self
            .sounding
            .iter()
            .filter(|(_, n)| n.off_at.is_none())
            .map(|(id, _)| *id)
            .collect();
        if !ids.is_empty() {
            log::info!("[NOTE_LIFECYCLE] Flushing {} held notes", ids.len());
        }
        for id in &ids {
            self.fire(midi, now, *id);
        }
        ids.len()
    }

    /// All Notes Off on every known channel.
    ///
    /// Sends one CC 123 per channel, then forgets every sounding note on
    /// those channels so their pending offs become no-ops. Calling it twice
    /// sends the CCs twice but never an individual note-off.
    pub fn all_notes_off(&mut self, midi: &mut MidiOut, sched: &mut Scheduler, now: BeatTime) {
        let channels: Vec<MidiChannel> = midi.channels().collect();
        log::info!(
            "[NOTE_LIFECYCLE] Panic on {} channels, dropping {} sounding notes",
            channels.len(),
            self.sounding.len()
        );
        for channel in &channels {
            midi.send_release(now, MidiMessage::cc(*channel, ALL_NOTES_OFF as i32, 0));
        }
        self.sounding.retain(|_, n| !channels.contains(&n.channel));
        let sounding = &self.sounding;
        sched.retain(|task| match task {
            Task::NoteOff(id) => sounding.contains_key(id),
            _ => true,
        });
    }

    /// Number of notes currently sounding.
    pub fn sounding(&self) -> usize {
        self.sounding.len()
    }

    /// Number of notes waiting on a scheduled off.
    pub fn pending_offs(&self) -> usize {
        self.sounding.values().filter(|n| n.off_at.is_some()).count()
    }

    pub fn is_sounding(&self, id: NoteId) -> bool {
        self.sounding.contains_key(&id)
    }
}
