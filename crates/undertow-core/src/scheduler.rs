//! Beat-ordered task queue.
//!
//! Every suspended thing in the engine lives here: voices waiting for their
//! next step, note-offs waiting to fire, CC ramps waiting for their next
//! value. Tasks due at the same beat run note-offs first, then the form
//! conductor, then ramp steps, then voices, and within each kind in the
//! order they were scheduled.

use crate::timing::BeatTime;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Index of a voice in the engine's voice table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoiceId(pub usize);

/// Identifier of a sounding note in the note lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId(pub u64);

/// Identifier of an active CC ramp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RampId(pub u64);

/// Something the engine must do at a given beat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    NoteOff(NoteId),
    /// The conductor, so voices waking on a boundary see the new section.
    Form,
    RampStep(RampId),
    Voice(VoiceId),
}

impl Task {
    fn priority(&self) -> u8 {
        match self {
            Task::NoteOff(_) => 0,
            Task::Form => 1,
            Task::RampStep(_) => 2,
            Task::Voice(_) => 3,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Wake {
    at: BeatTime,
    priority: u8,
    seq: u64,
    task: Task,
}

impl Ord for Wake {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.priority, self.seq).cmp(&(other.at, other.priority, other.seq))
    }
}

impl PartialOrd for Wake {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of tasks keyed by wake time.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Wake>>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` to run at `at`.
    pub fn schedule(&mut self, at: BeatTime, task: Task) {
        self.seq += 1;
        self.heap.push(Reverse(Wake {
            at,
            priority: task.priority(),
            seq: self.seq,
            task,
        }));
    }

    /// Wake time of the earliest task.
    pub fn peek_time(&self) -> Option<BeatTime> {
        self.heap.peek().map(|Reverse(wake)| wake.at)
    }

    /// Pop the earliest task if it is due at or before `now`.
    pub fn pop_due(&mut self, now: BeatTime) -> Option<(BeatTime, Task)> {
        match self.heap.peek() {
            Some(Reverse(wake)) if wake.at <= now => {}
            _ => return None,
        }
        self.heap.pop().map(|Reverse(wake)| (wake.at, wake.task))
    }

    /// Drop every task the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&Task) -> bool) {
        let heap = std::mem::take(&mut self.heap);
        self.heap = heap
            .into_iter()
            .filter(|Reverse(wake)| keep(&wake.task))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Count of queued tasks matching the predicate.
    pub fn count(&self, mut matches: impl FnMut(&Task) -> bool) -> usize {
        self.heap
            .iter()
            .filter(|Reverse(wake)| matches(&wake.task))
            .count()
    }
}
