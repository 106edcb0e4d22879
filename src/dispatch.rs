//! Discrete-event scheduling.

use crate::{CommodityId, LaneGroupId, ModelId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What an event does when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Recompute the lane-change probabilities of one commodity in one lane group.
    LaneSelectorRefresh {
        lanegroup: LaneGroupId,
        commodity: CommodityId,
    },
    /// Compute the flows of one step of a fluid model.
    FluidFlowUpdate(ModelId),
    /// Apply the flows of one step of a fluid model to its cells.
    FluidStateUpdate(ModelId),
}

impl EventKind {
    /// Among events at the same time, lower priorities run first.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::LaneSelectorRefresh { .. } => 3,
            EventKind::FluidFlowUpdate(_) => 4,
            EventKind::FluidStateUpdate(_) => 5,
        }
    }
}

/// A scheduled event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(time: f64, kind: EventKind) -> Self {
        Self { time, kind }
    }
}

#[derive(Debug)]
struct EventEntry {
    event: Event,
    /// Registration order, so that equal events replay identically.
    seq: u64,
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for EventEntry {}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that the heap pops the earliest event first.
        self.event
            .time
            .total_cmp(&other.event.time)
            .then_with(|| self.event.kind.priority().cmp(&other.event.kind.priority()))
            .then_with(|| self.seq.cmp(&other.seq))
            .reverse()
    }
}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A priority queue of events ordered by time, then priority, then registration.
#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: BinaryHeap<EventEntry>,
    seq: u64,
    /// The time of the last event popped.
    time: f64,
}

impl Dispatcher {
    pub fn new(start_time: f64) -> Self {
        Self {
            queue: BinaryHeap::new(),
            seq: 0,
            time: start_time,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn register_event(&mut self, event: Event) {
        self.queue.push(EventEntry {
            event,
            seq: self.seq,
        });
        self.seq += 1;
    }

    /// The time of the next event, if any.
    pub fn peek_time(&self) -> Option<f64> {
        self.queue.peek().map(|entry| entry.event.time)
    }

    /// Pops the next event and advances the clock to it.
    pub fn pop(&mut self) -> Option<Event> {
        let entry = self.queue.pop()?;
        self.time = entry.event.time;
        Some(entry.event)
    }

    /// Moves the clock forward to `time` without running anything.
    pub(crate) fn advance_to(&mut self, time: f64) {
        self.time = self.time.max(time);
    }

    /// Drops every pending event and rewinds the clock.
    pub fn clear(&mut self, start_time: f64) {
        self.queue.clear();
        self.time = start_time;
    }
}
