//! One flow's FIFO with CoDel drop control.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tessera_core::Address;
use tessera_protocol::Packet;

/// A packet waiting to be transmitted.
#[derive(Clone, Debug)]
pub struct OutboundEntry {
    /// Peer the packet is for.
    pub destination: Address,
    /// When the entry was enqueued; sojourn time is measured from here.
    pub created_at: Instant,
    /// The packet, not yet armored.
    pub packet: Packet,
    /// Whether the payload is to be encrypted at transmit time.
    pub encrypt: bool,
}

impl OutboundEntry {
    /// Size charged against byte credit and backlog.
    pub fn size(&self) -> usize {
        self.packet.len()
    }
}

/// CoDel tuning shared by every queue.
#[derive(Copy, Clone, Debug)]
pub struct CoDelParams {
    /// Acceptable standing sojourn time.
    pub target: Duration,
    /// Time sojourn must stay above target before dropping begins.
    pub interval: Duration,
    /// Backlog at or below which a queue is never considered congested.
    pub min_backlog: usize,
}

/// What to do with a dequeued entry.
#[derive(Debug)]
pub enum Verdict {
    /// Transmit it.
    Send(OutboundEntry),
    /// Drop it to signal congestion.
    Drop(OutboundEntry),
}

/// Scheduling list a queue currently sits on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueList {
    /// Recently became active; served first.
    New,
    /// Active, served round-robin.
    Old,
    /// Empty, awaiting reuse or reclamation.
    Inactive,
}

/// Spacing of the next drop: `t + interval / sqrt(count)`.
pub fn control_law(t: Instant, count: u32, interval: Duration) -> Instant {
    t + interval.div_f64(f64::from(count.max(1)).sqrt())
}

/// A flow's FIFO plus its CoDel and DRR state.
#[derive(Debug)]
pub struct ManagedQueue {
    entries: VecDeque<OutboundEntry>,
    byte_length: usize,
    pub(crate) byte_credit: isize,
    pub(crate) list: QueueList,
    pub(crate) idle_since: Option<Instant>,
    first_above_time: Option<Instant>,
    drop_next: Option<Instant>,
    drop_count: u32,
    dropping: bool,
}

impl ManagedQueue {
    /// Creates an empty queue holding one quantum of credit.
    pub fn new(quantum: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            byte_length: 0,
            byte_credit: quantum as isize,
            list: QueueList::New,
            idle_since: None,
            first_above_time: None,
            drop_next: None,
            drop_count: 0,
            dropping: false,
        }
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: OutboundEntry) {
        self.byte_length += entry.size();
        self.entries.push_back(entry);
    }

    /// Removes the head entry without CoDel accounting.
    pub fn pop_front(&mut self) -> Option<OutboundEntry> {
        let entry = self.entries.pop_front()?;
        self.byte_length -= entry.size();
        Some(entry)
    }

    /// Removes every entry.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.byte_length = 0;
        count
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the entry sizes.
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// True while CoDel is in its dropping state.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    /// Drops recorded since the current dropping state began.
    pub fn drop_count(&self) -> u32 {
        self.drop_count
    }

    /// Dequeues the head entry and decides whether it is sent or dropped.
    ///
    /// Sojourn below target (or a backlog too small to matter) resets the
    /// state. Sojourn above target for a whole interval enters the dropping
    /// state without dropping; from then on an entry is dropped each time
    /// `drop_next` passes, with drops coming closer together as `drop_count`
    /// grows.
    pub fn dequeue(&mut self, now: Instant, params: &CoDelParams) -> Option<Verdict> {
        let backlog = self.byte_length;
        let entry = self.pop_front()?;
        let sojourn = now.saturating_duration_since(entry.created_at);

        if sojourn < params.target || backlog <= params.min_backlog {
            self.first_above_time = None;
            self.dropping = false;
            self.drop_count = 0;
            return Some(Verdict::Send(entry));
        }

        match self.first_above_time {
            None => {
                self.first_above_time = Some(now + params.interval);
                return Some(Verdict::Send(entry));
            }
            Some(first_above) if now < first_above => return Some(Verdict::Send(entry)),
            Some(_) => {}
        }

        if !self.dropping {
            self.dropping = true;
            self.drop_count = 0;
            self.drop_next = Some(control_law(now, 1, params.interval));
            return Some(Verdict::Send(entry));
        }

        match self.drop_next {
            Some(drop_next) if now >= drop_next => {
                self.drop_count += 1;
                self.drop_next = Some(control_law(drop_next, self.drop_count, params.interval));
                Some(Verdict::Drop(entry))
            }
            _ => Some(Verdict::Send(entry)),
        }
    }
}
