//! Fixed-size ring of in-flight packet reassemblies.
//!
//! A fragmented packet arrives as a head (an ordinary packet with the
//! fragmented flag) plus tail fragments, in any order. Each in-flight packet
//! occupies one slot keyed by packet id. Slots are handed out round-robin, so
//! a flood of new packet ids silently evicts the oldest reassemblies.
//!
//! Lookups only scan the most recently allocated `capacity` slots starting at
//! the cursor; the ring is small and lookups are lock-per-slot, so concurrent
//! receive threads rarely contend. Two threads racing to allocate a slot for
//! the same unseen packet id may each claim one; the packet then never
//! completes and both slots age out.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use tessera_core::{config::Config, constants::MAX_PACKET_FRAGMENTS};
use tessera_protocol::FragmentHeader;

/// Outcome of adding one piece to the ring.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembled {
    /// More pieces are needed.
    Pending,
    /// The packet is complete: head bytes followed by the tail payloads.
    Complete(Vec<u8>),
    /// The piece was already received.
    Duplicate,
    /// The piece disagrees with what the slot recorded (fragment total).
    Inconsistent,
}

#[derive(Debug, Default)]
struct Slot {
    packet_id: u64,
    /// Set while the slot is in use.
    timestamp: Option<Instant>,
    head: Option<Vec<u8>>,
    tails: [Option<Vec<u8>>; MAX_PACKET_FRAGMENTS - 1],
    /// Total pieces, head included; 0 until a tail is seen.
    total_fragments: u8,
    /// Bit `i` set once piece `i` is held (bit 0 is the head).
    have: u32,
    complete: bool,
}

impl Slot {
    fn begin(&mut self, packet_id: u64, now: Instant) {
        *self = Slot { packet_id, timestamp: Some(now), ..Slot::default() };
    }

    fn try_complete(&mut self) -> Reassembled {
        if self.complete || self.head.is_none() || self.total_fragments < 2 {
            return Reassembled::Pending;
        }
        if self.have.count_ones() != u32::from(self.total_fragments) {
            return Reassembled::Pending;
        }

        let mut packet = self.head.take().unwrap_or_default();
        for tail in self.tails.iter_mut().take(self.total_fragments as usize - 1) {
            if let Some(payload) = tail.take() {
                packet.extend_from_slice(&payload);
            }
        }
        self.complete = true;
        Reassembled::Complete(packet)
    }
}

/// Result of an expiry sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    /// Incomplete reassemblies abandoned.
    pub expired: usize,
    /// When the oldest remaining incomplete reassembly will expire.
    pub next_deadline: Option<Instant>,
}

/// The reassembly ring.
#[derive(Debug)]
pub struct ReassemblyRing {
    slots: Box<[Mutex<Slot>]>,
    cursor: AtomicUsize,
    timeout: Duration,
}

impl ReassemblyRing {
    /// Creates a ring sized and timed from `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_capacity(config.reassembly_slots, config.reassembly_timeout)
    }

    /// Creates a ring with `capacity` slots (at least one).
    pub fn with_capacity(capacity: usize, timeout: Duration) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Mutex::new(Slot::default())).collect();
        Self { slots, cursor: AtomicUsize::new(0), timeout }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Adds the head of a fragmented packet.
    pub fn on_head(&self, packet_id: u64, bytes: &[u8], now: Instant) -> Reassembled {
        let (mut slot, found) = self.locate(packet_id);
        if !found {
            slot.begin(packet_id, now);
            slot.head = Some(bytes.to_vec());
            slot.have = 1;
            return Reassembled::Pending;
        }
        if slot.have & 1 != 0 {
            return Reassembled::Duplicate;
        }
        slot.head = Some(bytes.to_vec());
        slot.have |= 1;
        slot.try_complete()
    }

    /// Adds a tail fragment.
    pub fn on_fragment(&self, header: &FragmentHeader, payload: &[u8], now: Instant) -> Reassembled {
        let number = header.fragment_number as usize;
        if number == 0 || number >= MAX_PACKET_FRAGMENTS {
            return Reassembled::Inconsistent;
        }
        let bit = 1u32 << number;

        let (mut slot, found) = self.locate(header.packet_id);
        if !found {
            slot.begin(header.packet_id, now);
            slot.total_fragments = header.total_fragments;
        } else if slot.total_fragments == 0 {
            slot.total_fragments = header.total_fragments;
        } else if slot.total_fragments != header.total_fragments {
            return Reassembled::Inconsistent;
        }
        if slot.have & bit != 0 {
            return Reassembled::Duplicate;
        }

        slot.tails[number - 1] = Some(payload.to_vec());
        slot.have |= bit;
        slot.try_complete()
    }

    /// Abandons incomplete reassemblies older than the timeout and frees
    /// completed slots of the same age.
    pub fn expire(&self, now: Instant) -> ExpirySweep {
        let mut sweep = ExpirySweep::default();
        for slot in self.slots.iter() {
            let mut slot = slot.lock();
            let Some(started) = slot.timestamp else {
                continue;
            };
            if now.saturating_duration_since(started) > self.timeout {
                if !slot.complete {
                    sweep.expired += 1;
                }
                *slot = Slot::default();
            } else if !slot.complete {
                let deadline = started + self.timeout;
                sweep.next_deadline = Some(sweep.next_deadline.map_or(deadline, |d| d.min(deadline)));
            }
        }
        if sweep.expired > 0 {
            tracing::warn!("Expired {} incomplete reassemblies", sweep.expired);
        }
        sweep
    }

    /// True if a slot is tracking `packet_id`.
    pub fn contains(&self, packet_id: u64) -> bool {
        self.slots.iter().any(|slot| {
            let slot = slot.lock();
            slot.timestamp.is_some() && slot.packet_id == packet_id
        })
    }

    /// Number of slots holding an incomplete reassembly.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                let slot = slot.lock();
                slot.timestamp.is_some() && !slot.complete
            })
            .count()
    }

    /// Returns the active slot for `packet_id`, or a freshly claimed one.
    fn locate(&self, packet_id: u64) -> (MutexGuard<'_, Slot>, bool) {
        let n = self.slots.len();
        let current = self.cursor.load(Ordering::Acquire) % n;
        for k in 1..=n {
            let slot = self.slots[(current + n - k) % n].lock();
            if slot.timestamp.is_some() && slot.packet_id == packet_id {
                return (slot, true);
            }
        }

        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % n;
        (self.slots[index].lock(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};
    use tessera_core::Address;

    fn header(packet_id: u64, number: u8, total: u8) -> FragmentHeader {
        FragmentHeader { packet_id, destination: Address::new(1), fragment_number: number, total_fragments: total, hops: 0 }
    }

    fn ring(capacity: usize) -> ReassemblyRing {
        ReassemblyRing::with_capacity(capacity, Duration::from_millis(2500))
    }

    #[test]
    fn test_tail_before_head() {
        let ring = ring(32);
        let now = Instant::now();

        assert_eq!(ring.on_fragment(&header(0xabcd, 1, 2), b"b1", now), Reassembled::Pending);
        assert!(ring.contains(0xabcd));
        assert_eq!(ring.on_head(0xabcd, b"b0", now), Reassembled::Complete(b"b0b1".to_vec()));
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_tails_assemble_in_fragment_order() {
        let ring = ring(4);
        let now = Instant::now();

        assert_eq!(ring.on_fragment(&header(9, 3, 4), b"3", now), Reassembled::Pending);
        assert_eq!(ring.on_fragment(&header(9, 1, 4), b"1", now), Reassembled::Pending);
        assert_eq!(ring.on_head(9, b"h", now), Reassembled::Pending);
        assert_eq!(ring.on_fragment(&header(9, 2, 4), b"2", now), Reassembled::Complete(b"h123".to_vec()));
    }

    #[test]
    fn test_duplicates_after_completion_are_ignored() {
        let ring = ring(4);
        let now = Instant::now();

        assert_eq!(ring.on_head(5, b"h", now), Reassembled::Pending);
        assert_eq!(ring.on_head(5, b"h", now), Reassembled::Duplicate);
        assert!(matches!(ring.on_fragment(&header(5, 1, 2), b"t", now), Reassembled::Complete(_)));
        assert_eq!(ring.on_fragment(&header(5, 1, 2), b"t", now), Reassembled::Duplicate);
        assert_eq!(ring.on_head(5, b"h", now), Reassembled::Duplicate);
    }

    #[test]
    fn test_inconsistent_total_is_dropped() {
        let ring = ring(4);
        let now = Instant::now();

        assert_eq!(ring.on_fragment(&header(5, 1, 3), b"1", now), Reassembled::Pending);
        assert_eq!(ring.on_fragment(&header(5, 2, 4), b"2", now), Reassembled::Inconsistent);
        assert_eq!(ring.on_fragment(&header(5, 2, 3), b"2", now), Reassembled::Pending);
        assert_eq!(ring.on_head(5, b"0", now), Reassembled::Complete(b"012".to_vec()));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let ring = ring(4);
        let now = Instant::now();

        for id in 0..5u64 {
            assert_eq!(ring.on_fragment(&header(id, 1, 2), b"t", now), Reassembled::Pending);
        }
        // Packet 0 lost its slot to packet 4; its head starts over
        assert!(!ring.contains(0));
        assert_eq!(ring.on_head(0, b"h", now), Reassembled::Pending);
        // Packet 1 was evicted by the head of packet 0
        assert!(!ring.contains(1));
        assert_eq!(ring.on_head(2, b"h", now), Reassembled::Complete(b"ht".to_vec()));
    }

    #[test]
    fn test_expire_abandons_incomplete() {
        let ring = ring(8);
        let start = Instant::now();

        ring.on_head(1, b"h", start);
        ring.on_head(2, b"h", start + Duration::from_secs(1));
        ring.on_head(3, b"h", start);
        ring.on_fragment(&header(3, 1, 2), b"t", start);

        let sweep = ring.expire(start + Duration::from_millis(2000));
        assert_eq!(sweep.expired, 0);
        assert_eq!(sweep.next_deadline, Some(start + Duration::from_millis(2500)));

        let sweep = ring.expire(start + Duration::from_millis(3000));
        assert_eq!(sweep.expired, 1);
        assert!(!ring.contains(1));
        assert!(!ring.contains(3));
        assert!(ring.contains(2));
        assert_eq!(sweep.next_deadline, Some(start + Duration::from_millis(3500)));
    }

    #[test]
    fn test_concurrent_distinct_packets() {
        let ring = Arc::new(ring(64));
        let now = Instant::now();

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let mut completed = 0;
                    for i in 0..8u64 {
                        let id = t * 100 + i;
                        ring.on_head(id, b"h", now);
                        if let Reassembled::Complete(bytes) = ring.on_fragment(&header(id, 1, 2), b"t", now) {
                            assert_eq!(bytes, b"ht".to_vec());
                            completed += 1;
                        }
                    }
                    completed
                })
            })
            .collect();

        let completed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(completed, 32);
    }
}
