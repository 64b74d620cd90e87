//! Switch counters.
//!
//! Counters are bumped from any thread with relaxed atomics and read back as
//! a plain [`SwitchStatistics`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the switch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchStatistics {
    /// Packets handed to the transport (a fragmented packet counts once)
    pub packets_transmitted: u64,
    /// Bytes handed to the transport, fragment headers included
    pub bytes_transmitted: u64,
    /// Entries dropped by CoDel
    pub codel_drops: u64,
    /// Entries dropped because a network hit its enqueue ceiling
    pub overflow_drops: u64,
    /// Dequeued entries that could not be armored or sent
    pub transmit_failures: u64,
    /// WHOIS requests sent upstream, retries included
    pub whois_requests: u64,
    /// Parked actions dropped on WHOIS overflow or abandonment
    pub whois_dropped_actions: u64,
    /// Fragments dropped as malformed, duplicate or inconsistent
    pub fragments_dropped: u64,
    /// Packets completed by the reassembly ring
    pub packets_reassembled: u64,
    /// Reassemblies abandoned after the timeout
    pub reassemblies_expired: u64,
    /// Packets and fragments relayed towards another peer
    pub packets_relayed: u64,
    /// Relay candidates dropped at the hop limit or without a next hop
    pub relay_drops: u64,
    /// Rendezvous hints emitted
    pub rendezvous_hints: u64,
    /// Local Ethernet frames that were not forwarded
    pub frames_dropped: u64,
    /// Received datagrams that were discarded before reaching the handler
    pub inbound_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SwitchCounters {
    pub packets_transmitted: AtomicU64,
    pub bytes_transmitted: AtomicU64,
    pub codel_drops: AtomicU64,
    pub overflow_drops: AtomicU64,
    pub transmit_failures: AtomicU64,
    pub whois_requests: AtomicU64,
    pub whois_dropped_actions: AtomicU64,
    pub fragments_dropped: AtomicU64,
    pub packets_reassembled: AtomicU64,
    pub reassemblies_expired: AtomicU64,
    pub packets_relayed: AtomicU64,
    pub relay_drops: AtomicU64,
    pub rendezvous_hints: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub inbound_dropped: AtomicU64,
}

impl SwitchCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: usize) {
        if amount > 0 {
            counter.fetch_add(amount as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SwitchStatistics {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SwitchStatistics {
            packets_transmitted: read(&self.packets_transmitted),
            bytes_transmitted: read(&self.bytes_transmitted),
            codel_drops: read(&self.codel_drops),
            overflow_drops: read(&self.overflow_drops),
            transmit_failures: read(&self.transmit_failures),
            whois_requests: read(&self.whois_requests),
            whois_dropped_actions: read(&self.whois_dropped_actions),
            fragments_dropped: read(&self.fragments_dropped),
            packets_reassembled: read(&self.packets_reassembled),
            reassemblies_expired: read(&self.reassemblies_expired),
            packets_relayed: read(&self.packets_relayed),
            relay_drops: read(&self.relay_drops),
            rendezvous_hints: read(&self.rendezvous_hints),
            frames_dropped: read(&self.frames_dropped),
            inbound_dropped: read(&self.inbound_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_initialized_to_zero() {
        let counters = SwitchCounters::default();
        assert_eq!(counters.snapshot(), SwitchStatistics::default());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = SwitchCounters::default();
        SwitchCounters::bump(&counters.packets_transmitted);
        SwitchCounters::bump(&counters.packets_transmitted);
        SwitchCounters::add(&counters.bytes_transmitted, 1500);
        SwitchCounters::add(&counters.codel_drops, 0);

        let stats = counters.snapshot();
        assert_eq!(stats.packets_transmitted, 2);
        assert_eq!(stats.bytes_transmitted, 1500);
        assert_eq!(stats.codel_drops, 0);
    }
}
