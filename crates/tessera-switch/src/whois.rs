//! Pending identity resolutions.
//!
//! An address whose identity is unknown gets one [`PendingResolution`]: the
//! time of the last WHOIS sent for it, how many retries were spent, and the
//! actions parked until it resolves. Parked actions are replayed in the order
//! they were parked.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tessera_core::{config::Config, Address, NetworkId};
use tessera_protocol::Packet;
use tracing::{debug, trace};

use crate::environment::InboundPacket;

/// An action waiting for an identity.
#[derive(Clone, Debug)]
pub enum Deferred {
    /// An outbound packet to schedule once the destination is known.
    Transmit {
        /// Network the packet is scheduled on.
        network: NetworkId,
        /// QoS class of the flow.
        qos_class: u8,
        /// The packet, not yet armored.
        packet: Packet,
        /// Whether the payload is to be encrypted.
        encrypt: bool,
    },
    /// A received packet that could not be authenticated yet.
    Inbound(InboundPacket),
}

impl Deferred {
    fn network(&self) -> Option<NetworkId> {
        match self {
            Deferred::Transmit { network, .. } => Some(*network),
            Deferred::Inbound(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct PendingResolution {
    last_request: Option<Instant>,
    retries: u32,
    deferred: VecDeque<Deferred>,
}

/// Result of a WHOIS retry sweep.
#[derive(Debug, Default)]
pub struct WhoisSweep {
    /// Addresses whose WHOIS is due again.
    pub retry: Vec<Address>,
    /// Addresses given up on.
    pub abandoned: Vec<Address>,
    /// Parked actions discarded with the abandoned addresses.
    pub dropped_actions: usize,
    /// Earliest instant a remaining entry is due.
    pub next_deadline: Option<Instant>,
}

/// Table of pending WHOIS resolutions.
#[derive(Debug)]
pub struct WhoisTable {
    pending: Mutex<HashMap<Address, PendingResolution>>,
    retry_delay: Duration,
    max_retries: u32,
    max_deferred: usize,
}

impl WhoisTable {
    /// Creates an empty table.
    pub fn new(config: &Config) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            retry_delay: config.whois_retry_delay,
            max_retries: config.whois_max_retries,
            max_deferred: config.whois_max_deferred,
        }
    }

    /// Notes that `address` needs resolving.
    ///
    /// Returns true if a WHOIS should go out now: the address was not pending,
    /// or its last request is at least one retry delay old. Repeated calls
    /// within the delay are absorbed.
    pub fn request(&self, address: Address, now: Instant) -> bool {
        let mut pending = self.pending.lock();
        let entry = pending.entry(address).or_default();
        match entry.last_request {
            None => {
                entry.last_request = Some(now);
                true
            }
            Some(last) if now.saturating_duration_since(last) >= self.retry_delay => {
                entry.last_request = Some(now);
                entry.retries += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Parks `action` until `address` resolves.
    ///
    /// When the address already holds the maximum number of parked actions
    /// the new one is handed back instead.
    pub fn defer(&self, address: Address, action: Deferred) -> Result<(), Deferred> {
        let mut pending = self.pending.lock();
        let entry = pending.entry(address).or_default();
        if self.max_deferred > 0 && entry.deferred.len() >= self.max_deferred {
            debug!("WHOIS queue for {} full, dropping parked action", address);
            return Err(action);
        }
        entry.deferred.push_back(action);
        Ok(())
    }

    /// Removes `address` from the table and returns its parked actions in
    /// the order they were parked.
    pub fn resolve(&self, address: Address) -> Vec<Deferred> {
        self.pending.lock().remove(&address).map(|entry| entry.deferred.into()).unwrap_or_default()
    }

    /// Finds due retries and abandons addresses out of retries.
    pub fn sweep(&self, now: Instant) -> WhoisSweep {
        let mut sweep = WhoisSweep::default();
        let mut pending = self.pending.lock();

        pending.retain(|address, entry| {
            let due = entry.last_request.map_or(true, |last| now.saturating_duration_since(last) >= self.retry_delay);
            if !due {
                let deadline = entry.last_request.map(|last| last + self.retry_delay);
                sweep.next_deadline = earliest(sweep.next_deadline, deadline);
                return true;
            }
            if entry.retries >= self.max_retries {
                trace!("Abandoning WHOIS for {} after {} retries", address, entry.retries);
                sweep.dropped_actions += entry.deferred.len();
                sweep.abandoned.push(*address);
                return false;
            }
            if entry.last_request.is_some() {
                entry.retries += 1;
            }
            entry.last_request = Some(now);
            sweep.next_deadline = earliest(sweep.next_deadline, Some(now + self.retry_delay));
            sweep.retry.push(*address);
            true
        });

        sweep
    }

    /// Discards parked transmissions scheduled on `network`.
    ///
    /// Addresses left with nothing parked stay pending; their WHOIS may still
    /// be answered.
    pub fn drop_network(&self, network: NetworkId) -> usize {
        self.retain_deferred(|action| action.network() != Some(network))
    }

    /// Discards parked transmissions to `destination` on `network`.
    pub fn drop_flow(&self, network: NetworkId, destination: Address) -> usize {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&destination) else {
            return 0;
        };
        let before = entry.deferred.len();
        entry.deferred.retain(|action| action.network() != Some(network));
        before - entry.deferred.len()
    }

    fn retain_deferred(&self, keep: impl Fn(&Deferred) -> bool) -> usize {
        let mut pending = self.pending.lock();
        let mut dropped = 0;
        for entry in pending.values_mut() {
            let before = entry.deferred.len();
            entry.deferred.retain(&keep);
            dropped += before - entry.deferred.len();
        }
        dropped
    }

    /// True if `address` is waiting for resolution.
    pub fn is_pending(&self, address: Address) -> bool {
        self.pending.lock().contains_key(&address)
    }

    /// Number of addresses waiting for resolution.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of actions parked for `address`.
    pub fn deferred_count(&self, address: Address) -> usize {
        self.pending.lock().get(&address).map_or(0, |entry| entry.deferred.len())
    }
}

pub(crate) fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::Verb;

    fn table(max_retries: u32, max_deferred: usize) -> WhoisTable {
        let config = Config {
            whois_retry_delay: Duration::from_millis(500),
            whois_max_retries: max_retries,
            whois_max_deferred: max_deferred,
            ..Config::default()
        };
        WhoisTable::new(&config)
    }

    fn transmit(network: u64, tag: u8) -> Deferred {
        let mut packet = Packet::new(Address::new(0x0a), Address::new(0x0b), Verb::Frame);
        packet.append(&[tag]);
        Deferred::Transmit { network: NetworkId::new(network), qos_class: 0, packet, encrypt: true }
    }

    fn tag(action: &Deferred) -> u8 {
        match action {
            Deferred::Transmit { packet, .. } => packet.payload()[0],
            Deferred::Inbound(inbound) => inbound.packet.payload()[0],
        }
    }

    #[test]
    fn test_request_is_idempotent_within_backoff() {
        let whois = table(4, 0);
        let now = Instant::now();
        let address = Address::new(0x0102030405);

        assert!(whois.request(address, now));
        assert!(!whois.request(address, now + Duration::from_millis(100)));
        assert!(!whois.request(address, now + Duration::from_millis(499)));
        assert!(whois.request(address, now + Duration::from_millis(500)));
        assert_eq!(whois.pending_count(), 1);
    }

    #[test]
    fn test_resolve_preserves_order() {
        let whois = table(4, 0);
        let address = Address::new(0x0102030405);
        for i in 0..5 {
            whois.defer(address, transmit(1, i)).unwrap();
        }
        assert_eq!(whois.deferred_count(address), 5);

        let actions = whois.resolve(address);
        let tags: Vec<u8> = actions.iter().map(tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert!(!whois.is_pending(address));
        assert!(whois.resolve(address).is_empty());
    }

    #[test]
    fn test_defer_bound() {
        let whois = table(4, 2);
        let address = Address::new(7);
        assert!(whois.defer(address, transmit(1, 0)).is_ok());
        assert!(whois.defer(address, transmit(1, 1)).is_ok());
        let rejected = whois.defer(address, transmit(1, 2)).unwrap_err();
        assert_eq!(tag(&rejected), 2);
        assert_eq!(whois.deferred_count(address), 2);
    }

    #[test]
    fn test_sweep_retries_then_abandons() {
        let whois = table(2, 0);
        let start = Instant::now();
        let address = Address::new(0x42);
        assert!(whois.request(address, start));
        whois.defer(address, transmit(1, 0)).unwrap();

        let sweep = whois.sweep(start + Duration::from_millis(100));
        assert!(sweep.retry.is_empty());
        assert_eq!(sweep.next_deadline, Some(start + Duration::from_millis(500)));

        let sweep = whois.sweep(start + Duration::from_millis(500));
        assert_eq!(sweep.retry, vec![address]);
        let sweep = whois.sweep(start + Duration::from_millis(1000));
        assert_eq!(sweep.retry, vec![address]);

        let sweep = whois.sweep(start + Duration::from_millis(1500));
        assert!(sweep.retry.is_empty());
        assert_eq!(sweep.abandoned, vec![address]);
        assert_eq!(sweep.dropped_actions, 1);
        assert_eq!(sweep.next_deadline, None);
        assert!(!whois.is_pending(address));
    }

    #[test]
    fn test_parked_without_request_is_due_immediately() {
        let whois = table(4, 0);
        let address = Address::new(0x99);
        whois.defer(address, transmit(1, 0)).unwrap();

        let now = Instant::now();
        let sweep = whois.sweep(now);
        assert_eq!(sweep.retry, vec![address]);
        assert!(!whois.request(address, now));
    }

    #[test]
    fn test_drop_network() {
        let whois = table(4, 0);
        let a = Address::new(1);
        let b = Address::new(2);
        whois.defer(a, transmit(1, 0)).unwrap();
        whois.defer(a, transmit(2, 1)).unwrap();
        whois.defer(b, transmit(1, 2)).unwrap();

        assert_eq!(whois.drop_network(NetworkId::new(1)), 2);
        assert_eq!(whois.deferred_count(a), 1);
        assert_eq!(whois.deferred_count(b), 0);
        assert!(whois.is_pending(b));

        assert_eq!(whois.drop_flow(NetworkId::new(2), a), 1);
        assert_eq!(whois.drop_flow(NetworkId::new(2), Address::new(3)), 0);
    }
}
