//! Active queue management: fq-CoDel style scheduling of outbound packets.
//!
//! Outbound packets are queued per network, per flow. Each flow queue runs
//! CoDel to keep standing delay near the target, and flows of a network share
//! the link through deficit round-robin with a priority lane for new flows.
//! A single lock guards all blocks; a dequeue pass only collects entries and
//! leaves armoring and transmission to the caller.

mod block;
mod queue;

use std::{collections::BTreeMap, time::Instant};

use parking_lot::Mutex;
use tessera_core::{config::Config, Address, NetworkId};
use tracing::trace;

pub use block::{FlowKey, NetworkQosBlock, PassOutcome, SchedulerParams, Serviced};
pub use queue::{control_law, CoDelParams, ManagedQueue, OutboundEntry, QueueList, Verdict};

/// Entries collected by one dequeue pass.
#[derive(Debug, Default)]
pub struct DequeuePass {
    /// Entries to armor and transmit, in scheduling order.
    pub transmit: Vec<OutboundEntry>,
    /// Entries dropped by CoDel.
    pub dropped: usize,
    /// Entries still queued after the pass.
    pub backlog: usize,
}

/// The outbound scheduler.
#[derive(Debug)]
pub struct Aqm {
    blocks: Mutex<BTreeMap<NetworkId, NetworkQosBlock>>,
    params: SchedulerParams,
}

impl Aqm {
    /// Creates a scheduler tuned from `config`.
    pub fn new(config: &Config) -> Self {
        let params = SchedulerParams {
            codel: CoDelParams {
                target: config.codel_target,
                interval: config.codel_interval,
                min_backlog: config.aqm_min_backlog,
            },
            quantum: config.aqm_quantum,
            max_enqueued: config.aqm_max_enqueued_packets,
            pass_byte_budget: config.aqm_pass_byte_budget,
            idle_timeout: config.aqm_flow_idle_timeout,
        };
        Self { blocks: Mutex::new(BTreeMap::new()), params }
    }

    /// Queues `entry` on its flow, creating the network's block on demand.
    ///
    /// Returns the entry dropped to keep the network under its ceiling, if any.
    pub fn enqueue(&self, network: NetworkId, qos_class: u8, entry: OutboundEntry) -> Option<OutboundEntry> {
        let key = FlowKey { destination: entry.destination, qos_class };
        let victim = self.blocks.lock().entry(network).or_default().enqueue(key, entry, &self.params);
        if let Some(victim) = &victim {
            trace!("Network {} over its queue ceiling, dropped packet for {}", network, victim.destination);
        }
        victim
    }

    /// Runs one scheduling pass over every network.
    ///
    /// Idle queues are reclaimed afterwards and blocks left without queues
    /// are destroyed.
    pub fn dequeue_pass(&self, now: Instant) -> DequeuePass {
        let mut pass = DequeuePass::default();
        let mut blocks = self.blocks.lock();

        blocks.retain(|network, block| {
            let outcome = block.run_pass(now, &self.params, &mut pass.transmit);
            if outcome.dropped > 0 {
                trace!("CoDel dropped {} packets on network {}", outcome.dropped, network);
            }
            pass.dropped += outcome.dropped;
            block.reclaim_idle(now, self.params.idle_timeout);
            pass.backlog += block.enqueued();
            !block.is_empty()
        });

        pass
    }

    /// Destroys a network's block, discarding everything it queued.
    pub fn teardown(&self, network: NetworkId) -> usize {
        self.blocks.lock().remove(&network).map_or(0, |block| block.enqueued())
    }

    /// Discards every flow towards `destination` on `network`.
    pub fn purge_flow(&self, network: NetworkId, destination: Address) -> usize {
        self.blocks.lock().get_mut(&network).map_or(0, |block| block.purge_destination(destination))
    }

    /// Entries queued on `network`.
    pub fn enqueued(&self, network: NetworkId) -> usize {
        self.blocks.lock().get(&network).map_or(0, NetworkQosBlock::enqueued)
    }

    /// True while `network` has a block.
    pub fn has_network(&self, network: NetworkId) -> bool {
        self.blocks.lock().contains_key(&network)
    }

    /// Number of networks with a block.
    pub fn network_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_protocol::{Packet, Verb};

    fn entry(destination: u64, now: Instant) -> OutboundEntry {
        let packet = Packet::new(Address::new(destination), Address::new(1), Verb::Frame);
        OutboundEntry { destination: Address::new(destination), created_at: now, packet, encrypt: true }
    }

    #[test]
    fn test_block_destroyed_when_idle() {
        let config = Config { aqm_flow_idle_timeout: Duration::ZERO, ..Config::default() };
        let aqm = Aqm::new(&config);
        let network = NetworkId::new(0x1111);
        let now = Instant::now();

        aqm.enqueue(network, 0, entry(2, now));
        assert!(aqm.has_network(network));
        assert_eq!(aqm.enqueued(network), 1);

        let pass = aqm.dequeue_pass(now);
        assert_eq!(pass.transmit.len(), 1);
        assert_eq!(pass.backlog, 0);
        assert!(!aqm.has_network(network));
    }

    #[test]
    fn test_block_survives_idle_timeout() {
        let aqm = Aqm::new(&Config::default());
        let network = NetworkId::new(0x1111);
        let now = Instant::now();

        aqm.enqueue(network, 0, entry(2, now));
        aqm.dequeue_pass(now);
        assert!(aqm.has_network(network));
        aqm.dequeue_pass(now + Duration::from_secs(5));
        assert!(!aqm.has_network(network));
    }

    #[test]
    fn test_networks_are_isolated() {
        let aqm = Aqm::new(&Config::default());
        let now = Instant::now();
        let a = NetworkId::new(1);
        let b = NetworkId::new(2);

        for _ in 0..3 {
            aqm.enqueue(a, 0, entry(2, now));
        }
        aqm.enqueue(b, 0, entry(2, now));

        assert_eq!(aqm.teardown(a), 3);
        assert_eq!(aqm.teardown(a), 0);
        assert_eq!(aqm.network_count(), 1);

        let pass = aqm.dequeue_pass(now);
        assert_eq!(pass.transmit.len(), 1);
    }

    #[test]
    fn test_zero_quantum_config_does_not_stall() {
        let aqm = Aqm::new(&Config { aqm_quantum: 0, ..Config::default() });
        let network = NetworkId::new(1);
        let now = Instant::now();
        aqm.enqueue(network, 0, entry(2, now));
        aqm.enqueue(network, 0, entry(2, now));

        let pass = aqm.dequeue_pass(now);
        assert_eq!(pass.transmit.len(), 2);
        assert_eq!(pass.backlog, 0);
        // The lock is free again
        assert!(aqm.enqueue(network, 0, entry(3, now)).is_none());
    }

    #[test]
    fn test_purge_flow() {
        let aqm = Aqm::new(&Config::default());
        let now = Instant::now();
        let network = NetworkId::new(1);
        aqm.enqueue(network, 0, entry(2, now));
        aqm.enqueue(network, 1, entry(2, now));
        aqm.enqueue(network, 0, entry(3, now));

        assert_eq!(aqm.purge_flow(network, Address::new(2)), 2);
        assert_eq!(aqm.purge_flow(NetworkId::new(9), Address::new(3)), 0);
        assert_eq!(aqm.enqueued(network), 1);
    }
}
