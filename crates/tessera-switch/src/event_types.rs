//! Events emitted by the switch to the embedding node.
//!
//! Events flow over an unbounded channel so the data path never blocks on a
//! slow consumer. They are advisory: the switch does not wait for them to be
//! acted on.

use tessera_core::{Address, Mac, NetworkId};
use tessera_protocol::MulticastGroup;

/// Events that can occur and are pushed through the event receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchEvent {
    /// Two peers were relayed through this node and should be introduced to
    /// each other. `a` is always the numerically smaller address.
    Rendezvous {
        /// First peer of the pair.
        a: Address,
        /// Second peer of the pair.
        b: Address,
    },
    /// A multicast or broadcast frame arrived from the local tap and needs
    /// propagation to the group's subscribers.
    MulticastFrame {
        /// Network the frame belongs to.
        network: NetworkId,
        /// Destination group, with ADI for address resolution traffic.
        group: MulticastGroup,
        /// Source MAC.
        from: Mac,
        /// Ethertype.
        ether_type: u16,
        /// VLAN id.
        vlan_id: u16,
        /// Frame payload.
        payload: Vec<u8>,
        /// Max recipients, from the network's multicast limit.
        limit: u32,
    },
    /// A network's configuration changed and members should refresh it.
    NetworkUpdated(NetworkId),
    /// A member came online or its status changed.
    MemberUpdated {
        /// Network id.
        network: NetworkId,
        /// Member address.
        member: Address,
    },
    /// A member lost its authorization.
    MemberDeauthorized {
        /// Network id.
        network: NetworkId,
        /// Member address.
        member: Address,
    },
}
