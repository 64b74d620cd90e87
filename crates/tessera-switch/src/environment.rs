//! Seams between the switch and the node that embeds it.
//!
//! The switch knows nothing about peer bookkeeping or packet semantics. It
//! asks a [`PeerDirectory`] who peers are and how to reach them, and hands
//! every packet addressed to the local node to a [`PacketHandler`].

use std::time::Instant;

use tessera_core::{transport::Path, Address, Identity};
use tessera_protocol::Packet;

/// Lookup of peer identities and physical paths.
pub trait PeerDirectory: Send + Sync {
    /// Returns the identity of `address` if it is known locally.
    fn identity(&self, address: Address) -> Option<Identity>;

    /// Returns the upstream peer (root) that answers WHOIS queries and relays
    /// traffic for peers without a direct path.
    fn upstream(&self) -> Option<Address>;

    /// Returns the preferred physical path to `address`, if any.
    fn best_path(&self, _address: Address) -> Option<Path> {
        None
    }
}

/// Outcome of handing a received packet to the [`PacketHandler`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decode {
    /// The packet was consumed (or deliberately discarded).
    Handled,
    /// The packet cannot be authenticated until the identity of the given
    /// address is known. The switch parks it and replays it once.
    NeedIdentity(Address),
}

/// A packet addressed to this node, as received from the network.
#[derive(Clone, Debug)]
pub struct InboundPacket {
    /// Physical path the packet (or its head) arrived on.
    pub path: Option<Path>,
    /// The packet, reassembled if it was fragmented.
    pub packet: Packet,
    /// When the packet was accepted by the switch.
    pub received_at: Instant,
}

/// Consumer of packets addressed to this node.
pub trait PacketHandler: Send + Sync {
    /// Decodes and acts on an inbound packet.
    fn handle(&self, packet: &InboundPacket, now: Instant) -> Decode;
}
