#![warn(missing_docs)]

//! tessera-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Overlay addressing (peer addresses, network ids, MACs, identities)
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - The outbound transport and cipher seams
//!
//! Protocol-specific logic lives in specialized crates:
//! - `tessera-protocol`: packet and fragment headers, verbs, multicast groups
//! - `tessera-switch`: address resolution, reassembly, rendezvous assist, AQM scheduling

/// Protocol constants shared across layers.
pub mod constants {
    /// Length of a peer address on the wire.
    pub const ADDRESS_LENGTH: usize = 5;
    /// Maximum number of pieces (head included) a packet may be split into.
    ///
    /// The total is carried in a 4-bit field, the received pieces in a bitmask.
    pub const MAX_PACKET_FRAGMENTS: usize = 8;
    /// Default virtual network MTU.
    pub const DEFAULT_MTU: usize = 2800;
    /// Default payload MTU of the physical (UDP) transport.
    ///
    /// Derived from ethernet_mtu - ipv6_header_size - udp_header_size - tunnel headroom
    ///       1444 = 1500         - 40               - 8               - 8
    pub const DEFAULT_PHYSICAL_MTU: usize = 1444;
    /// Hops after which a relayed packet is no longer forwarded.
    pub const RELAY_MAX_HOPS: u8 = 4;
}

/// Peer addresses, network ids, MAC addresses and identities.
pub mod address;
/// Encryption capability applied at transmit time.
pub mod cipher;
/// Configuration options for the switching core.
pub mod config;
/// Error types and results.
pub mod error;
/// Outbound transport abstraction.
pub mod transport;

pub use address::{Address, Identity, Mac, NetworkId};
