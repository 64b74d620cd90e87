#![warn(missing_docs)]

//! Tessera: a small public API facade for the workspace.
//!
//! This crate re-exports the types needed to embed the switching core in an
//! overlay node:
//!
//! - The switch and its events (`Switch`, `SwitchEvent`)
//! - The seams a node implements (`PeerDirectory`, `NetworkAuthority`,
//!   `PacketHandler`, `Transport`, `Cipher`, `Signer`, `Verifier`)
//! - Addressing and packet types (`Address`, `NetworkId`, `Mac`, `Packet`, ...)
//! - Core configuration (`Config`)
//!
//! Example
//! ```ignore
//! use std::time::Instant;
//! use tessera::prelude::*;
//!
//! let switch = Switch::new(Config::default(), Address::new(0x0102030405), services);
//!
//! let mut packet = Packet::new(peer, switch.address(), Verb::Echo);
//! packet.append(b"hello");
//! switch.send(packet, true, Instant::now());
//!
//! // Drive timers and drain the scheduler
//! let delay = switch.run_maintenance(Instant::now());
//! ```

// Core config, addressing and seams
pub use tessera_core::{
    cipher::{Cipher, PlaintextCipher, Signer, Verifier},
    config::Config,
    error::{ErrorKind, Result},
    transport::{Path, Transport},
    Address, Identity, Mac, NetworkId,
};
// Protocol: packets, fragments, groups and certificates
pub use tessera_protocol::{ethertype, CertificateOfMembership, Fragment, MulticastGroup, Packet, Qualifier, Verb};
// Switch: the core and its seams
pub use tessera_switch::{
    Decode, InboundPacket, NetworkAuthority, NetworkConfig, NetworkSummary, PacketHandler, PeerDirectory, QosRule,
    Services, Switch, SwitchEvent, SwitchStatistics,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Address, CertificateOfMembership, Cipher, Config, Decode, Identity, InboundPacket, Mac, NetworkAuthority,
        NetworkConfig, NetworkId, Packet, PacketHandler, Path, PeerDirectory, PlaintextCipher, Services, Switch,
        SwitchEvent, Transport, Verb,
    };
}
