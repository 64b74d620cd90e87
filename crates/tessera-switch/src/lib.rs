#![warn(missing_docs)]

//! tessera-switch: the packet switching core of an overlay node.
//!
//! Sits between the physical transport and the protocol layer:
//! - Address resolution (WHOIS) with parking and in-order replay
//! - Fragment reassembly in a fixed ring
//! - Relaying with hop limits and rate-limited rendezvous hints
//! - fq-CoDel scheduling of outbound packets per network and flow
//! - A maintenance loop that drives timers and drains the scheduler

/// Active queue management (fq-CoDel).
pub mod aqm;
/// Network configuration authority.
pub mod authority;
/// Seams towards the embedding node.
pub mod environment;
/// Events emitted by the switch.
pub mod event_types;
/// Member liveness tracking.
pub mod membership;
/// Fragment reassembly ring.
pub mod reassembly;
/// Switch counters.
pub mod statistics;
/// The switch itself.
pub mod switch;
/// Rendezvous hint rate limiting.
pub mod unite;
/// Pending WHOIS resolutions.
pub mod whois;

pub use authority::{NetworkAuthority, NetworkConfig, QosRule};
pub use environment::{Decode, InboundPacket, PacketHandler, PeerDirectory};
pub use event_types::SwitchEvent;
pub use membership::NetworkSummary;
pub use statistics::SwitchStatistics;
pub use switch::{Services, Switch, CONTROL_QOS_CLASS};
