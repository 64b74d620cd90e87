#![warn(missing_docs)]

//! tessera-protocol: packet and fragment headers, verbs, multicast groups and
//! membership certificates.

/// Certificates of membership.
pub mod certificate;
/// Tail fragment encoding.
pub mod fragment;
/// Multicast group value type.
pub mod multicast;
/// Packet header layout and verbs.
pub mod packet;

pub use certificate::{CertificateOfMembership, Qualifier};
pub use fragment::{Fragment, FragmentHeader};
pub use multicast::MulticastGroup;
pub use packet::{split_for_mtu, Packet, Verb, MAX_HOPS};

/// Ethernet frame types the switch inspects.
pub mod ethertype {
    /// IPv4.
    pub const IPV4: u16 = 0x0800;
    /// Address resolution protocol.
    pub const ARP: u16 = 0x0806;
    /// IPv6.
    pub const IPV6: u16 = 0x86dd;
}
