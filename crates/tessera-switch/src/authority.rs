//! Network configuration and membership authority.
//!
//! Public networks admit every peer. A private network carries this node's
//! certificate of membership, and a peer is a valid frame destination only
//! while its own certificate is for the same network, issued to it, signed
//! and in agreement with ours.

use std::sync::Arc;

use tessera_core::{constants::DEFAULT_MTU, Address, NetworkId};
use tessera_protocol::CertificateOfMembership;

/// Maps matching Ethernet traffic to a QoS class.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QosRule {
    /// Ethertype to match, any if `None`.
    pub ether_type: Option<u16>,
    /// VLAN id to match, any if `None`.
    pub vlan_id: Option<u16>,
    /// Class assigned to matching frames.
    pub qos_class: u8,
}

impl QosRule {
    /// True if a frame with this ethertype and VLAN matches the rule.
    pub fn matches(&self, ether_type: u16, vlan_id: u16) -> bool {
        self.ether_type.map_or(true, |t| t == ether_type) && self.vlan_id.map_or(true, |v| v == vlan_id)
    }
}

/// Locally applied configuration of one virtual network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network id.
    pub id: NetworkId,
    /// Largest Ethernet payload accepted from the local tap.
    pub mtu: usize,
    /// Whether Ethernet broadcast is forwarded.
    pub enable_broadcast: bool,
    /// Max recipients of a single multicast frame.
    pub multicast_limit: u32,
    /// QoS classification rules, first match wins.
    pub qos_rules: Vec<QosRule>,
    /// This node's certificate; `None` on a public network.
    pub certificate: Option<CertificateOfMembership>,
}

impl NetworkConfig {
    /// Creates a public network configuration with default MTU, broadcast
    /// enabled and no rules.
    pub fn new(id: NetworkId) -> Self {
        Self {
            id,
            mtu: DEFAULT_MTU,
            enable_broadcast: true,
            multicast_limit: 32,
            qos_rules: Vec::new(),
            certificate: None,
        }
    }

    /// True for networks that admit peers without a certificate.
    pub fn is_public(&self) -> bool {
        self.certificate.is_none()
    }

    /// Decides whether `member`, presenting `theirs`, may receive traffic.
    pub fn admits(&self, member: Address, theirs: Option<&CertificateOfMembership>) -> bool {
        let Some(ours) = &self.certificate else {
            return true;
        };
        theirs.map_or(false, |theirs| {
            theirs.network_id() == Some(self.id)
                && theirs.issued_to() == Some(member)
                && theirs.is_signed()
                && ours.agrees_with(theirs)
        })
    }

    /// Returns the QoS class of a frame; class 0 when no rule matches.
    pub fn classify(&self, ether_type: u16, vlan_id: u16) -> u8 {
        self.qos_rules
            .iter()
            .find(|rule| rule.matches(ether_type, vlan_id))
            .map_or(0, |rule| rule.qos_class)
    }
}

/// Source of truth for which networks exist and who may talk on them.
pub trait NetworkAuthority: Send + Sync {
    /// Returns the configuration of a joined network.
    fn network(&self, network: NetworkId) -> Option<Arc<NetworkConfig>>;

    /// Returns the certificate `member` presented on `network`.
    ///
    /// Only certificates whose signature the node has already checked
    /// against the network controller are returned.
    fn member_certificate(&self, network: NetworkId, member: Address) -> Option<CertificateOfMembership>;
}
