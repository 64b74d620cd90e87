use std::{fmt, sync::Arc};

use crate::constants::ADDRESS_LENGTH;

const ADDRESS_MASK: u64 = 0xff_ffff_ffff;
const MAC_MASK: u64 = 0xffff_ffff_ffff;

/// A 40-bit overlay peer address.
///
/// Addresses are totally ordered by their numeric value, which is what the
/// rendezvous table relies on to canonicalize unordered pairs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    /// Creates an address from the low 40 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & ADDRESS_MASK)
    }

    /// Reads an address from the first five bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ADDRESS_LENGTH {
            return None;
        }
        let value = bytes[..ADDRESS_LENGTH].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Some(Self(value))
    }

    /// Returns the five wire bytes of this address (big endian).
    pub fn to_bytes(self) -> [u8; ADDRESS_LENGTH] {
        let mut out = [0u8; ADDRESS_LENGTH];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = (self.0 >> (8 * (ADDRESS_LENGTH - 1 - i))) as u8;
        }
        out
    }

    /// Returns the numeric value of this address.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reserved addresses (zero, or a leading `0xff` byte) never name a real peer.
    pub fn is_reserved(self) -> bool {
        self.0 == 0 || (self.0 >> 32) == 0xff
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010x}", self.0)
    }
}

/// A 64-bit virtual network id.
///
/// The most significant 40 bits are the address of the network's controller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkId(u64);

impl NetworkId {
    /// Pseudo-network used to schedule control-plane traffic (e.g. WHOIS).
    pub const CONTROL: NetworkId = NetworkId(0);

    /// Creates a network id.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value of this network id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address of the controller that owns this network.
    pub fn controller(self) -> Address {
        Address::new(self.0 >> 24)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A 48-bit Ethernet MAC address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mac(u64);

impl Mac {
    /// The Ethernet broadcast address.
    pub const BROADCAST: Mac = Mac(MAC_MASK);

    /// Creates a MAC from the low 48 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & MAC_MASK)
    }

    /// Creates a MAC from its six octets.
    pub fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Returns the six octets of this MAC.
    pub fn octets(self) -> [u8; 6] {
        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = (self.0 >> (8 * (5 - i))) as u8;
        }
        out
    }

    /// Returns the numeric value of this MAC.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the all-ones broadcast address.
    pub fn is_broadcast(self) -> bool {
        self.0 == MAC_MASK
    }

    /// True when the group bit of the first octet is set (broadcast included).
    pub fn is_multicast(self) -> bool {
        (self.0 >> 40) & 0x01 != 0
    }

    /// Derives the MAC a peer uses on a given network.
    ///
    /// The first octet is locally administered and unicast, chosen from the
    /// network id; the remaining 40 bits are the address XOR'd with network id
    /// bytes so that different networks yield different MACs for one peer.
    pub fn from_address(address: Address, network: NetworkId) -> Self {
        let mut m = u64::from(first_octet_for_network(network)) << 40;
        m |= address.as_u64();
        m ^= network_mix(network);
        Self(m)
    }

    /// Recovers the overlay address from a MAC produced by [`Mac::from_address`].
    pub fn to_address(self, network: NetworkId) -> Address {
        Address::new((self.0 & ADDRESS_MASK) ^ network_mix(network))
    }

    /// True when the first octet matches the one this network assigns to peers.
    pub fn is_overlay_assigned(self, network: NetworkId) -> bool {
        (self.0 >> 40) as u8 == first_octet_for_network(network)
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

fn first_octet_for_network(network: NetworkId) -> u8 {
    let a = ((network.as_u64() & 0xfe) as u8) | 0x02;
    // 0x52 is claimed by common hypervisors
    if a == 0x52 {
        0x32
    } else {
        a
    }
}

fn network_mix(network: NetworkId) -> u64 {
    let n = network.as_u64();
    (((n >> 8) & 0xff) << 32)
        | (((n >> 16) & 0xff) << 24)
        | (((n >> 24) & 0xff) << 16)
        | (((n >> 32) & 0xff) << 8)
        | ((n >> 40) & 0xff)
}

/// A peer's cryptographic identity: its address and opaque public key material.
///
/// The switching core never inspects the key; it only hands the identity to the
/// [`Cipher`](crate::cipher::Cipher) capability at transmit time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    address: Address,
    public_key: Arc<[u8]>,
}

impl Identity {
    /// Creates an identity from an address and its public key bytes.
    pub fn new(address: Address, public_key: impl Into<Arc<[u8]>>) -> Self {
        Self { address, public_key: public_key.into() }
    }

    /// Returns the address this identity hashes to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the public key bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_wire_bytes() {
        let addr = Address::new(0x89e9_2ceb_a5);
        assert_eq!(addr.to_bytes(), [0x89, 0xe9, 0x2c, 0xeb, 0xa5]);
        assert_eq!(Address::from_bytes(&addr.to_bytes()), Some(addr));
        assert_eq!(Address::from_bytes(&[1, 2, 3]), None);
        assert_eq!(addr.to_string(), "89e92ceba5");
    }

    #[test]
    fn test_address_masks_to_40_bits() {
        assert_eq!(Address::new(0xffff_0000_0000_0001).as_u64(), 0x0000_0001);
    }

    #[test]
    fn test_reserved_addresses() {
        assert!(Address::new(0).is_reserved());
        assert!(Address::new(0xff_0000_0001).is_reserved());
        assert!(!Address::new(0x01_0000_0001).is_reserved());
    }

    #[test]
    fn test_network_controller() {
        let nwid = NetworkId::new(0x8056_c2e2_1c00_0001);
        assert_eq!(nwid.controller(), Address::new(0x8056_c2e2_1c));
        assert_eq!(nwid.to_string(), "8056c2e21c000001");
    }

    #[test]
    fn test_mac_address_derivation_is_reversible() {
        let nwid = NetworkId::new(0x8056_c2e2_1c00_0001);
        let addr = Address::new(0x12_3456_789a);
        let mac = Mac::from_address(addr, nwid);

        assert!(!mac.is_multicast());
        assert!(mac.is_overlay_assigned(nwid));
        assert_eq!(mac.to_address(nwid), addr);
    }

    #[test]
    fn test_mac_differs_between_networks() {
        let addr = Address::new(0x12_3456_789a);
        let a = Mac::from_address(addr, NetworkId::new(0x1111_2222_3333_4444));
        let b = Mac::from_address(addr, NetworkId::new(0x5555_6666_7777_8888));
        assert_ne!(a, b);
    }

    #[test]
    fn test_mac_avoids_hypervisor_prefix() {
        let nwid = NetworkId::new(0x52);
        let mac = Mac::from_address(Address::new(1), nwid);
        assert_eq!(mac.octets()[0], 0x32);
    }

    #[test]
    fn test_mac_broadcast_and_multicast() {
        assert!(Mac::BROADCAST.is_broadcast());
        assert!(Mac::BROADCAST.is_multicast());
        let mcast = Mac::from_octets([0x33, 0x33, 0xff, 0x00, 0x00, 0x01]);
        assert!(mcast.is_multicast());
        assert!(!mcast.is_broadcast());
        assert_eq!(mcast.to_string(), "33:33:ff:00:00:01");
    }
}
