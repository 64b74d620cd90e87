use std::net::IpAddr;

use tessera_core::Mac;

/// A multicast group: a multicast MAC plus 32 bits of additional
/// distinguishing information (ADI).
///
/// ADI is zero for most groups. For IPv4 ARP it holds the IPv4 address being
/// resolved, which turns Ethernet broadcast ARP into a selective multicast
/// query. Groups are immutable values, ordered by MAC then ADI.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MulticastGroup {
    mac: Mac,
    adi: u32,
}

impl MulticastGroup {
    /// Creates a group from a MAC and ADI.
    pub fn new(mac: Mac, adi: u32) -> Self {
        Self { mac, adi }
    }

    /// Derives the group used for address resolution (ARP/NDP) of an IP.
    ///
    /// IPv4 uses the broadcast MAC with the address as ADI; IPv6 uses the
    /// solicited-node MAC `33:33:ff` followed by the last three address bytes.
    pub fn for_address_resolution(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::new(Mac::BROADCAST, u32::from(v4)),
            IpAddr::V6(v6) => {
                let o = v6.octets();
                Self::new(Mac::from_octets([0x33, 0x33, 0xff, o[13], o[14], o[15]]), 0)
            }
        }
    }

    /// Returns the multicast MAC.
    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Returns the additional distinguishing information.
    pub fn adi(&self) -> u32 {
        self.adi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ipv4_resolution_group() {
        let group = MulticastGroup::for_address_resolution(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(group.mac(), Mac::BROADCAST);
        assert_eq!(group.adi(), 0x0a010203);
    }

    #[test]
    fn test_ipv6_resolution_group() {
        let ip = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0x00ab, 0xcdef);
        let group = MulticastGroup::for_address_resolution(IpAddr::V6(ip));
        assert_eq!(group.mac(), Mac::from_octets([0x33, 0x33, 0xff, 0xab, 0xcd, 0xef]));
        assert_eq!(group.adi(), 0);
    }

    #[test]
    fn test_group_ordering() {
        let a = MulticastGroup::new(Mac::new(1), 5);
        let b = MulticastGroup::new(Mac::new(1), 6);
        let c = MulticastGroup::new(Mac::new(2), 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, MulticastGroup::new(Mac::new(1), 5));
    }
}
