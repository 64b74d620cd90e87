//! Packet header layout and the owned `Packet` buffer.
//!
//! Wire layout of a packet (all integers big endian):
//!
//! | bytes    | field                                             |
//! |----------|---------------------------------------------------|
//! | `0..8`   | packet id                                         |
//! | `8..13`  | destination address                               |
//! | `13..18` | source address                                    |
//! | `18`     | flags (`0x40` fragmented) / cipher / hops (`0x07`) |
//! | `19..27` | message authentication code                       |
//! | `27`     | verb (low 5 bits)                                 |
//! | `28..`   | payload                                           |

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};
use tessera_core::{
    constants::ADDRESS_LENGTH,
    error::{DecodingErrorKind, ErrorKind, Result},
    Address,
};

use crate::fragment::{Fragment, FRAGMENT_HEADER_LENGTH};

/// Offset of the packet id.
pub const IDX_PACKET_ID: usize = 0;
/// Offset of the destination address.
pub const IDX_DESTINATION: usize = 8;
/// Offset of the source address.
pub const IDX_SOURCE: usize = 13;
/// Offset of the flags / cipher / hops byte.
pub const IDX_FLAGS: usize = 18;
/// Offset of the MAC.
pub const IDX_MAC: usize = 19;
/// Offset of the verb byte.
pub const IDX_VERB: usize = 27;
/// Offset of the payload.
pub const IDX_PAYLOAD: usize = 28;
/// Smallest valid packet (header only).
pub const MIN_PACKET_LENGTH: usize = IDX_PAYLOAD;

/// Flag bit marking the head of a fragmented packet.
pub const FLAG_FRAGMENTED: u8 = 0x40;
const HOPS_MASK: u8 = 0x07;
/// Largest value the 3-bit hop counter can hold.
pub const MAX_HOPS: u8 = HOPS_MASK;
const VERB_MASK: u8 = 0x1f;

/// Packet verbs the switching core needs to know about.
///
/// Everything else is the protocol layer's business and passes through opaque.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verb {
    /// No operation.
    Nop = 0x00,
    /// Identity announcement.
    Hello = 0x01,
    /// Error reply.
    Error = 0x02,
    /// Positive reply.
    Ok = 0x03,
    /// Identity lookup for an address.
    Whois = 0x04,
    /// Rendezvous hint: try a direct path to another peer.
    Rendezvous = 0x05,
    /// Ethernet frame on a virtual network.
    Frame = 0x06,
    /// Ethernet frame with explicit MACs (bridging).
    ExtFrame = 0x07,
    /// Echo request.
    Echo = 0x08,
    /// Multicast group subscription announcement.
    MulticastLike = 0x09,
    /// Multicast Ethernet frame.
    MulticastFrame = 0x0e,
}

impl TryFrom<u8> for Verb {
    type Error = ErrorKind;

    fn try_from(value: u8) -> std::result::Result<Self, ErrorKind> {
        match value & VERB_MASK {
            0x00 => Ok(Verb::Nop),
            0x01 => Ok(Verb::Hello),
            0x02 => Ok(Verb::Error),
            0x03 => Ok(Verb::Ok),
            0x04 => Ok(Verb::Whois),
            0x05 => Ok(Verb::Rendezvous),
            0x06 => Ok(Verb::Frame),
            0x07 => Ok(Verb::ExtFrame),
            0x08 => Ok(Verb::Echo),
            0x09 => Ok(Verb::MulticastLike),
            0x0e => Ok(Verb::MulticastFrame),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::Verb)),
        }
    }
}

/// An owned packet: header plus payload in a single buffer.
///
/// A packet has exactly one owner; it moves between queues rather than being
/// shared, so header mutation never races with a reader.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// Composes a new packet with a random id and an empty payload.
    pub fn new(destination: Address, source: Address, verb: Verb) -> Self {
        let mut data = vec![0u8; MIN_PACKET_LENGTH];
        BigEndian::write_u64(&mut data[IDX_PACKET_ID..IDX_DESTINATION], rand::random());
        data[IDX_DESTINATION..IDX_SOURCE].copy_from_slice(&destination.to_bytes());
        data[IDX_SOURCE..IDX_FLAGS].copy_from_slice(&source.to_bytes());
        data[IDX_VERB] = verb as u8;
        Self { data }
    }

    /// Wraps received bytes, checking only the minimum length.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < MIN_PACKET_LENGTH {
            return Err(ErrorKind::ReceivedDataTooShort { len: data.len(), min: MIN_PACKET_LENGTH });
        }
        Ok(Self { data })
    }

    /// Returns the packet id.
    pub fn packet_id(&self) -> u64 {
        BigEndian::read_u64(&self.data[IDX_PACKET_ID..IDX_DESTINATION])
    }

    /// Overwrites the packet id.
    pub fn set_packet_id(&mut self, packet_id: u64) {
        BigEndian::write_u64(&mut self.data[IDX_PACKET_ID..IDX_DESTINATION], packet_id);
    }

    /// Returns the destination address.
    pub fn destination(&self) -> Address {
        read_address(&self.data[IDX_DESTINATION..])
    }

    /// Returns the source address.
    pub fn source(&self) -> Address {
        read_address(&self.data[IDX_SOURCE..])
    }

    /// Rejects packets whose source is a reserved address.
    pub fn check_source(&self) -> Result<()> {
        if self.source().is_reserved() {
            return Err(DecodingErrorKind::Address.into());
        }
        Ok(())
    }

    /// Returns the hop counter.
    pub fn hops(&self) -> u8 {
        self.data[IDX_FLAGS] & HOPS_MASK
    }

    /// Increments the hop counter, wrapping within its 3 bits.
    pub fn increment_hops(&mut self) {
        increment_hops_at(&mut self.data, IDX_FLAGS);
    }

    /// True if this is the head of a fragmented packet.
    pub fn is_fragmented(&self) -> bool {
        self.data[IDX_FLAGS] & FLAG_FRAGMENTED != 0
    }

    /// Sets or clears the fragmented flag.
    pub fn set_fragmented(&mut self, fragmented: bool) {
        if fragmented {
            self.data[IDX_FLAGS] |= FLAG_FRAGMENTED;
        } else {
            self.data[IDX_FLAGS] &= !FLAG_FRAGMENTED;
        }
    }

    /// Decodes the verb.
    pub fn verb(&self) -> Result<Verb> {
        Verb::try_from(self.data[IDX_VERB])
    }

    /// Returns the raw verb byte, for verbs this crate does not model.
    pub fn raw_verb(&self) -> u8 {
        self.data[IDX_VERB] & VERB_MASK
    }

    /// Returns the payload bytes after the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[IDX_PAYLOAD..]
    }

    /// Appends bytes to the payload.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Returns the whole packet as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the packet, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Total length in bytes, header included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: a packet holds at least its header.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &format_args!("{:016x}", self.packet_id()))
            .field("source", &self.source())
            .field("destination", &self.destination())
            .field("verb", &self.raw_verb())
            .field("len", &self.data.len())
            .finish()
    }
}

/// Splits armored packet bytes into datagrams no larger than `mtu`.
///
/// The first datagram is the head (the packet's first `mtu` bytes); the rest
/// are fragments numbered from 1. The caller sets the fragmented flag before
/// armoring; this only cuts. Returns `None` if more than
/// [`MAX_PACKET_FRAGMENTS`](tessera_core::constants::MAX_PACKET_FRAGMENTS)
/// pieces would be needed or `mtu` cannot carry a fragment header.
pub fn split_for_mtu(bytes: &[u8], mtu: usize) -> Option<Vec<Vec<u8>>> {
    if bytes.len() <= mtu {
        return Some(vec![bytes.to_vec()]);
    }
    if mtu <= FRAGMENT_HEADER_LENGTH || mtu < MIN_PACKET_LENGTH {
        return None;
    }

    let tail_chunk = mtu - FRAGMENT_HEADER_LENGTH;
    let remaining = bytes.len() - mtu;
    let tails = (remaining + tail_chunk - 1) / tail_chunk;
    let total = tails + 1;
    if total > tessera_core::constants::MAX_PACKET_FRAGMENTS {
        return None;
    }

    let packet_id = BigEndian::read_u64(&bytes[IDX_PACKET_ID..IDX_DESTINATION]);
    let destination = read_address(&bytes[IDX_DESTINATION..]);

    let mut out = Vec::with_capacity(total);
    out.push(bytes[..mtu].to_vec());
    for (i, chunk) in bytes[mtu..].chunks(tail_chunk).enumerate() {
        let fragment = Fragment::new(packet_id, destination, (i + 1) as u8, total as u8, chunk);
        out.push(fragment.into_bytes());
    }
    Some(out)
}

pub(crate) fn read_address(bytes: &[u8]) -> Address {
    // Callers slice at fixed header offsets of length-checked buffers
    Address::from_bytes(&bytes[..ADDRESS_LENGTH]).unwrap_or_default()
}

pub(crate) fn increment_hops_at(data: &mut [u8], idx: usize) {
    let flags = data[idx];
    data[idx] = (flags & !HOPS_MASK) | (((flags & HOPS_MASK) + 1) & HOPS_MASK);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragment;

    fn addr(v: u64) -> Address {
        Address::new(v)
    }

    #[test]
    fn test_new_packet_header() {
        let packet = Packet::new(addr(0x1111111111), addr(0x2222222222), Verb::Frame);
        assert_eq!(packet.len(), MIN_PACKET_LENGTH);
        assert_eq!(packet.destination(), addr(0x1111111111));
        assert_eq!(packet.source(), addr(0x2222222222));
        assert_eq!(packet.verb().unwrap(), Verb::Frame);
        assert_eq!(packet.hops(), 0);
        assert!(!packet.is_fragmented());
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn test_packet_ids_are_random() {
        let a = Packet::new(addr(1), addr(2), Verb::Nop);
        let b = Packet::new(addr(1), addr(2), Verb::Nop);
        assert_ne!(a.packet_id(), b.packet_id());
    }

    #[test]
    fn test_from_bytes_too_short() {
        let result = Packet::from_bytes(vec![0; 10]);
        assert!(matches!(result, Err(ErrorKind::ReceivedDataTooShort { len: 10, min: 28 })));
    }

    #[test]
    fn test_flags_are_independent() {
        let mut packet = Packet::new(addr(1), addr(2), Verb::Nop);
        packet.set_fragmented(true);
        packet.increment_hops();
        packet.increment_hops();
        assert!(packet.is_fragmented());
        assert_eq!(packet.hops(), 2);
        packet.set_fragmented(false);
        assert!(!packet.is_fragmented());
        assert_eq!(packet.hops(), 2);
    }

    #[test]
    fn test_hops_wrap_within_three_bits() {
        let mut packet = Packet::new(addr(1), addr(2), Verb::Nop);
        for _ in 0..8 {
            packet.increment_hops();
        }
        assert_eq!(packet.hops(), 0);
    }

    #[test]
    fn test_verb_from_wire_byte() {
        assert!(matches!(Verb::try_from(0x02), Ok(Verb::Error)));
        // Upper bits carry flags and are ignored
        assert!(matches!(Verb::try_from(0xe6), Ok(Verb::Frame)));
        assert_eq!(Packet::new(addr(1), addr(2), Verb::Whois).raw_verb(), 0x04);
    }

    #[test]
    fn test_unknown_verb() {
        let mut bytes = Packet::new(addr(1), addr(2), Verb::Nop).into_bytes();
        bytes[IDX_VERB] = 0x1b;
        let packet = Packet::from_bytes(bytes).unwrap();
        assert!(matches!(packet.verb(), Err(ErrorKind::DecodingError(DecodingErrorKind::Verb))));
        assert_eq!(packet.raw_verb(), 0x1b);
    }

    #[test]
    fn test_reserved_source() {
        assert!(Packet::new(addr(1), addr(2), Verb::Nop).check_source().is_ok());
        for reserved in [0, 0xff00000001] {
            let packet = Packet::new(addr(1), addr(reserved), Verb::Nop);
            assert!(matches!(
                packet.check_source(),
                Err(ErrorKind::DecodingError(DecodingErrorKind::Address))
            ));
        }
    }

    #[test]
    fn test_split_small_packet_is_untouched() {
        let packet = Packet::new(addr(1), addr(2), Verb::Nop);
        let pieces = split_for_mtu(packet.as_bytes(), 1444).unwrap();
        assert_eq!(pieces, vec![packet.as_bytes().to_vec()]);
    }

    #[test]
    fn test_split_large_packet() {
        let mut packet = Packet::new(addr(0x0a0a0a0a0a), addr(2), Verb::Frame);
        packet.append(&vec![7u8; 250]);
        packet.set_fragmented(true);
        let bytes = packet.as_bytes().to_vec();

        let pieces = split_for_mtu(&bytes, 100).unwrap();
        // 278 bytes: head carries 100, tails carry 84 each -> 3 tails
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], bytes[..100].to_vec());

        let mut rebuilt = pieces[0].clone();
        for (i, piece) in pieces[1..].iter().enumerate() {
            let (header, payload) = Fragment::decode(piece).unwrap();
            assert_eq!(header.packet_id, packet.packet_id());
            assert_eq!(header.destination, addr(0x0a0a0a0a0a));
            assert_eq!(header.fragment_number as usize, i + 1);
            assert_eq!(header.total_fragments, 4);
            rebuilt.extend_from_slice(payload);
        }
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn test_split_refuses_too_many_fragments() {
        let mut packet = Packet::new(addr(1), addr(2), Verb::Frame);
        packet.append(&vec![0u8; 2000]);
        assert!(split_for_mtu(packet.as_bytes(), 64).is_none());
    }
}
