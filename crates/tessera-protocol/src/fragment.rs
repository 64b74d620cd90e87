//! Tail fragments of packets that exceed the physical MTU.
//!
//! Wire layout of a fragment:
//!
//! | bytes    | field                                                  |
//! |----------|--------------------------------------------------------|
//! | `0..8`   | packet id (shared with the head)                       |
//! | `8..13`  | destination address                                    |
//! | `13`     | fragment indicator, always `0xff`                      |
//! | `14`     | total fragments (high nibble), fragment number (low)   |
//! | `15`     | hops                                                   |
//! | `16..`   | payload                                                |
//!
//! Fragment number 0 is never sent as a fragment: it is the head, a normal
//! packet with the fragmented flag set.

use byteorder::{BigEndian, ByteOrder};
use tessera_core::{
    constants::MAX_PACKET_FRAGMENTS,
    error::{DecodingErrorKind, ErrorKind, Result},
    Address,
};

use crate::packet::{increment_hops_at, read_address, MAX_HOPS};

const IDX_PACKET_ID: usize = 0;
const IDX_DESTINATION: usize = 8;
const IDX_INDICATOR: usize = 13;
const IDX_COUNTS: usize = 14;
const IDX_HOPS: usize = 15;
/// Length of the fragment header.
pub const FRAGMENT_HEADER_LENGTH: usize = 16;
/// Value of the fragment indicator byte.
pub const FRAGMENT_INDICATOR: u8 = 0xff;

/// Decoded fragment header fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Id of the packet this fragment belongs to.
    pub packet_id: u64,
    /// Destination of the whole packet.
    pub destination: Address,
    /// Index of this fragment, `1..total_fragments`.
    pub fragment_number: u8,
    /// Number of pieces the packet was split into, head included.
    pub total_fragments: u8,
    /// Hop counter, masked to its low 3 bits.
    pub hops: u8,
}

/// An owned, encoded fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    data: Vec<u8>,
}

impl Fragment {
    /// Encodes a fragment carrying `payload`.
    pub fn new(
        packet_id: u64,
        destination: Address,
        fragment_number: u8,
        total_fragments: u8,
        payload: &[u8],
    ) -> Self {
        let mut data = Vec::with_capacity(FRAGMENT_HEADER_LENGTH + payload.len());
        data.resize(FRAGMENT_HEADER_LENGTH, 0);
        BigEndian::write_u64(&mut data[IDX_PACKET_ID..IDX_DESTINATION], packet_id);
        data[IDX_DESTINATION..IDX_INDICATOR].copy_from_slice(&destination.to_bytes());
        data[IDX_INDICATOR] = FRAGMENT_INDICATOR;
        data[IDX_COUNTS] = ((total_fragments & 0x0f) << 4) | (fragment_number & 0x0f);
        data.extend_from_slice(payload);
        Self { data }
    }

    /// True if `bytes` is shaped like a fragment rather than a packet.
    pub fn is_fragment(bytes: &[u8]) -> bool {
        bytes.len() > FRAGMENT_HEADER_LENGTH && bytes[IDX_INDICATOR] == FRAGMENT_INDICATOR
    }

    /// Decodes a fragment header and returns it with the payload slice.
    ///
    /// Fragment number and total are validated against
    /// [`MAX_PACKET_FRAGMENTS`]: the total must be at least 2 and the number
    /// must lie in `1..total`.
    pub fn decode(bytes: &[u8]) -> Result<(FragmentHeader, &[u8])> {
        if bytes.len() <= FRAGMENT_HEADER_LENGTH {
            return Err(ErrorKind::ReceivedDataTooShort {
                len: bytes.len(),
                min: FRAGMENT_HEADER_LENGTH + 1,
            });
        }
        if bytes[IDX_INDICATOR] != FRAGMENT_INDICATOR {
            return Err(DecodingErrorKind::FragmentIndicator.into());
        }

        let total_fragments = bytes[IDX_COUNTS] >> 4;
        let fragment_number = bytes[IDX_COUNTS] & 0x0f;
        if total_fragments < 2
            || total_fragments as usize > MAX_PACKET_FRAGMENTS
            || fragment_number == 0
            || fragment_number >= total_fragments
        {
            return Err(DecodingErrorKind::FragmentCount.into());
        }

        let header = FragmentHeader {
            packet_id: BigEndian::read_u64(&bytes[IDX_PACKET_ID..IDX_DESTINATION]),
            destination: read_address(&bytes[IDX_DESTINATION..]),
            fragment_number,
            total_fragments,
            hops: bytes[IDX_HOPS] & MAX_HOPS,
        };
        Ok((header, &bytes[FRAGMENT_HEADER_LENGTH..]))
    }

    /// Increments the hop counter of raw fragment bytes, returning the new count.
    pub fn increment_raw_hops(bytes: &mut [u8]) -> Option<u8> {
        if bytes.len() <= FRAGMENT_HEADER_LENGTH {
            return None;
        }
        increment_hops_at(bytes, IDX_HOPS);
        Some(bytes[IDX_HOPS] & MAX_HOPS)
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the fragment, returning its encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
