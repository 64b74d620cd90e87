//! Certificates of membership.
//!
//! A certificate is a sorted set of qualifiers, each an `(id, value,
//! max_delta)` tuple, signed by the network's controller. Two members may
//! talk on a private network when their certificates agree: every qualifier
//! of one certificate is present in the other with a value no further away
//! than its `max_delta`. The timestamp qualifier is what makes old
//! certificates stop agreeing with fresh ones.

use byteorder::{BigEndian, ByteOrder};
use tessera_core::{
    cipher::{Signer, Verifier},
    Address, Identity, NetworkId,
};

/// Maximum number of qualifiers in one certificate.
pub const MAX_QUALIFIERS: usize = 8;

/// Reserved qualifier ids.
pub mod qualifier {
    /// Issue time, in milliseconds; its max delta is the validity window.
    pub const TIMESTAMP: u64 = 0;
    /// Network the certificate is for.
    pub const NETWORK_ID: u64 = 1;
    /// Member the certificate was issued to.
    pub const ISSUED_TO: u64 = 2;
}

/// One `(id, value, max_delta)` tuple.
///
/// Ordered by id first, which is the order qualifiers are kept in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qualifier {
    /// Qualifier id.
    pub id: u64,
    /// Value of the qualifier.
    pub value: u64,
    /// Largest difference from another certificate's value still agreed with.
    pub max_delta: u64,
}

/// A controller-signed membership credential.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateOfMembership {
    qualifiers: Vec<Qualifier>,
    signed_by: Option<Address>,
    signature: Vec<u8>,
}

impl CertificateOfMembership {
    /// Creates an unsigned certificate with the reserved qualifiers set.
    ///
    /// The issued-to qualifier agrees with any member.
    pub fn new(timestamp: u64, timestamp_max_delta: u64, network: NetworkId, issued_to: Address) -> Self {
        let mut com = Self::default();
        com.set_qualifier(qualifier::TIMESTAMP, timestamp, timestamp_max_delta);
        com.set_qualifier(qualifier::NETWORK_ID, network.as_u64(), 0);
        com.set_qualifier(qualifier::ISSUED_TO, issued_to.as_u64(), u64::MAX);
        com
    }

    /// Adds or replaces a qualifier and drops any signature.
    ///
    /// Returns false, leaving the qualifiers untouched, if `id` is new and the
    /// certificate already holds [`MAX_QUALIFIERS`].
    pub fn set_qualifier(&mut self, id: u64, value: u64, max_delta: u64) -> bool {
        self.signed_by = None;
        self.signature.clear();

        match self.qualifiers.binary_search_by_key(&id, |q| q.id) {
            Ok(index) => {
                self.qualifiers[index].value = value;
                self.qualifiers[index].max_delta = max_delta;
                true
            }
            Err(_) if self.qualifiers.len() >= MAX_QUALIFIERS => false,
            Err(index) => {
                self.qualifiers.insert(index, Qualifier { id, value, max_delta });
                true
            }
        }
    }

    /// Returns the qualifier with `id`.
    pub fn qualifier(&self, id: u64) -> Option<&Qualifier> {
        self.qualifiers.binary_search_by_key(&id, |q| q.id).ok().map(|index| &self.qualifiers[index])
    }

    /// Returns all qualifiers, sorted by id.
    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    /// Issue timestamp.
    pub fn timestamp(&self) -> Option<u64> {
        self.qualifier(qualifier::TIMESTAMP).map(|q| q.value)
    }

    /// Network the certificate is for.
    pub fn network_id(&self) -> Option<NetworkId> {
        self.qualifier(qualifier::NETWORK_ID).map(|q| NetworkId::new(q.value))
    }

    /// Member the certificate was issued to.
    pub fn issued_to(&self) -> Option<Address> {
        self.qualifier(qualifier::ISSUED_TO).map(|q| Address::new(q.value))
    }

    /// True if every qualifier of ours is present in `other` within our max delta.
    ///
    /// An empty certificate agrees with nothing. Qualifiers `other` has and we
    /// lack are ignored.
    pub fn agrees_with(&self, other: &CertificateOfMembership) -> bool {
        if self.qualifiers.is_empty() || other.qualifiers.is_empty() {
            return false;
        }

        let mut theirs = other.qualifiers.iter();
        self.qualifiers.iter().all(|mine| match theirs.find(|q| q.id >= mine.id) {
            Some(q) if q.id == mine.id => mine.value.abs_diff(q.value) <= mine.max_delta,
            _ => false,
        })
    }

    /// Address of the signer, if signed.
    pub fn signed_by(&self) -> Option<Address> {
        self.signed_by
    }

    /// True if the certificate carries a signature.
    pub fn is_signed(&self) -> bool {
        self.signed_by.is_some()
    }

    /// The signature bytes; empty when unsigned.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Bytes covered by the signature: each qualifier as three big endian u64s.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.qualifiers.len() * 24];
        for (q, chunk) in self.qualifiers.iter().zip(bytes.chunks_exact_mut(24)) {
            BigEndian::write_u64(&mut chunk[0..8], q.id);
            BigEndian::write_u64(&mut chunk[8..16], q.value);
            BigEndian::write_u64(&mut chunk[16..24], q.max_delta);
        }
        bytes
    }

    /// Signs the qualifiers. On failure the certificate is left unsigned.
    pub fn sign(&mut self, signer: &dyn Signer) -> bool {
        match signer.sign(&self.signing_bytes()) {
            Some(signature) => {
                self.signed_by = Some(signer.address());
                self.signature = signature;
                true
            }
            None => {
                self.signed_by = None;
                self.signature.clear();
                false
            }
        }
    }

    /// True if the certificate was signed by its network's `controller`.
    pub fn verify(&self, controller: &Identity, verifier: &dyn Verifier) -> bool {
        let Some(network) = self.network_id() else {
            return false;
        };
        self.signed_by == Some(controller.address())
            && network.controller() == controller.address()
            && verifier.verify(controller, &self.signing_bytes(), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: NetworkId = NetworkId::new(0x8056c2e21c000001);
    const MEMBER: Address = Address::new(0x0102030405);

    /// "Signs" by prefixing the signer's address to a checksum of the message.
    struct SumKey(Address);

    fn checksum(message: &[u8]) -> u8 {
        message.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    impl Signer for SumKey {
        fn address(&self) -> Address {
            self.0
        }

        fn sign(&self, message: &[u8]) -> Option<Vec<u8>> {
            let mut signature = self.0.to_bytes().to_vec();
            signature.push(checksum(message));
            Some(signature)
        }
    }

    impl Verifier for SumKey {
        fn verify(&self, signer: &Identity, message: &[u8], signature: &[u8]) -> bool {
            signature.len() == 6 && signature[..5] == signer.address().to_bytes() && signature[5] == checksum(message)
        }
    }

    struct NoKey;

    impl Signer for NoKey {
        fn address(&self) -> Address {
            Address::new(9)
        }

        fn sign(&self, _message: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn test_reserved_qualifiers() {
        let com = CertificateOfMembership::new(1000, 100, NETWORK, MEMBER);
        assert_eq!(com.timestamp(), Some(1000));
        assert_eq!(com.network_id(), Some(NETWORK));
        assert_eq!(com.issued_to(), Some(MEMBER));
        assert!(!com.is_signed());
    }

    #[test]
    fn test_qualifiers_stay_sorted_and_bounded() {
        let mut com = CertificateOfMembership::default();
        for id in [9u64, 3, 7, 1] {
            assert!(com.set_qualifier(id, id * 10, 0));
        }
        assert!(com.set_qualifier(3, 31, 2));
        let ids: Vec<u64> = com.qualifiers().iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![1, 3, 7, 9]);
        assert_eq!(com.qualifier(3), Some(&Qualifier { id: 3, value: 31, max_delta: 2 }));

        for id in 10..14 {
            assert!(com.set_qualifier(id, 0, 0));
        }
        assert_eq!(com.qualifiers().len(), MAX_QUALIFIERS);
        assert!(!com.set_qualifier(100, 0, 0));
        assert!(com.set_qualifier(9, 1, 1));
        assert_eq!(com.qualifiers().len(), MAX_QUALIFIERS);
    }

    #[test]
    fn test_agreement_within_max_delta() {
        let ours = CertificateOfMembership::new(1000, 100, NETWORK, MEMBER);
        let fresh = CertificateOfMembership::new(1080, 100, NETWORK, Address::new(7));
        let stale = CertificateOfMembership::new(800, 100, NETWORK, Address::new(7));
        let elsewhere = CertificateOfMembership::new(1000, 100, NetworkId::new(5), Address::new(7));

        assert!(ours.agrees_with(&fresh));
        assert!(fresh.agrees_with(&ours));
        assert!(!ours.agrees_with(&stale));
        assert!(!ours.agrees_with(&elsewhere));
        assert!(!ours.agrees_with(&CertificateOfMembership::default()));
        assert!(!CertificateOfMembership::default().agrees_with(&ours));
    }

    #[test]
    fn test_agreement_needs_every_qualifier() {
        let mut ours = CertificateOfMembership::new(1000, 100, NETWORK, MEMBER);
        let mut theirs = CertificateOfMembership::new(1000, 100, NETWORK, Address::new(7));
        theirs.set_qualifier(40, 5, 0);
        assert!(ours.agrees_with(&theirs));

        ours.set_qualifier(20, 5, 0);
        assert!(!ours.agrees_with(&theirs));
        theirs.set_qualifier(20, 6, 0);
        assert!(!ours.agrees_with(&theirs));
        theirs.set_qualifier(20, 5, 0);
        assert!(ours.agrees_with(&theirs));
    }

    #[test]
    fn test_sign_and_verify() {
        let controller = Identity::new(NETWORK.controller(), vec![1, 2, 3]);
        let key = SumKey(controller.address());
        let mut com = CertificateOfMembership::new(1000, 100, NETWORK, MEMBER);

        assert!(com.sign(&key));
        assert_eq!(com.signed_by(), Some(controller.address()));
        assert!(com.verify(&controller, &key));

        let impostor = Identity::new(Address::new(0x0a0a0a0a0a), vec![9]);
        assert!(!com.verify(&impostor, &SumKey(impostor.address())));

        // Changing a qualifier invalidates the signature
        com.set_qualifier(qualifier::TIMESTAMP, 2000, 100);
        assert!(!com.is_signed());
        assert!(com.signature().is_empty());
        assert!(!com.verify(&controller, &key));
    }

    #[test]
    fn test_failed_signing_leaves_unsigned() {
        let mut com = CertificateOfMembership::new(1000, 100, NETWORK, MEMBER);
        assert!(com.sign(&SumKey(NETWORK.controller())));
        assert!(!com.sign(&NoKey));
        assert!(!com.is_signed());
    }

    #[test]
    fn test_signing_bytes_layout() {
        let com = CertificateOfMembership::new(0x1122, 0x33, NETWORK, MEMBER);
        let bytes = com.signing_bytes();
        assert_eq!(bytes.len(), 72);
        assert_eq!(BigEndian::read_u64(&bytes[8..16]), 0x1122);
        assert_eq!(BigEndian::read_u64(&bytes[16..24]), 0x33);
        assert_eq!(BigEndian::read_u64(&bytes[24..32]), qualifier::NETWORK_ID);
        assert_eq!(BigEndian::read_u64(&bytes[56..64]), MEMBER.as_u64());
    }
}
