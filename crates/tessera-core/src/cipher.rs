//! Cryptographic capabilities the switching core borrows from the node.
//!
//! The switching core never implements cryptography itself. Queued packets are
//! kept unencrypted and handed to a [`Cipher`] right before they reach the
//! transport, keyed by the destination peer's identity. Credentials such as
//! certificates of membership are signed through a [`Signer`] and checked
//! through a [`Verifier`].

use crate::address::{Address, Identity};

/// Armors (encrypts and/or authenticates) an outbound packet for one peer.
///
/// Armoring happens in place and never changes the packet length: the
/// authentication code goes into the header's MAC field. Fragmentation is
/// decided from the unarmored length, so a cipher that needs more room must
/// be given it by the protocol layer before the packet is queued.
///
/// # Examples
/// ```
/// use tessera_core::{cipher::Cipher, Address, Identity};
///
/// struct CountingCipher;
///
/// impl Cipher for CountingCipher {
///     fn armor(&self, _peer: &Identity, packet: &mut [u8], _encrypt: bool) -> bool {
///         println!("Armoring {} bytes", packet.len());
///         true // Continue sending
///     }
/// }
///
/// let peer = Identity::new(Address::new(0x0102030405), vec![0u8; 32]);
/// let mut packet = vec![1, 2, 3];
/// assert!(CountingCipher.armor(&peer, &mut packet, true));
/// ```
pub trait Cipher: Send + Sync {
    /// Armors `packet` in place for `peer`.
    ///
    /// # Arguments
    /// * `peer` - The identity of the destination peer
    /// * `packet` - The full packet bytes, header included (fixed length)
    /// * `encrypt` - Whether the payload should be encrypted or only authenticated
    ///
    /// # Returns
    /// * `true` - The packet is ready to transmit
    /// * `false` - Drop the packet (do not send)
    fn armor(&self, peer: &Identity, packet: &mut [u8], encrypt: bool) -> bool;
}

/// Cipher that leaves packets untouched.
///
/// Useful for tests and for transports that are already secured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl Cipher for PlaintextCipher {
    fn armor(&self, _peer: &Identity, _packet: &mut [u8], _encrypt: bool) -> bool {
        true
    }
}

/// Signs credentials with a local secret key.
pub trait Signer: Send + Sync {
    /// Address of the signing identity.
    fn address(&self) -> Address;

    /// Signs `message`; `None` if the key cannot sign.
    fn sign(&self, message: &[u8]) -> Option<Vec<u8>>;
}

/// Checks signatures made by other identities.
pub trait Verifier: Send + Sync {
    /// True if `signature` over `message` was made by `signer`.
    fn verify(&self, signer: &Identity, message: &[u8], signature: &[u8]) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Identity {
        Identity::new(Address::new(0x0a0b0c0d0e), vec![0x55; 4])
    }

    struct XorCipher;

    impl Cipher for XorCipher {
        fn armor(&self, peer: &Identity, packet: &mut [u8], encrypt: bool) -> bool {
            if encrypt {
                let key = peer.public_key();
                for (i, byte) in packet.iter_mut().enumerate() {
                    *byte ^= key[i % key.len()];
                }
            }
            true
        }
    }

    struct RefusingCipher;

    impl Cipher for RefusingCipher {
        fn armor(&self, _peer: &Identity, _packet: &mut [u8], _encrypt: bool) -> bool {
            false
        }
    }

    #[test]
    fn test_plaintext_cipher() {
        let mut data = vec![1, 2, 3];
        let original = data.clone();
        assert!(PlaintextCipher.armor(&peer(), &mut data, true));
        assert_eq!(data, original);
    }

    #[test]
    fn test_modifying_cipher_respects_encrypt_flag() {
        let mut data = vec![0xAA, 0xBB, 0xCC];
        let original = data.clone();

        assert!(XorCipher.armor(&peer(), &mut data, false));
        assert_eq!(data, original);

        assert!(XorCipher.armor(&peer(), &mut data, true));
        assert_ne!(data, original);

        assert!(XorCipher.armor(&peer(), &mut data, true));
        assert_eq!(data, original);
    }

    #[test]
    fn test_refusing_cipher() {
        let mut data = vec![1, 2, 3];
        assert!(!RefusingCipher.armor(&peer(), &mut data, true));
    }
}
