//! Error types shared across the workspace.
//!
//! Almost every failure in the switching core is absorbed locally (dropped and
//! counted). Only wire decoding failures and rejections that come from the
//! configuration authority surface as `Err`.

use thiserror::Error;

use crate::address::NetworkId;

/// Wire field that failed to decode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// Unknown packet verb.
    #[error("unknown verb")]
    Verb,
    /// Fragment indicator byte was not set.
    #[error("missing fragment indicator")]
    FragmentIndicator,
    /// Fragment number or total fragment count out of range.
    #[error("fragment number or count out of range")]
    FragmentCount,
    /// A peer address field held a reserved value.
    #[error("reserved address")]
    Address,
}

/// Errors returned by the switching core.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A wire field could not be decoded.
    #[error("could not decode packet: {0}")]
    DecodingError(DecodingErrorKind),
    /// Received bytes were shorter than the minimum for their kind.
    #[error("received {len} bytes, need at least {min}")]
    ReceivedDataTooShort {
        /// Bytes received.
        len: usize,
        /// Minimum required.
        min: usize,
    },
    /// The configuration authority does not know this network.
    #[error("network {0} is not known to the configuration authority")]
    UnknownNetwork(NetworkId),
}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(kind: DecodingErrorKind) -> Self {
        ErrorKind::DecodingError(kind)
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ErrorKind::UnknownNetwork(NetworkId::new(0xabcd));
        assert_eq!(
            err.to_string(),
            "network 000000000000abcd is not known to the configuration authority"
        );

        let err = ErrorKind::ReceivedDataTooShort { len: 3, min: 28 };
        assert_eq!(err.to_string(), "received 3 bytes, need at least 28");

        let err: ErrorKind = DecodingErrorKind::Verb.into();
        assert_eq!(err.to_string(), "could not decode packet: unknown verb");
    }
}
