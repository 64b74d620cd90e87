//! Transport abstraction for pluggable outbound I/O.

use std::net::SocketAddr;

use crate::address::Address;

/// A physical path hint: the local socket a packet arrived on and the remote
/// endpoint it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Path {
    /// Opaque local socket handle supplied by the I/O layer.
    pub local_socket: i64,
    /// Remote physical endpoint.
    pub remote: SocketAddr,
}

impl Path {
    /// Creates a new path hint.
    pub fn new(local_socket: i64, remote: SocketAddr) -> Self {
        Self { local_socket, remote }
    }
}

/// Outbound datagram primitive.
///
/// This trait allows physical transports (UDP sockets, in-memory wiring for
/// tests, ...) to be plugged into the switch without coupling to a concrete
/// implementation. Payloads are already armored.
pub trait Transport: Send + Sync {
    /// Sends one datagram towards `destination`, optionally over `path`.
    ///
    /// Returns `false` when the transport could not accept the datagram.
    fn transmit(&self, destination: Address, path: Option<&Path>, payload: &[u8]) -> bool;
}
