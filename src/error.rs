use std::io;
use crate::state::ConnectionState;

/// Errors surfaced by connection operations.
///
/// Corrupted or malformed packets are not in this list: they are dropped where they are received
///  (see [crate::segment::PacketError]) and recovered by the peer's retransmission.
#[derive(Debug, thiserror::Error)]
pub enum RudpError {
    /// the underlying datagram socket could not be created or bound
    #[error("could not allocate datagram socket: {0}")]
    Allocation(#[source] io::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("segment transfer timed out")]
    TransferTimeout,
    #[error("teardown timed out")]
    TeardownTimeout,
    #[error("connection closed by peer")]
    ConnectionClosedByPeer,
    #[error("operation is not allowed in connection state {0}")]
    InvalidState(ConnectionState),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RudpError {
    /// Maps socket errors that signal an unreachable / vanished peer to
    ///  [RudpError::ConnectionClosedByPeer]
    pub fn from_socket_error(e: io::Error) -> RudpError {
        match e.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => RudpError::ConnectionClosedByPeer,
            _ => RudpError::Io(e),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RudpError::HandshakeTimeout | RudpError::TransferTimeout | RudpError::TeardownTimeout)
    }
}
