//! RUDP is a minimal reliable transport layered on UDP. It provides a single connection between
//!  two endpoints with connection setup, in-order exactly-once delivery of a byte stream and
//!  orderly teardown.
//!
//! ## Design goals
//!
//! * One connection per socket, between a *listener* and a *dialer*
//!   * the listener learns its peer's address from the first SYN, and ignores everybody else
//!     afterwards
//! * Stop-and-wait: at most one unacknowledged DATA packet in flight per direction
//!   * no windowing, congestion control or selective acknowledgement
//!   * retransmission after a fixed per-phase timeout, with a bounded number of retries
//! * Data is delivered in order and exactly once, despite loss, duplication and corruption of
//!   datagrams
//! * Every packet is protected by a checksum. Packets that fail validation are dropped silently,
//!   relying on the peer's retransmission.
//! * Datagrams are never fragmented by the protocol: buffers are split into segments that fit
//!   into a single UDP payload of configurable size
//! * Every operation is bounded in time, failing with a typed error when the peer does not
//!   respond
//!
//! ## Header
//!
//! Packet header - all numbers in network byte order (BE):
//! ```ascii
//! 0: flags (u8): the kind of packet - exactly one per packet
//!     * 1 SYN
//!     * 2 SYN_ACK
//!     * 3 ACK
//!     * 4 FIN
//!     * 5 FIN_ACK
//!     * 6 DATA
//! 1: sequence number (u32): the DATA segment's sequence number, or the acknowledged
//!     sequence number in an ACK for a DATA segment. 0 in all other packets.
//! 5: payload length (u32): 0 for all control packets, positive for DATA
//! 9: checksum (u16)
//! ```
//!
//! The checksum is the 16-bit one's complement of the one's complement sum of all 16-bit words
//!  of header and payload, with the checksum field set to zero while it is calculated. A
//!  trailing odd byte is padded with a zero byte.
//!
//! ## Sequence numbers
//!
//! Sequence numbers are scoped to a connection and to a direction: both start at 0 when the
//!  connection is established, and the first DATA segment has sequence number 1. Sending
//!  increments the number once per segment, and wraps around after `u32::MAX`.
//!
//! ## Handshake
//!
//! ```ascii
//! dialer                     listener
//!    --- SYN ------------------->
//!    <-------------- SYN_ACK ---
//!    --- ACK ------------------>
//! ```
//!
//! The final ACK is not acknowledged. The listener also accepts a DATA packet in its place.
//!
//! ## Teardown
//!
//! Either side can initiate, and both sides can initiate at the same time:
//! ```ascii
//! initiator                  responder
//!    --- FIN ------------------>
//!    <-------------- FIN_ACK ---
//!    --- ACK ------------------>
//! ```

pub mod checksum;
pub mod config;
pub mod connection;
pub mod datagram_socket;
pub mod error;
mod handshake;
pub mod packet_header;
pub mod segment;
pub mod state;
mod teardown;
pub mod test_util;
mod transfer;
pub mod util;

pub use config::RudpConfig;
pub use connection::{Connection, Received};
pub use error::RudpError;
pub use state::{ConnectionState, Role};
