//! Connection establishment: a three-way SYN / SYN_ACK / ACK exchange.
//!
//! The dialer retransmits its SYN until it sees a SYN_ACK, the listener retransmits its SYN_ACK
//!  until it sees the final ACK. The final ACK itself is never acknowledged: if it is lost, the
//!  listener's retransmitted SYN_ACK triggers another one, and the dialer's first DATA packet
//!  completes the handshake implicitly.

use crate::connection::Connection;
use crate::error::RudpError;
use crate::packet_header::PacketFlags;
use crate::segment::Segment;
use crate::state::{ConnectionState, Role};
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

impl Connection {
    /// Active open: sends SYN to `peer_addr` and waits for the SYN_ACK, retransmitting on
    ///  timeout. Returns once the connection is `Established`.
    pub async fn connect(&mut self, peer_addr: SocketAddr) -> Result<(), RudpError> {
        let span = self.span.clone();
        let result = self.do_connect(peer_addr).instrument(span).await;
        self.finish_operation(result)
    }

    /// Passive open: waits for a SYN from any address, adopts the sender as the peer and
    ///  completes the handshake with it.
    pub async fn accept(&mut self) -> Result<(), RudpError> {
        let span = self.span.clone();
        let result = self.do_accept().instrument(span).await;
        self.finish_operation(result)
    }

    async fn do_connect(&mut self, peer_addr: SocketAddr) -> Result<(), RudpError> {
        if self.role != Role::Dialer {
            return Err(RudpError::InvalidArgument("only a dialer can connect".to_string()));
        }
        self.require_state(ConnectionState::Closed)?;

        info!("connecting to {:?}", peer_addr);
        self.peer_addr = Some(peer_addr);
        self.transition(ConnectionState::SynSent);

        let policy = self.config.handshake_policy();
        let syn = Segment::control(PacketFlags::Syn, 0);
        self.send_segment(&syn).await?;

        let mut num_retries = 0;
        let mut deadline = Instant::now() + policy.timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => {
                    if num_retries >= policy.max_retries {
                        return Err(self.fail(RudpError::HandshakeTimeout));
                    }
                    num_retries += 1;
                    warn!("no SYN_ACK from {:?} - retransmitting SYN ({}/{})", peer_addr, num_retries, policy.max_retries);
                    self.send_segment(&syn).await?;
                    deadline = Instant::now() + policy.timeout;
                }
                Some((segment, _)) if segment.flags() == PacketFlags::SynAck => {
                    self.send_control(PacketFlags::Ack, 0).await?;
                    self.establish();
                    return Ok(());
                }
                Some((segment, _)) => {
                    debug!("waiting for SYN_ACK, ignoring {:?}", segment);
                }
            }
        }
    }

    async fn do_accept(&mut self) -> Result<(), RudpError> {
        if self.role != Role::Listener {
            return Err(RudpError::InvalidArgument("only a listener can accept".to_string()));
        }
        self.require_state(ConnectionState::Closed)?;

        self.transition(ConnectionState::Listening);
        info!("waiting for SYN on {:?}", self.local_addr);

        let deadline = Instant::now() + self.config.accept_timeout;
        let peer_addr = loop {
            match self.recv_segment(deadline).await? {
                None => return Err(self.fail(RudpError::HandshakeTimeout)),
                Some((segment, from)) if segment.flags() == PacketFlags::Syn => break from,
                Some((segment, from)) => {
                    debug!("waiting for SYN, ignoring {:?} from {:?}", segment, from);
                }
            }
        };

        debug!("received SYN from {:?}", peer_addr);
        self.peer_addr = Some(peer_addr);
        self.transition(ConnectionState::SynReceived);

        let policy = self.config.handshake_policy();
        let syn_ack = Segment::control(PacketFlags::SynAck, 0);
        self.send_segment(&syn_ack).await?;

        let mut num_retries = 0;
        let mut deadline = Instant::now() + policy.timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => {
                    if num_retries >= policy.max_retries {
                        return Err(self.fail(RudpError::HandshakeTimeout));
                    }
                    num_retries += 1;
                    warn!("no ACK from {:?} - retransmitting SYN_ACK ({}/{})", peer_addr, num_retries, policy.max_retries);
                    self.send_segment(&syn_ack).await?;
                    deadline = Instant::now() + policy.timeout;
                }
                Some((segment, _)) => match segment.flags() {
                    PacketFlags::Ack => {
                        self.establish();
                        return Ok(());
                    }
                    PacketFlags::Syn => {
                        // our SYN_ACK was lost, and the dialer retransmitted its SYN
                        debug!("duplicate SYN - retransmitting SYN_ACK");
                        self.send_segment(&syn_ack).await?;
                    }
                    PacketFlags::Data => {
                        debug!("DATA before the handshake's ACK - treating it as implicit ACK");
                        self.establish();
                        self.pending_segment = Some(segment);
                        return Ok(());
                    }
                    _ => {
                        debug!("waiting for ACK, ignoring {:?}", segment);
                    }
                }
            }
        }
    }
}
