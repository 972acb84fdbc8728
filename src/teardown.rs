//! Connection teardown: FIN / FIN_ACK / ACK.
//!
//! The initiator retransmits FIN until it sees FIN_ACK, and answers it with a final ACK. The
//!  responder retransmits FIN_ACK until it sees that ACK, answering duplicate FINs along the way.
//!  The final ACK is not acknowledged, so a responder that runs out of retries after having
//!  sent FIN_ACK considers the connection closed anyway.
//!
//! Both sides may initiate at the same time. Each of them then answers the other's FIN with
//!  FIN_ACK while waiting for its own, and both end up `Closed`.

use crate::connection::Connection;
use crate::error::RudpError;
use crate::packet_header::PacketFlags;
use crate::state::ConnectionState;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

impl Connection {
    /// Actively closes an established connection. Calling this on a connection that was
    ///  already closed through teardown has no effect.
    pub async fn close(&mut self) -> Result<(), RudpError> {
        let span = self.span.clone();
        let result = self.do_close().instrument(span).await;
        self.finish_operation(result)
    }

    /// Waits for the peer to close the connection, and completes the passive side of the
    ///  teardown. Data the peer sends before closing is buffered for `receive()`.
    pub async fn await_close(&mut self) -> Result<(), RudpError> {
        let span = self.span.clone();
        let result = self.do_await_close().instrument(span).await;
        self.finish_operation(result)
    }

    async fn do_close(&mut self) -> Result<(), RudpError> {
        match self.state {
            ConnectionState::Established => {}
            ConnectionState::Closed if self.is_released() => {
                debug!("connection is already closed");
                return Ok(());
            }
            state => return Err(RudpError::InvalidState(state)),
        }

        info!("closing connection to {:?}", self.peer_addr);
        self.transition(ConnectionState::FinWait);

        let policy = self.config.teardown_policy();
        self.send_control(PacketFlags::Fin, 0).await?;

        let mut peer_fin_received = false;
        let mut num_retries = 0;
        let mut deadline = Instant::now() + policy.timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => {
                    if num_retries >= policy.max_retries {
                        if peer_fin_received {
                            // simultaneous close, and the peer already has our FIN_ACK
                            warn!("no FIN_ACK after {} retries, but the peer closed as well - closing", policy.max_retries);
                            self.transition(ConnectionState::Closed);
                            return Ok(());
                        }
                        return Err(self.fail(RudpError::TeardownTimeout));
                    }
                    num_retries += 1;
                    warn!("no FIN_ACK - retransmitting FIN ({}/{})", num_retries, policy.max_retries);
                    self.send_control(PacketFlags::Fin, 0).await?;
                    deadline = Instant::now() + policy.timeout;
                }
                Some((segment, _)) => match segment.flags() {
                    PacketFlags::FinAck => {
                        self.send_control(PacketFlags::Ack, 0).await?;
                        self.transition(ConnectionState::Closed);
                        info!("connection closed");
                        return Ok(());
                    }
                    PacketFlags::Fin => {
                        debug!("peer is closing as well - sending FIN_ACK");
                        peer_fin_received = true;
                        self.peer_closed = true;
                        self.send_control(PacketFlags::FinAck, 0).await?;
                    }
                    PacketFlags::Data => {
                        self.on_data_while_closing(segment.sequence()).await?;
                    }
                    PacketFlags::SynAck => {
                        self.on_stray_syn_ack().await?;
                    }
                    _ => {
                        debug!("waiting for FIN_ACK, ignoring {:?}", segment);
                    }
                }
            }
        }
    }

    async fn do_await_close(&mut self) -> Result<(), RudpError> {
        match self.state {
            ConnectionState::Established => {}
            ConnectionState::Closed if self.peer_closed => return Ok(()),
            state => return Err(RudpError::InvalidState(state)),
        }

        let deadline = Instant::now() + self.config.idle_timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => return Err(self.fail(RudpError::TeardownTimeout)),
                Some((segment, _)) => match segment.flags() {
                    PacketFlags::Fin => return self.respond_to_fin().await,
                    PacketFlags::Data => {
                        self.on_data_segment(segment).await?;
                    }
                    PacketFlags::SynAck => {
                        self.on_stray_syn_ack().await?;
                    }
                    _ => {
                        debug!("waiting for FIN, ignoring {:?}", segment);
                    }
                }
            }
        }
    }

    /// The passive side of the teardown, after a FIN was received in `Established`
    pub(crate) async fn respond_to_fin(&mut self) -> Result<(), RudpError> {
        info!("peer {:?} closed the connection", self.peer_addr);
        self.peer_closed = true;
        self.transition(ConnectionState::CloseWait);

        let policy = self.config.teardown_policy();
        self.send_control(PacketFlags::FinAck, 0).await?;

        let mut num_retries = 0;
        let mut deadline = Instant::now() + policy.timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => {
                    if num_retries >= policy.max_retries {
                        warn!("no ACK for FIN_ACK after {} retries - closing anyway", policy.max_retries);
                        self.transition(ConnectionState::Closed);
                        return Ok(());
                    }
                    num_retries += 1;
                    warn!("no ACK for FIN_ACK - retransmitting ({}/{})", num_retries, policy.max_retries);
                    self.send_control(PacketFlags::FinAck, 0).await?;
                    deadline = Instant::now() + policy.timeout;
                }
                Some((segment, _)) => match segment.flags() {
                    PacketFlags::Ack if segment.sequence() == 0 => {
                        self.transition(ConnectionState::Closed);
                        info!("connection closed");
                        return Ok(());
                    }
                    PacketFlags::Ack => {
                        debug!("waiting for the final ACK, ignoring stale ACK #{}", segment.sequence());
                    }
                    PacketFlags::Fin => {
                        debug!("duplicate FIN - retransmitting FIN_ACK");
                        self.send_control(PacketFlags::FinAck, 0).await?;
                    }
                    PacketFlags::Data => {
                        self.on_data_while_closing(segment.sequence()).await?;
                    }
                    _ => {
                        debug!("waiting for ACK, ignoring {:?}", segment);
                    }
                }
            }
        }
    }

    /// Once teardown started, there is nobody left to deliver new data to. A duplicate is still
    ///  acknowledged, since the peer may be waiting for that ACK before it sees our FIN.
    async fn on_data_while_closing(&mut self, sequence: u32) -> Result<(), RudpError> {
        if self.is_duplicate(sequence) {
            debug!("duplicate segment #{} during teardown - acknowledging again", sequence);
            self.send_control(PacketFlags::Ack, sequence).await
        }
        else {
            debug!("segment #{} during teardown - dropping", sequence);
            Ok(())
        }
    }
}
