//! Stop-and-wait data transfer.
//!
//! A sender splits its buffer into segments of at most `max_segment_size` bytes, and transmits
//!  them one at a time, waiting for each segment's ACK before sending the next. A segment is
//!  retransmitted unchanged when its ACK does not arrive in time.
//!
//! A receiver accepts exactly the next sequence number. Duplicates of already delivered segments
//!  are acknowledged again but not delivered, which covers a lost ACK. Segments from further
//!  ahead can not be sent by a correct stop-and-wait peer and are dropped without
//!  acknowledgement.

use crate::connection::{Connection, Received};
use crate::error::RudpError;
use crate::packet_header::PacketFlags;
use crate::segment::Segment;
use crate::state::ConnectionState;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn, Instrument};

impl Connection {
    /// Reliably sends `buf`, returning the number of bytes sent - which is always `buf.len()`.
    ///  Every segment is acknowledged by the peer when this returns.
    ///
    /// If the peer starts closing the connection instead, this completes the passive side of
    ///  the teardown and returns [RudpError::ConnectionClosedByPeer].
    pub async fn send(&mut self, buf: &[u8]) -> Result<usize, RudpError> {
        let span = self.span.clone();
        let result = self.do_send(buf).instrument(span).await;
        self.finish_operation(result)
    }

    /// Waits for in-order data, returning at most `max_size` bytes. Bytes that do not fit are
    ///  kept for the next call.
    ///
    /// Returns [Received::EndOfStream] once the peer closed the connection and all its data was
    ///  returned, and on every call after that.
    pub async fn receive(&mut self, max_size: usize) -> Result<Received, RudpError> {
        let span = self.span.clone();
        let result = self.do_receive(max_size).instrument(span).await;
        self.finish_operation(result)
    }

    async fn do_send(&mut self, buf: &[u8]) -> Result<usize, RudpError> {
        self.require_state(ConnectionState::Established)?;

        if buf.is_empty() {
            return Ok(0);
        }

        for chunk in buf.chunks(self.config.max_segment_size) {
            self.send_sequence = self.send_sequence.wrapping_add(1);
            let segment = Segment::data(self.send_sequence, chunk);
            self.send_reliably(&segment).await?;
        }
        trace!("sent {} bytes", buf.len());
        Ok(buf.len())
    }

    async fn send_reliably(&mut self, segment: &Segment) -> Result<(), RudpError> {
        let policy = self.config.transfer_policy();

        self.send_segment(segment).await?;

        let mut num_retries = 0;
        let mut deadline = Instant::now() + policy.timeout;
        loop {
            match self.recv_segment(deadline).await? {
                None => {
                    if num_retries >= policy.max_retries {
                        return Err(self.fail(RudpError::TransferTimeout));
                    }
                    num_retries += 1;
                    warn!("no ACK for segment #{} - retransmitting ({}/{})", segment.sequence(), num_retries, policy.max_retries);
                    self.send_segment(segment).await?;
                    deadline = Instant::now() + policy.timeout;
                }
                Some((received, _)) => match received.flags() {
                    PacketFlags::Ack if received.sequence() == segment.sequence() => {
                        trace!("segment #{} acknowledged", segment.sequence());
                        return Ok(());
                    }
                    PacketFlags::Ack => {
                        debug!("waiting for ACK #{}, ignoring stale ACK #{}", segment.sequence(), received.sequence());
                    }
                    PacketFlags::Data => {
                        self.on_data_segment(received).await?;
                    }
                    PacketFlags::SynAck => {
                        self.on_stray_syn_ack().await?;
                    }
                    PacketFlags::Fin => {
                        info!("peer closed the connection while segment #{} was unacknowledged", segment.sequence());
                        self.respond_to_fin().await?;
                        return Err(RudpError::ConnectionClosedByPeer);
                    }
                    _ => {
                        debug!("waiting for ACK, ignoring {:?}", received);
                    }
                }
            }
        }
    }

    async fn do_receive(&mut self, max_size: usize) -> Result<Received, RudpError> {
        if max_size == 0 {
            return Err(RudpError::InvalidArgument("receive buffer size must be positive".to_string()));
        }

        if !self.undelivered.is_empty() {
            return Ok(Received::Data(self.take_undelivered(max_size)));
        }

        match self.state {
            ConnectionState::Established => {}
            ConnectionState::Closed if self.peer_closed => return Ok(Received::EndOfStream),
            state => return Err(RudpError::InvalidState(state)),
        }

        loop {
            let deadline = Instant::now() + self.config.idle_timeout;
            match self.recv_segment(deadline).await? {
                None => {
                    return Err(self.fail(RudpError::TransferTimeout));
                }
                Some((segment, _)) => match segment.flags() {
                    PacketFlags::Data => {
                        if self.on_data_segment(segment).await? {
                            return Ok(Received::Data(self.take_undelivered(max_size)));
                        }
                    }
                    PacketFlags::Fin => {
                        self.respond_to_fin().await?;
                        return Ok(Received::EndOfStream);
                    }
                    PacketFlags::SynAck => {
                        self.on_stray_syn_ack().await?;
                    }
                    _ => {
                        debug!("waiting for DATA, ignoring {:?}", segment);
                    }
                }
            }
        }
    }

    /// Handles a received DATA segment, returning `true` if its payload was accepted for
    ///  delivery
    pub(crate) async fn on_data_segment(&mut self, segment: Segment) -> Result<bool, RudpError> {
        let sequence = segment.sequence();

        if sequence == self.recv_sequence.wrapping_add(1) {
            self.send_control(PacketFlags::Ack, sequence).await?;
            self.recv_sequence = sequence;
            self.undelivered.extend(segment.payload);
            trace!("accepted segment #{}", sequence);
            return Ok(true);
        }

        if self.is_duplicate(sequence) {
            debug!("duplicate segment #{} - acknowledging again", sequence);
            self.send_control(PacketFlags::Ack, sequence).await?;
        }
        else {
            debug!("segment #{} is ahead of the expected #{} - dropping", sequence, self.recv_sequence.wrapping_add(1));
        }
        Ok(false)
    }

    /// sequence numbers are compared with wrap-around, like TCP's serial number arithmetic
    pub(crate) fn is_duplicate(&self, sequence: u32) -> bool {
        self.recv_sequence.wrapping_sub(sequence) < u32::MAX / 2
    }

    fn take_undelivered(&mut self, max_size: usize) -> Vec<u8> {
        let n = max_size.min(self.undelivered.len());
        self.undelivered.drain(..n).collect()
    }
}
