use crate::config::RudpConfig;
use crate::datagram_socket::{bind_udp, DatagramSocket};
use crate::error::RudpError;
use crate::packet_header::PacketFlags;
use crate::segment::Segment;
use crate::state::{ConnectionState, Role};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, span, trace, warn, Level, Span};
use uuid::Uuid;

/// The result of a successful `receive()` call
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Received {
    /// bytes delivered in order, exactly once - at least one and at most the requested number
    Data(Vec<u8>),
    /// the peer closed the connection, and all data it sent was delivered
    EndOfStream,
}

/// A reliable, stop-and-wait channel to a single peer over an unreliable datagram socket.
///
/// All operations take `&mut self`: a connection is driven by a single thread of control at a
///  time, and its mutable state needs no synchronization. Every operation waits for the peer
///  with a bounded timeout, and gives up with a typed error when its retry budget is exhausted,
///  moving the connection to [ConnectionState::Errored].
///
/// The socket is owned exclusively by the connection and released (dropped) exactly once, when
///  the connection reaches its terminal state.
pub struct Connection {
    pub(crate) correlation_id: Uuid,
    pub(crate) span: Span,
    pub(crate) config: Arc<RudpConfig>,
    pub(crate) role: Role,
    pub(crate) state: ConnectionState,
    pub(crate) socket: Option<Box<dyn DatagramSocket>>,
    pub(crate) local_addr: SocketAddr,
    /// learned during the handshake, immutable afterwards
    pub(crate) peer_addr: Option<SocketAddr>,

    /// the sequence number of the last DATA segment that was sent
    pub(crate) send_sequence: u32,
    /// the sequence number of the last DATA segment that was accepted and delivered
    pub(crate) recv_sequence: u32,

    /// accepted payload that was not yet consumed by `receive()`
    pub(crate) undelivered: VecDeque<u8>,
    /// a segment that was received while completing the handshake, to be processed by the next
    ///  operation
    pub(crate) pending_segment: Option<Segment>,
    pub(crate) peer_closed: bool,

    recv_buf: Vec<u8>,
}

impl Connection {
    /// Creates a connection in state [ConnectionState::Closed] on a given socket. The connection
    ///  is established by calling [Connection::connect] or [Connection::accept] depending on
    ///  its role.
    pub fn new(role: Role, socket: Box<dyn DatagramSocket>, config: Arc<RudpConfig>) -> Result<Connection, RudpError> {
        config.validate()
            .map_err(|e| RudpError::InvalidArgument(e.to_string()))?;

        let local_addr = socket.local_addr()
            .map_err(RudpError::Allocation)?;

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::DEBUG, "rudp_connection", ?correlation_id, ?role, ?local_addr);

        // one byte more than the biggest valid datagram, so oversized datagrams fail validation
        //  instead of being truncated to a plausible length
        let recv_buf = vec![0u8; config.max_datagram_len() + 1];

        Ok(Connection {
            correlation_id,
            span,
            config,
            role,
            state: ConnectionState::Closed,
            socket: Some(socket),
            local_addr,
            peer_addr: None,
            send_sequence: 0,
            recv_sequence: 0,
            undelivered: VecDeque::new(),
            pending_segment: None,
            peer_closed: false,
            recv_buf,
        })
    }

    /// Binds a UDP socket to `local_addr` and performs the handshake for the given role. A dialer
    ///  requires the peer's address, a listener learns it from the first SYN it receives.
    pub async fn open(role: Role, local_addr: SocketAddr, peer_addr: Option<SocketAddr>, config: Arc<RudpConfig>) -> Result<Connection, RudpError> {
        if role == Role::Dialer && peer_addr.is_none() {
            return Err(RudpError::InvalidArgument("a dialer requires a peer address".to_string()));
        }

        let socket = bind_udp(local_addr).await
            .map_err(RudpError::Allocation)?;

        let mut connection = Connection::new(role, Box::new(socket), config)?;
        match (role, peer_addr) {
            (Role::Dialer, Some(peer_addr)) => connection.connect(peer_addr).await?,
            _ => connection.accept().await?,
        }
        Ok(connection)
    }

    pub async fn listen(local_addr: SocketAddr, config: Arc<RudpConfig>) -> Result<Connection, RudpError> {
        Self::open(Role::Listener, local_addr, None, config).await
    }

    pub async fn dial(local_addr: SocketAddr, peer_addr: SocketAddr, config: Arc<RudpConfig>) -> Result<Connection, RudpError> {
        Self::open(Role::Dialer, local_addr, Some(peer_addr), config).await
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn send_sequence(&self) -> u32 {
        self.send_sequence
    }

    pub fn recv_sequence(&self) -> u32 {
        self.recv_sequence
    }

    /// `true` once the connection reached its terminal state and dropped its socket
    pub fn is_released(&self) -> bool {
        self.socket.is_none()
    }

    /// Called with the result of every public operation. Socket failures leave the connection in
    ///  an undefined protocol state, so it is treated as broken. Timeouts have already moved it
    ///  to `Errored`.
    pub(crate) fn finish_operation<T>(&mut self, result: Result<T, RudpError>) -> Result<T, RudpError> {
        if let Err(e) = &result {
            match e {
                RudpError::InvalidState(_) | RudpError::InvalidArgument(_) => {}
                _ => {
                    if !self.state.is_terminal() {
                        let _entered = self.span.clone().entered();
                        error!("connection failed in state {}: {}", self.state, e);
                        self.transition(ConnectionState::Errored);
                    }
                }
            }
        }
        result
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        debug_assert!(self.state.can_transition_to(self.role, next), "invalid transition {} -> {} for {:?}", self.state, next, self.role);
        debug!("{} -> {}", self.state, next);

        self.state = next;
        if next.is_terminal() {
            self.release_socket();
        }
    }

    /// Moves the connection to `Errored`, returning the error for convenient propagation
    pub(crate) fn fail(&mut self, e: RudpError) -> RudpError {
        error!("{}", e);
        self.transition(ConnectionState::Errored);
        e
    }

    fn release_socket(&mut self) {
        if self.socket.take().is_some() {
            info!("released socket {:?}", self.local_addr);
        }
    }

    pub(crate) fn require_state(&self, expected: ConnectionState) -> Result<(), RudpError> {
        if self.state != expected || self.socket.is_none() {
            return Err(RudpError::InvalidState(self.state));
        }
        Ok(())
    }

    /// Resets the per-direction sequence counters and enters `Established`
    pub(crate) fn establish(&mut self) {
        self.send_sequence = 0;
        self.recv_sequence = 0;
        self.transition(ConnectionState::Established);
        info!("connection established with {:?}", self.peer_addr);
    }

    pub(crate) async fn send_segment(&self, segment: &Segment) -> Result<(), RudpError> {
        let (socket, peer_addr) = match (self.socket.as_deref(), self.peer_addr) {
            (Some(socket), Some(peer_addr)) => (socket, peer_addr),
            _ => return Err(RudpError::InvalidState(self.state)),
        };

        trace!("sending {:?} to {:?}", segment, peer_addr);
        socket.send_to(&segment.to_datagram(), peer_addr).await
            .map_err(RudpError::from_socket_error)?;
        Ok(())
    }

    pub(crate) async fn send_control(&self, flags: PacketFlags, sequence: u32) -> Result<(), RudpError> {
        self.send_segment(&Segment::control(flags, sequence)).await
    }

    /// Waits for the next well-formed packet until `deadline`, returning `None` on timeout.
    ///
    /// Malformed or corrupted datagrams are dropped here without acknowledgement, as are
    ///  datagrams from other addresses once the peer is known.
    pub(crate) async fn recv_segment(&mut self, deadline: Instant) -> Result<Option<(Segment, SocketAddr)>, RudpError> {
        if let Some(segment) = self.pending_segment.take() {
            if let Some(peer_addr) = self.peer_addr {
                return Ok(Some((segment, peer_addr)));
            }
        }

        let socket = match self.socket.as_deref() {
            Some(socket) => socket,
            None => return Err(RudpError::InvalidState(self.state)),
        };

        loop {
            let (num_read, from) = match timeout_at(deadline, socket.recv_from(&mut self.recv_buf)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => {
                    error!("socket error: {}", e);
                    return Err(RudpError::from_socket_error(e));
                }
                Ok(Ok(x)) => x,
            };

            if let Some(peer_addr) = self.peer_addr {
                if from != peer_addr {
                    debug!("received packet from {:?} which is not the peer - dropping", from);
                    continue;
                }
            }

            if num_read == self.recv_buf.len() {
                warn!("datagram from {:?} exceeds the maximum segment size of {} bytes - dropping. Both peers must be configured with the same max_segment_size.", from, self.config.max_segment_size);
                continue;
            }

            match Segment::deser(&self.recv_buf[..num_read]) {
                Ok(segment) => {
                    trace!("received {:?} from {:?}", segment, from);
                    return Ok(Some((segment, from)));
                }
                Err(e) => {
                    debug!("received invalid packet from {:?}: {} - dropping", from, e);
                }
            }
        }
    }

    /// The dialer's final handshake ACK is not acknowledged. If it gets lost, the listener keeps
    ///  retransmitting SYN_ACK, and the dialer answers with another ACK whenever it sees one.
    pub(crate) async fn on_stray_syn_ack(&self) -> Result<(), RudpError> {
        if self.role == Role::Dialer {
            debug!("received SYN_ACK after the handshake - re-sending ACK");
            self.send_control(PacketFlags::Ack, 0).await
        }
        else {
            debug!("received SYN_ACK as a listener - dropping");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram_socket::MockDatagramSocket;
    use crate::test_util::{channel_pair, test_config, FaultPlan};
    use std::io;
    use std::time::Duration;

    fn mock_socket(local: SocketAddr) -> MockDatagramSocket {
        let mut socket = MockDatagramSocket::new();
        socket.expect_local_addr()
            .returning(move || Ok(local));
        socket
    }

    #[test]
    fn test_new() {
        let local = SocketAddr::from(([1,2,3,4], 8));
        let connection = Connection::new(Role::Dialer, Box::new(mock_socket(local)), Arc::new(test_config())).unwrap();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.role(), Role::Dialer);
        assert_eq!(connection.local_addr(), local);
        assert_eq!(connection.peer_addr(), None);
        assert_eq!(connection.send_sequence(), 0);
        assert_eq!(connection.recv_sequence(), 0);
        assert!(!connection.is_released());
    }

    #[test]
    fn test_new_invalid_config() {
        let mut config = test_config();
        config.max_segment_size = 0;

        let result = Connection::new(Role::Dialer, Box::new(mock_socket(SocketAddr::from(([1,2,3,4], 8)))), Arc::new(config));
        assert!(matches!(result, Err(RudpError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_without_local_addr() {
        let mut socket = MockDatagramSocket::new();
        socket.expect_local_addr()
            .returning(|| Err(io::Error::from(io::ErrorKind::AddrNotAvailable)));

        let result = Connection::new(Role::Listener, Box::new(socket), Arc::new(test_config()));
        assert!(matches!(result, Err(RudpError::Allocation(_))));
    }

    #[tokio::test]
    async fn test_send_control() {
        let peer = SocketAddr::from(([1,2,3,4], 9));

        let mut socket = mock_socket(SocketAddr::from(([1,2,3,4], 8)));
        let expected = Segment::control(PacketFlags::Ack, 5).to_datagram().to_vec();
        socket.expect_send_to()
            .once()
            .withf(move |buf, to| buf == expected.as_slice() && *to == peer)
            .returning(|buf, _| Ok(buf.len()));

        let mut connection = Connection::new(Role::Dialer, Box::new(socket), Arc::new(test_config())).unwrap();
        connection.peer_addr = Some(peer);

        connection.send_control(PacketFlags::Ack, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let socket = mock_socket(SocketAddr::from(([1,2,3,4], 8)));
        let connection = Connection::new(Role::Dialer, Box::new(socket), Arc::new(test_config())).unwrap();

        let result = connection.send_control(PacketFlags::Syn, 0).await;
        assert!(matches!(result, Err(RudpError::InvalidState(ConnectionState::Closed))));
    }

    #[tokio::test]
    async fn test_send_refused() {
        let mut socket = mock_socket(SocketAddr::from(([1,2,3,4], 8)));
        socket.expect_send_to()
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::ConnectionRefused)));

        let mut connection = Connection::new(Role::Dialer, Box::new(socket), Arc::new(test_config())).unwrap();
        connection.peer_addr = Some(SocketAddr::from(([1,2,3,4], 9)));

        let result = connection.send_control(PacketFlags::Syn, 0).await;
        assert!(matches!(result, Err(RudpError::ConnectionClosedByPeer)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_segment_drops_invalid_packets() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let b_addr = b.local_addr().unwrap();
        let mut connection = Connection::new(Role::Listener, Box::new(b), Arc::new(test_config())).unwrap();

        let mut corrupted = Segment::data(1, b"abc").to_datagram();
        corrupted[12] ^= 0x10;
        a.send_to(&corrupted, b_addr).await.unwrap();
        a.send_to(&[1, 2, 3], b_addr).await.unwrap();
        a.send_to(&Segment::data(2, b"xyz").to_datagram(), b_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let (segment, from) = connection.recv_segment(deadline).await.unwrap().unwrap();
        assert_eq!(segment, Segment::data(2, b"xyz"));
        assert_eq!(from, a.local_addr().unwrap());

        assert_eq!(connection.recv_segment(deadline).await.unwrap(), None);
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_segment_drops_oversized_datagrams() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let b_addr = b.local_addr().unwrap();
        let config = RudpConfig {
            max_segment_size: 4,
            ..test_config()
        };
        let mut connection = Connection::new(Role::Listener, Box::new(b), Arc::new(config)).unwrap();

        // a peer configured with a bigger segment size
        a.send_to(&Segment::data(1, b"12345").to_datagram(), b_addr).await.unwrap();
        a.send_to(&Segment::data(1, b"1234").to_datagram(), b_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let (segment, _) = connection.recv_segment(deadline).await.unwrap().unwrap();
        assert_eq!(segment, Segment::data(1, b"1234"));
        assert_eq!(connection.recv_segment(deadline).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_segment_drops_foreign_packets() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let b_addr = b.local_addr().unwrap();
        let mut connection = Connection::new(Role::Listener, Box::new(b), Arc::new(test_config())).unwrap();
        connection.peer_addr = Some(SocketAddr::from(([10,0,0,1], 4567)));

        a.send_to(&Segment::control(PacketFlags::Syn, 0).to_datagram(), b_addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(500);
        assert_eq!(connection.recv_segment(deadline).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_to_terminal_state_releases_socket() {
        let (_a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let mut connection = Connection::new(Role::Dialer, Box::new(b), Arc::new(test_config())).unwrap();

        connection.transition(ConnectionState::SynSent);
        assert!(!connection.is_released());

        let e = connection.fail(RudpError::HandshakeTimeout);
        assert!(matches!(e, RudpError::HandshakeTimeout));
        assert_eq!(connection.state(), ConnectionState::Errored);
        assert!(connection.is_released());

        let result = connection.recv_segment(Instant::now() + Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RudpError::InvalidState(ConnectionState::Errored))));
    }

    #[tokio::test]
    async fn test_open_dialer_without_peer() {
        let result = Connection::open(Role::Dialer, SocketAddr::from(([127,0,0,1], 0)), None, Arc::new(test_config())).await;
        assert!(matches!(result, Err(RudpError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_open_address_in_use() {
        let blocker = bind_udp(SocketAddr::from(([127,0,0,1], 0))).await.unwrap();
        let taken = blocker.local_addr().unwrap();

        let result = Connection::listen(taken, Arc::new(test_config())).await;
        assert!(matches!(result, Err(RudpError::Allocation(_))));
    }

    /// full lifecycle over real UDP sockets on loopback
    #[tokio::test]
    async fn test_udp_loopback_lifecycle() {
        let config = Arc::new(test_config());

        let listener_socket = bind_udp(SocketAddr::from(([127,0,0,1], 0))).await.unwrap();
        let listener_addr = listener_socket.local_addr().unwrap();
        let mut listener = Connection::new(Role::Listener, Box::new(listener_socket), config.clone()).unwrap();

        let receiver = tokio::spawn(async move {
            listener.accept().await?;

            let mut received = Vec::new();
            loop {
                match listener.receive(1024).await? {
                    Received::Data(data) => received.extend_from_slice(&data),
                    Received::EndOfStream => break,
                }
            }
            Ok::<_, RudpError>((listener, received))
        });

        let mut dialer = Connection::dial(SocketAddr::from(([127,0,0,1], 0)), listener_addr, config).await.unwrap();
        assert_eq!(dialer.state(), ConnectionState::Established);

        let payload = (0..5000u32).map(|n| n as u8).collect::<Vec<_>>();
        assert_eq!(dialer.send(&payload).await.unwrap(), payload.len());
        dialer.close().await.unwrap();
        assert_eq!(dialer.state(), ConnectionState::Closed);
        assert!(dialer.is_released());

        let (listener, received) = receiver.await.unwrap().unwrap();
        assert_eq!(received, payload);
        assert_eq!(listener.state(), ConnectionState::Closed);
        assert_eq!(listener.peer_addr(), Some(dialer.local_addr()));
    }
}
