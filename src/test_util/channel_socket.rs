use crate::datagram_socket::DatagramSocket;
use crate::packet_header::PacketFlags;
use crate::segment::Segment;
use crate::test_util::traffic_log::TrafficLog;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Fault {
    Drop,
    /// flips a bit in the datagram's last byte, which is in the payload for DATA packets and in
    ///  the checksum for control packets
    Corrupt,
}

#[derive(Debug, Clone, Copy)]
struct FaultRule {
    flags: PacketFlags,
    /// 1-based, counted per packet kind; `None` matches every packet of the kind
    occurrence: Option<usize>,
    fault: Fault,
}

/// Describes which of the datagrams a socket sends are lost or corrupted in transit. Faults are
///  deterministic: explicit rules match by packet kind and occurrence, and random loss uses a
///  seeded RNG.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    rules: Vec<FaultRule>,
    random_loss: Option<(f64, u64)>,
}

impl FaultPlan {
    pub fn none() -> FaultPlan {
        FaultPlan::default()
    }

    pub fn drop_nth(self, flags: PacketFlags, n: usize) -> FaultPlan {
        self.with_rule(flags, Some(n), Fault::Drop)
    }

    pub fn drop_all(self, flags: PacketFlags) -> FaultPlan {
        self.with_rule(flags, None, Fault::Drop)
    }

    pub fn corrupt_nth(self, flags: PacketFlags, n: usize) -> FaultPlan {
        self.with_rule(flags, Some(n), Fault::Corrupt)
    }

    pub fn random_loss(mut self, rate: f64, seed: u64) -> FaultPlan {
        self.random_loss = Some((rate, seed));
        self
    }

    fn with_rule(mut self, flags: PacketFlags, occurrence: Option<usize>, fault: Fault) -> FaultPlan {
        self.rules.push(FaultRule { flags, occurrence, fault });
        self
    }
}

struct FaultInjector {
    rules: Vec<FaultRule>,
    counts: [usize; 256],
    random_loss: Option<(f64, StdRng)>,
}

impl FaultInjector {
    fn new(plan: FaultPlan) -> FaultInjector {
        FaultInjector {
            rules: plan.rules,
            counts: [0; 256],
            random_loss: plan.random_loss
                .map(|(rate, seed)| (rate, StdRng::seed_from_u64(seed))),
        }
    }

    fn fault_for(&mut self, datagram: &[u8]) -> Option<Fault> {
        if let Some(flags) = datagram.first().and_then(|&b| PacketFlags::try_from(b).ok()) {
            let count = &mut self.counts[u8::from(flags) as usize];
            *count += 1;
            let count = *count;

            let matching = self.rules.iter()
                .find(|r| r.flags == flags && r.occurrence.map(|n| n == count).unwrap_or(true));
            if let Some(rule) = matching {
                return Some(rule.fault);
            }
        }

        if let Some((rate, rng)) = &mut self.random_loss {
            if rng.gen_bool(*rate) {
                return Some(Fault::Drop);
            }
        }
        None
    }
}

/// One end of an in-memory datagram channel. Datagrams are delivered in order unless the
///  sending side's [FaultPlan] drops or corrupts them, and delivery takes no (virtual) time.
///
/// Datagrams sent to any address other than the channel's other end are discarded, as are
///  datagrams sent after the other end was dropped.
pub struct ChannelSocket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    faults: Mutex<FaultInjector>,
    traffic: TrafficLog,
}

/// Creates a connected pair of sockets at fixed loopback addresses, each applying its own fault
///  plan to the datagrams it sends
pub fn channel_pair(faults_a: FaultPlan, faults_b: FaultPlan) -> (ChannelSocket, ChannelSocket) {
    let addr_a = SocketAddr::from(([127, 0, 0, 1], 10001));
    let addr_b = SocketAddr::from(([127, 0, 0, 1], 10002));

    let (send_a, recv_b) = mpsc::unbounded_channel();
    let (send_b, recv_a) = mpsc::unbounded_channel();

    let a = ChannelSocket {
        local_addr: addr_a,
        peer_addr: addr_b,
        outbound: send_a,
        inbound: Mutex::new(recv_a),
        faults: Mutex::new(FaultInjector::new(faults_a)),
        traffic: TrafficLog::default(),
    };
    let b = ChannelSocket {
        local_addr: addr_b,
        peer_addr: addr_a,
        outbound: send_b,
        inbound: Mutex::new(recv_b),
        faults: Mutex::new(FaultInjector::new(faults_b)),
        traffic: TrafficLog::default(),
    };
    (a, b)
}

impl ChannelSocket {
    /// a shared handle to the log of datagrams sent through this socket
    pub fn traffic(&self) -> TrafficLog {
        self.traffic.clone()
    }

    /// Sends a segment to the other end, for tests playing the peer's part by hand
    pub async fn send_segment(&self, segment: &Segment) {
        let _ = self.send_to(&segment.to_datagram(), self.peer_addr).await;
    }

    /// Waits for the next datagram that parses as a segment, for tests playing the peer's part
    ///  by hand
    pub async fn recv_segment(&self, timeout: Duration) -> Option<Segment> {
        let mut buf = vec![0u8; 65_536];
        tokio::time::timeout(timeout, async {
            loop {
                let received = self.recv_from(&mut buf).await;
                if let Ok((n, _)) = received {
                    if let Ok(segment) = Segment::deser(&buf[..n]) {
                        return segment;
                    }
                }
            }
        }).await.ok()
    }
}

#[async_trait]
impl DatagramSocket for ChannelSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.traffic.record(buf).await;

        if to != self.peer_addr {
            trace!("channel socket: no receiver at {:?} - discarding datagram", to);
            return Ok(buf.len());
        }

        let mut datagram = buf.to_vec();
        match self.faults.lock().await.fault_for(&datagram) {
            Some(Fault::Drop) => {
                debug!("channel socket: dropping datagram to {:?}", to);
                return Ok(buf.len());
            }
            Some(Fault::Corrupt) => {
                debug!("channel socket: corrupting datagram to {:?}", to);
                if let Some(last) = datagram.last_mut() {
                    *last ^= 0x01;
                }
            }
            None => {}
        }

        // the other end may have been released, which is not an error for a datagram service
        let _ = self.outbound.send(datagram);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(datagram) => {
                // truncate like a UDP socket
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok((n, self.peer_addr))
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv(socket: &ChannelSocket) -> Option<Vec<u8>> {
        let mut buf = [0u8; 1024];
        let result = tokio::time::timeout(Duration::from_millis(10), socket.recv_from(&mut buf)).await;
        let (n, _) = result.ok()?.unwrap();
        Some(buf[..n].to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"abc", b_addr).await.unwrap();
        a.send_to(b"de", b_addr).await.unwrap();
        b.send_to(b"xyz", a.local_addr().unwrap()).await.unwrap();

        assert_eq!(recv(&b).await, Some(b"abc".to_vec()));
        assert_eq!(recv(&b).await, Some(b"de".to_vec()));
        assert_eq!(recv(&b).await, None);
        assert_eq!(recv(&a).await, Some(b"xyz".to_vec()));
        assert_eq!(a.traffic().datagrams().await, vec![b"abc".to_vec(), b"de".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_address() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());

        a.send_to(b"abc", SocketAddr::from(([127, 0, 0, 1], 1))).await.unwrap();
        assert_eq!(recv(&b).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_dropped() {
        let (a, b) = channel_pair(FaultPlan::none(), FaultPlan::none());
        let b_addr = b.local_addr().unwrap();
        drop(b);

        assert_eq!(a.send_to(b"abc", b_addr).await.unwrap(), 3);
        assert_eq!(recv(&a).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_nth() {
        let (a, b) = channel_pair(FaultPlan::none().drop_nth(PacketFlags::Ack, 2), FaultPlan::none());

        for seq in 1..=3 {
            a.send_segment(&Segment::control(PacketFlags::Ack, seq)).await;
        }
        a.send_segment(&Segment::data(1, b"x")).await;

        let timeout = Duration::from_millis(10);
        assert_eq!(b.recv_segment(timeout).await, Some(Segment::control(PacketFlags::Ack, 1)));
        assert_eq!(b.recv_segment(timeout).await, Some(Segment::control(PacketFlags::Ack, 3)));
        assert_eq!(b.recv_segment(timeout).await, Some(Segment::data(1, b"x")));
        assert_eq!(b.recv_segment(timeout).await, None);

        assert_eq!(a.traffic().count(PacketFlags::Ack).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_all() {
        let (a, b) = channel_pair(FaultPlan::none().drop_all(PacketFlags::Syn), FaultPlan::none());

        a.send_segment(&Segment::control(PacketFlags::Syn, 0)).await;
        a.send_segment(&Segment::control(PacketFlags::Syn, 0)).await;
        a.send_segment(&Segment::control(PacketFlags::Fin, 0)).await;

        assert_eq!(b.recv_segment(Duration::from_millis(10)).await, Some(Segment::control(PacketFlags::Fin, 0)));
        assert_eq!(b.recv_segment(Duration::from_millis(10)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_nth() {
        let (a, b) = channel_pair(FaultPlan::none().corrupt_nth(PacketFlags::Data, 1), FaultPlan::none());

        let datagram = Segment::data(1, b"HELLO").to_datagram();
        a.send_to(&datagram, b.local_addr().unwrap()).await.unwrap();
        a.send_to(&datagram, b.local_addr().unwrap()).await.unwrap();

        let corrupted = recv(&b).await.unwrap();
        assert_ne!(corrupted, datagram.to_vec());
        assert!(Segment::deser(&corrupted).is_err());
        assert_eq!(recv(&b).await, Some(datagram.to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_loss_is_deterministic() {
        async fn delivered(seed: u64) -> Vec<u32> {
            let (a, b) = channel_pair(FaultPlan::none().random_loss(0.5, seed), FaultPlan::none());
            for seq in 0..100 {
                a.send_segment(&Segment::control(PacketFlags::Ack, seq)).await;
            }

            let mut result = Vec::new();
            while let Some(segment) = b.recv_segment(Duration::from_millis(10)).await {
                result.push(segment.sequence());
            }
            result
        }

        let first = delivered(42).await;
        assert_eq!(first, delivered(42).await);
        assert!(first.len() > 10 && first.len() < 90);
    }
}
