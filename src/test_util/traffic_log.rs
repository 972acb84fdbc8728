use crate::packet_header::PacketFlags;
use crate::segment::Segment;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Records every datagram a [super::ChannelSocket] was asked to send, before faults are applied.
///  Cloning the log shares it, so a test can keep a handle after the socket was moved into a
///  connection.
#[derive(Debug, Clone, Default)]
pub struct TrafficLog {
    sent: Arc<RwLock<Vec<Vec<u8>>>>,
}

impl TrafficLog {
    pub(crate) async fn record(&self, datagram: &[u8]) {
        self.sent.write().await
            .push(datagram.to_vec());
    }

    pub async fn datagrams(&self) -> Vec<Vec<u8>> {
        self.sent.read().await
            .clone()
    }

    /// The recorded datagrams that parse as segments - which are all of them unless a test sent
    ///  raw bytes through the socket
    pub async fn segments(&self) -> Vec<Segment> {
        self.sent.read().await
            .iter()
            .flat_map(|d| Segment::deser(d).ok())
            .collect()
    }

    pub async fn flags(&self) -> Vec<PacketFlags> {
        self.segments().await
            .iter()
            .map(|s| s.flags())
            .collect()
    }

    pub async fn count(&self, flags: PacketFlags) -> usize {
        self.segments().await
            .iter()
            .filter(|s| s.flags() == flags)
            .count()
    }

    pub async fn of_kind(&self, flags: PacketFlags) -> Vec<Segment> {
        self.segments().await
            .into_iter()
            .filter(|s| s.flags() == flags)
            .collect()
    }
}
