use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{info, trace};

/// This is an abstraction for the unreliable datagram service RUDP is layered on, introduced to
///  allow running the protocol over an in-memory channel (see [crate::test_util]) or mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    /// Waits for the next datagram. NB: cancellation safe, callers wrap this in a timeout
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        UdpSocket::send_to(self, buf, to).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Binds a UDP socket for a connection
pub async fn bind_udp(local_addr: SocketAddr) -> io::Result<UdpSocket> {
    //TODO "don't fragment" flag
    let socket = UdpSocket::bind(local_addr).await?;
    info!("bound UDP socket to {:?}", socket.local_addr()?);
    Ok(socket)
}
