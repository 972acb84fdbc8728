use std::time::Duration;
use anyhow::bail;
use crate::packet_header::PacketHeader;

/// The largest UDP payload that can be sent over IPV4
pub const MAX_UDP_PAYLOAD: usize = 65_507;

pub struct RudpConfig {
    /// The maximum time a listener waits for the initial SYN in `accept()`. There is nothing to
    ///  retransmit at this point, so this is a single wait.
    pub accept_timeout: Duration,

    /// The time to wait for a SYN_ACK (dialer) or for the handshake's final ACK (listener) before
    ///  retransmitting
    pub handshake_timeout: Duration,
    pub handshake_max_retries: u32,

    /// The time a sender waits for a segment's ACK before retransmitting the segment
    pub transfer_timeout: Duration,
    pub transfer_max_retries: u32,

    pub teardown_timeout: Duration,
    pub teardown_max_retries: u32,

    /// The maximum time `receive()` waits for the next packet. Expiry is treated like a
    ///  transfer timeout, i.e. the connection is considered broken.
    pub idle_timeout: Duration,

    /// This is the maximum number of payload bytes in a single DATA packet. Buffers that are
    ///  longer are split into several segments.
    ///
    /// RUDP relies on datagrams not being fragmented, so header and payload must fit into the
    ///  UDP payload supported by all network connections between the peers. With full Ethernet
    ///  frames and no optional IP headers, this is `1500 - 20 - 8 = 1472` for IPV4, i.e. a
    ///  maximum segment size of `1472 - 11 = 1461`.
    ///
    /// Both peers must use the same value: the receive buffer is sized from the local setting,
    ///  and bigger datagrams from the peer are dropped.
    pub max_segment_size: usize,
}

impl RudpConfig {
    /// IPV4 with end-to-end full Ethernet MTU, timeouts matching the reference sender / receiver
    pub fn default_ipv4() -> RudpConfig {
        RudpConfig {
            accept_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            handshake_max_retries: 3,
            transfer_timeout: Duration::from_secs(2),
            transfer_max_retries: 5,
            teardown_timeout: Duration::from_secs(5),
            teardown_max_retries: 3,
            idle_timeout: Duration::from_secs(120),
            max_segment_size: 1472 - PacketHeader::SERIALIZED_LEN,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_segment_size == 0 {
            bail!("maximum segment size must be positive");
        }
        if self.max_segment_size + PacketHeader::SERIALIZED_LEN > MAX_UDP_PAYLOAD {
            bail!("maximum segment size {} plus header exceeds the maximum UDP payload of {} bytes", self.max_segment_size, MAX_UDP_PAYLOAD);
        }

        for (name, timeout) in [
            ("accept", self.accept_timeout),
            ("handshake", self.handshake_timeout),
            ("transfer", self.transfer_timeout),
            ("teardown", self.teardown_timeout),
            ("idle", self.idle_timeout),
        ] {
            if timeout.is_zero() {
                bail!("{} timeout must be positive", name);
            }
        }

        Ok(())
    }

    pub fn max_datagram_len(&self) -> usize {
        PacketHeader::SERIALIZED_LEN + self.max_segment_size
    }

    pub fn handshake_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.handshake_timeout,
            max_retries: self.handshake_max_retries,
        }
    }

    pub fn transfer_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.transfer_timeout,
            max_retries: self.transfer_max_retries,
        }
    }

    pub fn teardown_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.teardown_timeout,
            max_retries: self.teardown_max_retries,
        }
    }
}

/// The same policy shape is used by handshake, transfer and teardown, but every protocol phase
///  keeps its own attempt counter.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// the number of retransmissions after the initial transmission
    pub max_retries: u32,
}

impl RetryPolicy {
    /// upper bound for the total time a phase can wait for its peer
    pub fn max_total_wait(&self) -> Duration {
        self.timeout * (self.max_retries + 1)
    }
}
