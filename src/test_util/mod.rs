//! Utilities for testing code that uses RUDP connections: an in-memory datagram socket pair with
//!  deterministic fault injection, and a log of the datagrams each side sent.
//!
//! These are part of the crate's regular (non-#[cfg(test)]) code so that applications can run
//!  their own connection code against lossy channels in tests.

pub mod channel_socket;
pub mod traffic_log;

pub use channel_socket::{channel_pair, ChannelSocket, Fault, FaultPlan};
pub use traffic_log::TrafficLog;

use crate::config::RudpConfig;
use crate::connection::Connection;
use crate::state::Role;
use std::sync::Arc;
use std::time::Duration;

/// Short retransmission timeouts, long idle timeouts
pub fn test_config() -> RudpConfig {
    RudpConfig {
        accept_timeout: Duration::from_secs(10),
        handshake_timeout: Duration::from_millis(100),
        handshake_max_retries: 3,
        transfer_timeout: Duration::from_millis(100),
        transfer_max_retries: 5,
        teardown_timeout: Duration::from_millis(100),
        teardown_max_retries: 3,
        idle_timeout: Duration::from_secs(10),
        ..RudpConfig::default_ipv4()
    }
}

/// A dialer on one end and a listener on the other end of a [channel_pair], both in state
///  `Closed`, with the logs of the datagrams each of them sends
pub fn connection_pair(dialer_faults: FaultPlan, listener_faults: FaultPlan, config: RudpConfig) -> (Connection, Connection, TrafficLog, TrafficLog) {
    let (a, b) = channel_pair(dialer_faults, listener_faults);
    let (traffic_a, traffic_b) = (a.traffic(), b.traffic());

    let config = Arc::new(config);
    match (Connection::new(Role::Dialer, Box::new(a), config.clone()), Connection::new(Role::Listener, Box::new(b), config)) {
        (Ok(dialer), Ok(listener)) => (dialer, listener, traffic_a, traffic_b),
        _ => panic!("invalid test configuration"),
    }
}

/// Like [connection_pair], but with the handshake completed. Fault plans apply to the handshake
///  as well, so occurrence counts in them include handshake packets.
pub async fn established_pair(dialer_faults: FaultPlan, listener_faults: FaultPlan, config: RudpConfig) -> (Connection, Connection, TrafficLog, TrafficLog) {
    let (mut dialer, mut listener, traffic_a, traffic_b) = connection_pair(dialer_faults, listener_faults, config);
    let listener_addr = listener.local_addr();

    let (r_dialer, r_listener) = tokio::join!(
        dialer.connect(listener_addr),
        listener.accept(),
    );
    if let Err(e) = r_dialer.and(r_listener) {
        panic!("handshake failed: {}", e);
    }
    (dialer, listener, traffic_a, traffic_b)
}
