use std::fmt::{Display, Formatter};

/// A connection's role is fixed when it is created
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    /// passive open: waits for a SYN on its local port and learns the peer's address from it
    Listener,
    /// active open: sends the SYN to a known peer address
    Dialer,
}

/// Connection state machine:
///
/// ```ascii
/// Closed --connect--> SynSent --SYN_ACK--> Established
/// Closed --accept--> Listening --SYN--> SynReceived --ACK--> Established
/// Established --close--> FinWait --FIN_ACK / ACK sent--> Closed
/// Established --FIN--> CloseWait --FIN_ACK sent / ACK--> Closed
/// any --retry budget exhausted--> Errored
/// ```
///
/// `Closed` is both the initial and the terminal state - a closed connection that went through
///  teardown has released its socket and can not be reopened.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Closed,
    Listening,
    SynSent,
    SynReceived,
    Established,
    FinWait,
    CloseWait,
    Errored,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listening => "LISTENING",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait => "FIN_WAIT",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::Errored => "ERRORED",
        };
        write!(f, "{}", s)
    }
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    /// Checks a transition against the state diagram, for the given role
    pub fn can_transition_to(&self, role: Role, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Errored {
            return *self != Errored;
        }

        match (self, next) {
            (Closed, SynSent) => role == Role::Dialer,
            (SynSent, Established) => role == Role::Dialer,
            (Closed, Listening) => role == Role::Listener,
            (Listening, SynReceived) => role == Role::Listener,
            (SynReceived, Established) => role == Role::Listener,
            (Established, FinWait) => true,
            (Established, CloseWait) => true,
            (FinWait, Closed) => true,
            (CloseWait, Closed) => true,
            _ => false,
        }
    }
}
