//! Connection lifecycle states and close reasons.

use std::fmt;

/// Lifecycle state of a [`Connection`](super::Connection).
///
/// States are ranked: `Creating` < `Open` = `ToDisconnect` < `Disconnecting` <
/// `SocketClosed`. A connection only ever moves to a strictly higher rank, so
/// a connection never reopens once it starts closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed but not yet started, or the connection filter is still
    /// running its handshake.
    Creating = 0,
    /// Started and processing traffic.
    Open = 1,
    /// Aborted before it ever opened.
    ToDisconnect = 2,
    /// The output side has been told to flush and end.
    Disconnecting = 3,
    /// The reactor reported the socket closed.
    SocketClosed = 4,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            Self::Creating => 0,
            Self::Open | Self::ToDisconnect => 1,
            Self::Disconnecting => 2,
            Self::SocketClosed => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// ```
    /// use brokerframe::connection::ConnectionState;
    ///
    /// assert!(ConnectionState::Creating.can_advance_to(ConnectionState::Open));
    /// assert!(ConnectionState::Open.can_advance_to(ConnectionState::SocketClosed));
    /// assert!(!ConnectionState::Disconnecting.can_advance_to(ConnectionState::Open));
    /// assert!(!ConnectionState::Open.can_advance_to(ConnectionState::ToDisconnect));
    /// ```
    #[must_use]
    pub fn can_advance_to(self, next: ConnectionState) -> bool { next.rank() > self.rank() }

    /// Whether the connection has begun or finished closing.
    #[must_use]
    pub fn is_closing(self) -> bool { self.rank() >= Self::Disconnecting.rank() }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Creating,
            1 => Self::Open,
            2 => Self::ToDisconnect,
            3 => Self::Disconnecting,
            _ => Self::SocketClosed,
        }
    }
}

/// Why a connection is being closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The liveness sweep found the connection idle past its deadline.
    ConnectionKeepAlive,
    /// Orderly shutdown requested by the host or the peer.
    SocketShutdown,
    /// The transport or its filter failed.
    SocketDisconnect,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConnectionKeepAlive => "keep-alive",
            Self::SocketShutdown => "shutdown",
            Self::SocketDisconnect => "disconnect",
        })
    }
}

/// Role of the peer on the other end of a connection.
///
/// Mesh links between cluster nodes are exempt from idle expiry and use the
/// larger mesh buffer sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConnectionKind {
    /// An external client.
    #[default]
    Client,
    /// Another node of the same cluster.
    Mesh,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ConnectionState::{self, *};

    const ALL: [ConnectionState; 5] = [Creating, Open, ToDisconnect, Disconnecting, SocketClosed];

    #[rstest]
    #[case(Creating, Open, true)]
    #[case(Creating, ToDisconnect, true)]
    #[case(Creating, Disconnecting, true)]
    #[case(Open, ToDisconnect, false)]
    #[case(ToDisconnect, Open, false)]
    #[case(Open, Disconnecting, true)]
    #[case(ToDisconnect, Disconnecting, true)]
    #[case(Disconnecting, SocketClosed, true)]
    #[case(SocketClosed, Disconnecting, false)]
    #[case(Open, Open, false)]
    fn transitions(
        #[case] from: ConnectionState,
        #[case] to: ConnectionState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[test]
    fn raw_round_trip() {
        for state in ALL {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn nothing_leaves_socket_closed() {
        assert!(ALL.iter().all(|next| !SocketClosed.can_advance_to(*next)));
    }
}
