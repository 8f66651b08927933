//! Connection lifecycle state (RFC 9000 §10), generalized from the
//! teacher's `connection::types::ConnectionState` to the full set of
//! states a real endpoint needs to track.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshake,
    Connected,
    /// Local CONNECTION_CLOSE sent or received; draining before Closed.
    Closing,
    /// Peer's CONNECTION_CLOSE observed; no further sends except a final
    /// echo, waiting out the draining period (RFC 9000 §10.2).
    Draining,
    Closed,
}

impl ConnectionState {
    pub fn is_established(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Handshake | ConnectionState::Connected)
    }
}
