//! A single network path between the two endpoints (§4.10): connection
//! migration replaces the active path rather than tearing down state.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::recovery::rtt::RttEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Unknown,
    Validating,
    Validated,
    Failed,
}

pub struct NetworkPath {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub state: PathState,
    pub rtt: RttEstimator,
    outstanding_challenge: Option<([u8; 8], Instant)>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkPath {
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr, max_ack_delay: Duration) -> Self {
        Self {
            local_addr,
            remote_addr,
            state: PathState::Unknown,
            rtt: RttEstimator::new(max_ack_delay),
            outstanding_challenge: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn start_validation(&mut self, challenge: [u8; 8], now: Instant) {
        self.state = PathState::Validating;
        self.outstanding_challenge = Some((challenge, now));
    }

    pub fn on_path_response(&mut self, data: [u8; 8]) -> bool {
        if self.outstanding_challenge.map(|(c, _)| c) == Some(data) {
            self.outstanding_challenge = None;
            self.state = PathState::Validated;
            true
        } else {
            false
        }
    }

    /// RFC 9000 §8.2.4: a validation attempt that hasn't completed within
    /// `3 * PTO` is abandoned.
    pub fn check_validation_timeout(&mut self, now: Instant, pto: Duration) {
        if let Some((_, started)) = self.outstanding_challenge {
            if now.saturating_duration_since(started) >= pto * 3 {
                self.outstanding_challenge = None;
                self.state = PathState::Failed;
            }
        }
    }

    pub fn is_validated(&self) -> bool {
        self.state == PathState::Validated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn matching_response_validates_the_path() {
        let mut path = NetworkPath::new(addr(1), addr(2), Duration::from_millis(25));
        let now = Instant::now();
        path.start_validation([1; 8], now);
        assert!(path.on_path_response([1; 8]));
        assert!(path.is_validated());
    }

    #[test]
    fn mismatched_response_does_not_validate() {
        let mut path = NetworkPath::new(addr(1), addr(2), Duration::from_millis(25));
        path.start_validation([1; 8], Instant::now());
        assert!(!path.on_path_response([2; 8]));
        assert_eq!(path.state, PathState::Validating);
    }

    #[test]
    fn validation_times_out_after_three_ptos() {
        let mut path = NetworkPath::new(addr(1), addr(2), Duration::from_millis(25));
        let now = Instant::now();
        path.start_validation([1; 8], now);
        let pto = Duration::from_millis(100);
        path.check_validation_timeout(now + pto * 3, pto);
        assert_eq!(path.state, PathState::Failed);
    }
}
