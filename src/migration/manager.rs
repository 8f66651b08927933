//! Connection migration orchestration (§4.10): tracks every path seen so
//! far, drives PATH_CHALLENGE/PATH_RESPONSE validation, and picks the
//! active path once more than one is validated.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::migration::path::{NetworkPath, PathState};
use crate::packet::types::ConnectionId;

pub struct PathManager {
    paths: Vec<NetworkPath>,
    active: usize,
    max_ack_delay: Duration,
}

impl PathManager {
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr, max_ack_delay: Duration) -> Self {
        let mut initial = NetworkPath::new(local_addr, remote_addr, max_ack_delay);
        initial.state = PathState::Validated; // the handshake path is trusted once it completes
        Self { paths: vec![initial], active: 0, max_ack_delay }
    }

    pub fn active_path(&self) -> &NetworkPath {
        &self.paths[self.active]
    }

    pub fn active_path_mut(&mut self) -> &mut NetworkPath {
        &mut self.paths[self.active]
    }

    /// Called when a datagram arrives from an address we haven't seen;
    /// starts validating it without switching the active path yet
    /// (RFC 9000 §9.3: never migrate on an unvalidated path).
    pub fn on_new_remote_address(&mut self, local_addr: SocketAddr, remote_addr: SocketAddr, rng: &mut impl RngCore, now: Instant) -> [u8; 8] {
        let mut path = NetworkPath::new(local_addr, remote_addr, self.max_ack_delay);
        let mut challenge = [0u8; 8];
        rng.fill_bytes(&mut challenge);
        path.start_validation(challenge, now);
        self.paths.push(path);
        challenge
    }

    pub fn on_path_response(&mut self, data: [u8; 8]) -> bool {
        self.paths.iter_mut().any(|p| p.on_path_response(data))
    }

    pub fn check_timeouts(&mut self, now: Instant, pto: Duration) {
        for path in &mut self.paths {
            path.check_validation_timeout(now, pto);
        }
    }

    /// Switches the active path to a validated alternative (RFC 9000 §9.3
    /// doesn't require an RTT sample before using a validated path, so a
    /// freshly validated path with none yet is still eligible). RTT only
    /// breaks a tie when more than one alternative has already taken a
    /// sample; otherwise the first validated alternative found wins.
    pub fn promote_best_validated_path(&mut self) {
        let mut best: Option<usize> = None;
        for i in 0..self.paths.len() {
            if i == self.active || !self.paths[i].is_validated() {
                continue;
            }
            best = Some(match best {
                None => i,
                Some(b) => {
                    if self.paths[i].rtt.has_sample()
                        && self.paths[b].rtt.has_sample()
                        && self.paths[i].rtt.smoothed() < self.paths[b].rtt.smoothed()
                    {
                        i
                    } else {
                        b
                    }
                }
            });
        }
        if let Some(best) = best {
            self.active = best;
        }
    }
}

/// RFC 9000 §5.1.1: tracks connection IDs the peer has offered via
/// NEW_CONNECTION_ID so a migrating path can present a CID the old path
/// never used, and retires ones below the peer's requested floor.
#[derive(Default)]
pub struct ConnectionIdManager {
    available: Vec<(u64, ConnectionId, [u8; 16])>,
    retired_below: u64,
}

impl ConnectionIdManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_new_connection_id(&mut self, sequence_number: u64, cid: ConnectionId, reset_token: [u8; 16], retire_prior_to: u64) -> Vec<u64> {
        if sequence_number >= retire_prior_to && sequence_number >= self.retired_below {
            self.available.push((sequence_number, cid, reset_token));
        }
        self.retired_below = self.retired_below.max(retire_prior_to);
        let to_retire: Vec<u64> = self
            .available
            .iter()
            .filter(|(seq, _, _)| *seq < self.retired_below)
            .map(|(seq, _, _)| *seq)
            .collect();
        self.available.retain(|(seq, _, _)| *seq >= self.retired_below);
        to_retire
    }

    pub fn next_unused(&mut self) -> Option<(u64, ConnectionId)> {
        self.available.first().map(|(seq, cid, _)| (*seq, cid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn new_remote_address_starts_out_unvalidated_and_inactive() {
        let mut mgr = PathManager::new(addr(1), addr(2), Duration::from_millis(25));
        let mut rng = StepRng::new(1, 1);
        mgr.on_new_remote_address(addr(1), addr(3), &mut rng, Instant::now());
        assert_eq!(mgr.active_path().remote_addr, addr(2));
    }

    #[test]
    fn a_freshly_validated_path_with_no_rtt_sample_yet_is_still_promoted() {
        let mut mgr = PathManager::new(addr(1), addr(2), Duration::from_millis(25));
        let mut rng = StepRng::new(1, 1);
        let challenge = mgr.on_new_remote_address(addr(1), addr(3), &mut rng, Instant::now());
        assert!(mgr.on_path_response(challenge));
        mgr.promote_best_validated_path();
        assert_eq!(mgr.active_path().remote_addr, addr(3));
    }

    #[test]
    fn retire_prior_to_drops_earlier_sequence_numbers() {
        let mut mgr = ConnectionIdManager::new();
        mgr.on_new_connection_id(0, ConnectionId::new(vec![0]), [0; 16], 0);
        mgr.on_new_connection_id(1, ConnectionId::new(vec![1]), [0; 16], 0);
        let retired = mgr.on_new_connection_id(2, ConnectionId::new(vec![2]), [0; 16], 2);
        assert_eq!(retired, vec![0, 1]);
        assert_eq!(mgr.next_unused().unwrap().0, 2);
    }
}
