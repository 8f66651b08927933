//! Connection-level flow control (§4.8): the aggregate byte budget across
//! all streams, independent of any single stream's limit.

use crate::result::{ConnectionError, QuicheResult};

/// Our view of data we're sending against the peer's advertised limit.
#[derive(Debug)]
pub struct SendFlowControl {
    peer_max_data: u64,
    bytes_sent: u64,
}

impl SendFlowControl {
    pub fn new(initial_peer_max_data: u64) -> Self {
        Self { peer_max_data: initial_peer_max_data, bytes_sent: 0 }
    }

    pub fn available(&self) -> u64 {
        self.peer_max_data.saturating_sub(self.bytes_sent)
    }

    /// §4.8: send DATA_BLOCKED once we're within 10% of the peer's limit.
    pub fn is_blocked(&self) -> bool {
        self.bytes_sent * 10 >= self.peer_max_data * 9
    }

    pub fn on_bytes_sent(&mut self, n: u64) {
        self.bytes_sent += n;
    }

    pub fn on_max_data(&mut self, v: u64) {
        self.peer_max_data = self.peer_max_data.max(v);
    }
}

/// Our view of data we've received against the limit we've granted.
#[derive(Debug)]
pub struct RecvFlowControl {
    max_data: u64,
    initial_max_data: u64,
    bytes_received: u64,
}

impl RecvFlowControl {
    pub fn new(initial_max_data: u64) -> Self {
        Self { max_data: initial_max_data, initial_max_data, bytes_received: 0 }
    }

    pub fn on_bytes_received(&mut self, n: u64) -> QuicheResult<()> {
        self.bytes_received += n;
        if self.bytes_received > self.max_data {
            return Err(ConnectionError::FlowControl { sent: self.bytes_received, limit: self.max_data }.into());
        }
        Ok(())
    }

    /// §4.8: once half the window has been consumed, slide it forward by
    /// another full window and report the new MAX_DATA to send.
    pub fn maybe_increase_window(&mut self) -> Option<u64> {
        if self.bytes_received * 2 < self.max_data {
            return None;
        }
        self.max_data = self.bytes_received + self.initial_max_data;
        Some(self.max_data)
    }

    pub fn max_data(&self) -> u64 {
        self.max_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_side_is_blocked_within_ten_percent_of_the_limit() {
        let mut fc = SendFlowControl::new(100);
        fc.on_bytes_sent(89);
        assert!(!fc.is_blocked());
        fc.on_bytes_sent(1);
        assert!(fc.is_blocked());
    }

    #[test]
    fn recv_side_rejects_data_past_the_granted_limit() {
        let mut fc = RecvFlowControl::new(10);
        assert!(fc.on_bytes_received(10).is_ok());
        assert!(fc.on_bytes_received(1).is_err());
    }

    #[test]
    fn window_slides_forward_after_half_consumption() {
        let mut fc = RecvFlowControl::new(100);
        fc.on_bytes_received(49).unwrap();
        assert!(fc.maybe_increase_window().is_none());
        fc.on_bytes_received(1).unwrap();
        let new_max = fc.maybe_increase_window().unwrap();
        assert_eq!(new_max, 150);
    }
}
