//! Per-stream flow control (§4.8/§4.9), mirroring
//! [`crate::flowcontrol::connection`] but with auto-tuning: a stream that
//! keeps consuming its window aggressively gets a bigger one, up to a cap,
//! so a fast consumer doesn't stall on a round trip every time its window
//! fills.

use crate::result::{ConnectionError, QuicheResult};

const AUTOTUNE_CONSUMPTION_THRESHOLD_NUMERATOR: u64 = 3;
const AUTOTUNE_CONSUMPTION_THRESHOLD_DENOMINATOR: u64 = 4;
const MAX_WINDOW_MULTIPLE: u64 = 16;

#[derive(Debug)]
pub struct StreamSendFlowControl {
    peer_max_data: u64,
    bytes_sent: u64,
}

impl StreamSendFlowControl {
    pub fn new(initial_peer_max_data: u64) -> Self {
        Self { peer_max_data: initial_peer_max_data, bytes_sent: 0 }
    }

    pub fn available(&self) -> u64 {
        self.peer_max_data.saturating_sub(self.bytes_sent)
    }

    pub fn is_blocked(&self) -> bool {
        self.bytes_sent >= self.peer_max_data
    }

    pub fn on_bytes_sent(&mut self, n: u64) {
        self.bytes_sent += n;
    }

    pub fn on_max_stream_data(&mut self, v: u64) {
        self.peer_max_data = self.peer_max_data.max(v);
    }
}

#[derive(Debug)]
pub struct StreamRecvFlowControl {
    max_data: u64,
    window: u64,
    cap: u64,
    bytes_received: u64,
}

impl StreamRecvFlowControl {
    pub fn new(initial_max_data: u64) -> Self {
        Self {
            max_data: initial_max_data,
            window: initial_max_data,
            cap: initial_max_data.saturating_mul(MAX_WINDOW_MULTIPLE),
            bytes_received: 0,
        }
    }

    pub fn on_bytes_received(&mut self, n: u64) -> QuicheResult<()> {
        self.bytes_received += n;
        if self.bytes_received > self.max_data {
            return Err(ConnectionError::FlowControl { sent: self.bytes_received, limit: self.max_data }.into());
        }
        Ok(())
    }

    /// Doubles the window (capped at 16x the initial one) once 75% of the
    /// current window has been consumed, then slides it forward.
    pub fn maybe_increase_window(&mut self) -> Option<u64> {
        if self.bytes_received * AUTOTUNE_CONSUMPTION_THRESHOLD_DENOMINATOR
            < self.max_data * AUTOTUNE_CONSUMPTION_THRESHOLD_NUMERATOR
        {
            return None;
        }
        self.window = (self.window * 2).min(self.cap);
        self.max_data = self.bytes_received + self.window;
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
    fn window_doubles_at_seventy_five_percent_consumption() {
        let mut fc = StreamRecvFlowControl::new(100);
        fc.on_bytes_received(74).unwrap();
        assert!(fc.maybe_increase_window().is_none());
        fc.on_bytes_received(1).unwrap();
        let new_max = fc.maybe_increase_window().unwrap();
        assert_eq!(new_max, 75 + 200);
    }

    #[test]
    fn window_growth_is_capped_at_sixteen_times_initial() {
        let mut fc = StreamRecvFlowControl::new(10);
        for _ in 0..10 {
            let consume = (fc.max_data() * 3 / 4).saturating_sub(fc.bytes_received) + 1;
            fc.on_bytes_received(consume).unwrap();
            fc.maybe_increase_window();
        }
        assert!(fc.window <= 10 * MAX_WINDOW_MULTIPLE);
    }
}
