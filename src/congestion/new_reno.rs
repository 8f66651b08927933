//! NewReno congestion control (RFC 9002 §7): slow start, congestion
//! avoidance, and recovery, with the persistent-congestion reset from
//! `recovery::loss`.

use std::time::Instant;

pub const MAX_DATAGRAM_SIZE: u64 = 1200;
/// RFC 9002 §7.2: `min(10 * max_datagram_size, max(2 * max_datagram_size, 14720))`.
fn initial_window(mss: u64) -> u64 {
    (10 * mss).min((2 * mss).max(14720))
}
const MINIMUM_WINDOW_FACTOR: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    Recovery,
}

#[derive(Debug)]
pub struct NewReno {
    mss: u64,
    congestion_window: u64,
    ssthresh: u64,
    state: CongestionState,
    recovery_start_time: Option<Instant>,
}

impl NewReno {
    pub fn new(mss: u64) -> Self {
        Self {
            mss,
            congestion_window: initial_window(mss),
            ssthresh: u64::MAX,
            state: CongestionState::SlowStart,
            recovery_start_time: None,
        }
    }

    pub fn window(&self) -> u64 {
        self.congestion_window
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    pub fn is_congestion_limited(&self, bytes_in_flight: u64) -> bool {
        bytes_in_flight >= self.congestion_window
    }

    /// Call once per ACK frame with the total newly-acknowledged bytes and
    /// the send time of the most recent of those packets.
    pub fn on_packets_acked(&mut self, acked_bytes: u64, largest_acked_sent_time: Instant) {
        if let Some(recovery_start) = self.recovery_start_time {
            if largest_acked_sent_time > recovery_start {
                self.state = CongestionState::CongestionAvoidance;
                self.recovery_start_time = None;
            } else {
                return; // still inside the recovery period, window is frozen
            }
        }

        match self.state {
            CongestionState::SlowStart => {
                self.congestion_window += acked_bytes;
                if self.congestion_window >= self.ssthresh {
                    self.state = CongestionState::CongestionAvoidance;
                }
            }
            CongestionState::CongestionAvoidance => {
                self.congestion_window += self.mss * acked_bytes / self.congestion_window;
            }
            CongestionState::Recovery => unreachable!("handled by the recovery_start_time branch above"),
        }
    }

    /// Call when a packet is declared lost, with its send time.
    pub fn on_congestion_event(&mut self, sent_time: Instant, now: Instant) {
        if let Some(recovery_start) = self.recovery_start_time {
            if sent_time <= recovery_start {
                return; // already reacted to a loss in this recovery period
            }
        }
        self.recovery_start_time = Some(now);
        self.ssthresh = (self.congestion_window / 2).max(MINIMUM_WINDOW_FACTOR * self.mss);
        self.congestion_window = self.ssthresh;
        self.state = CongestionState::Recovery;
    }

    /// RFC 9002 §7.6.2: collapse to the minimum window on persistent
    /// congestion, discarding slow start entirely.
    pub fn on_persistent_congestion(&mut self) {
        self.congestion_window = MINIMUM_WINDOW_FACTOR * self.mss;
        self.recovery_start_time = None;
        self.state = CongestionState::SlowStart;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn slow_start_grows_window_by_acked_bytes() {
        let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
        let before = cc.window();
        let now = Instant::now();
        cc.on_packets_acked(MAX_DATAGRAM_SIZE, now);
        assert_eq!(cc.window(), before + MAX_DATAGRAM_SIZE);
        assert_eq!(cc.state(), CongestionState::SlowStart);
    }

    #[test]
    fn loss_halves_window_and_enters_recovery() {
        let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
        let window_before = cc.window();
        let now = Instant::now();
        cc.on_congestion_event(now, now);
        assert_eq!(cc.state(), CongestionState::Recovery);
        assert_eq!(cc.window(), (window_before / 2).max(2 * MAX_DATAGRAM_SIZE));
    }

    #[test]
    fn second_loss_within_the_same_recovery_period_is_ignored() {
        let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
        let now = Instant::now();
        cc.on_congestion_event(now, now);
        let window_after_first = cc.window();
        cc.on_congestion_event(now, now + Duration::from_millis(1));
        assert_eq!(cc.window(), window_after_first);
    }

    #[test]
    fn ack_after_recovery_period_exits_to_congestion_avoidance() {
        let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
        let now = Instant::now();
        cc.on_congestion_event(now, now);
        let later = now + Duration::from_millis(50);
        cc.on_packets_acked(MAX_DATAGRAM_SIZE, later);
        assert_eq!(cc.state(), CongestionState::CongestionAvoidance);
    }

    #[test]
    fn persistent_congestion_drops_to_minimum_window() {
        let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
        cc.on_persistent_congestion();
        assert_eq!(cc.window(), 2 * MAX_DATAGRAM_SIZE);
        assert_eq!(cc.state(), CongestionState::SlowStart);
    }
}
