//! RTT estimation (RFC 9002 §5): EWMA-smoothed RTT and variance, used by
//! both loss detection's time threshold and the PTO timer.

use std::time::Duration;

/// RFC 9002 §5.2's timer granularity floor.
pub const GRANULARITY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RttEstimator {
    max_ack_delay: Duration,
    latest_rtt: Duration,
    min_rtt: Option<Duration>,
    smoothed_rtt: Duration,
    rttvar: Duration,
    first_sample_taken: bool,
}

impl RttEstimator {
    pub fn new(max_ack_delay: Duration) -> Self {
        Self {
            max_ack_delay,
            latest_rtt: Duration::ZERO,
            min_rtt: None,
            smoothed_rtt: Duration::ZERO,
            rttvar: Duration::ZERO,
            first_sample_taken: false,
        }
    }

    pub fn smoothed(&self) -> Duration {
        self.smoothed_rtt
    }

    pub fn var(&self) -> Duration {
        self.rttvar
    }

    pub fn min(&self) -> Duration {
        self.min_rtt.unwrap_or(Duration::ZERO)
    }

    pub fn latest(&self) -> Duration {
        self.latest_rtt
    }

    /// §5.3: `rtt_sample` is the raw measurement; `ack_delay` is the
    /// peer-reported delay, already capped by the caller at the peer's
    /// advertised `max_ack_delay` once the handshake is confirmed.
    pub fn update(&mut self, rtt_sample: Duration, ack_delay: Duration) {
        self.latest_rtt = rtt_sample;
        self.min_rtt = Some(self.min_rtt.map_or(rtt_sample, |m| m.min(rtt_sample)));

        let capped_delay = ack_delay.min(self.max_ack_delay);
        let adjusted = if rtt_sample >= self.min() + capped_delay {
            rtt_sample - capped_delay
        } else {
            rtt_sample
        };

        if !self.first_sample_taken {
            self.first_sample_taken = true;
            self.smoothed_rtt = adjusted;
            self.rttvar = adjusted / 2;
            return;
        }

        let diff = if self.smoothed_rtt > adjusted {
            self.smoothed_rtt - adjusted
        } else {
            adjusted - self.smoothed_rtt
        };
        self.rttvar = (self.rttvar * 3 + diff) / 4;
        self.smoothed_rtt = (self.smoothed_rtt * 7 + adjusted) / 8;
    }

    /// RFC 9002 §6.2.1's PTO period for a packet number space, excluding
    /// the exponential backoff factor the caller applies per consecutive
    /// PTO.
    pub fn pto_base_period(&self) -> Duration {
        self.smoothed_rtt + (self.rttvar * 4).max(GRANULARITY) + self.max_ack_delay
    }

    pub fn has_sample(&self) -> bool {
        self.first_sample_taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_smoothed_and_half_variance() {
        let mut rtt = RttEstimator::new(Duration::from_millis(25));
        rtt.update(Duration::from_millis(100), Duration::ZERO);
        assert_eq!(rtt.smoothed(), Duration::from_millis(100));
        assert_eq!(rtt.var(), Duration::from_millis(50));
    }

    #[test]
    fn ack_delay_is_subtracted_when_it_does_not_underflow_min_rtt() {
        let mut rtt = RttEstimator::new(Duration::from_millis(25));
        rtt.update(Duration::from_millis(100), Duration::ZERO);
        rtt.update(Duration::from_millis(120), Duration::from_millis(10));
        // adjusted = 120 - 10 = 110; smoothed moves toward it
        assert!(rtt.smoothed() > Duration::from_millis(100));
        assert!(rtt.smoothed() < Duration::from_millis(110));
    }

    #[test]
    fn ack_delay_is_capped_at_max_ack_delay() {
        let mut rtt = RttEstimator::new(Duration::from_millis(5));
        rtt.update(Duration::from_millis(100), Duration::ZERO);
        rtt.update(Duration::from_millis(50), Duration::from_millis(40));
        // only 5ms (the cap) is subtracted, not 40ms
        assert!(rtt.latest() == Duration::from_millis(50));
    }
}
