//! Send pacing (RFC 9002 §7.7): spreads a congestion window's worth of
//! packets across a round trip instead of bursting it all at once.

use std::time::Duration;

/// Slow start is allowed a burst factor so the window can grow without
/// pacing starving it; RFC 9002 recommends roughly 1.25x.
const SLOW_START_BURST_NUMERATOR: u64 = 5;
const SLOW_START_BURST_DENOMINATOR: u64 = 4;

pub fn pacing_rate_bytes_per_sec(congestion_window: u64, smoothed_rtt: Duration, in_slow_start: bool) -> u64 {
    if smoothed_rtt.is_zero() {
        return u64::MAX;
    }
    let rate = (congestion_window as f64) / smoothed_rtt.as_secs_f64();
    let rate = if in_slow_start {
        rate * (SLOW_START_BURST_NUMERATOR as f64) / (SLOW_START_BURST_DENOMINATOR as f64)
    } else {
        rate
    };
    rate as u64
}

/// Minimum spacing between two packets of `packet_size` bytes at `rate`
/// bytes/sec, so the caller can schedule the next send.
pub fn interval_for(packet_size: u64, rate_bytes_per_sec: u64) -> Duration {
    if rate_bytes_per_sec == 0 {
        return Duration::MAX;
    }
    Duration::from_secs_f64(packet_size as f64 / rate_bytes_per_sec as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_gets_a_burst_allowance_over_steady_state() {
        let cwnd = 120_000;
        let rtt = Duration::from_millis(100);
        let burst = pacing_rate_bytes_per_sec(cwnd, rtt, true);
        let steady = pacing_rate_bytes_per_sec(cwnd, rtt, false);
        assert!(burst > steady);
    }

    #[test]
    fn interval_scales_inversely_with_rate() {
        let fast = interval_for(1200, 1_200_000);
        let slow = interval_for(1200, 120_000);
        assert!(slow > fast);
    }
}
