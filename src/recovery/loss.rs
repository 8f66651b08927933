//! Loss detection (RFC 9002 §6): packet-threshold and time-threshold
//! detection, PTO computation with exponential backoff, and the
//! persistent-congestion check that resets the congestion controller.

use std::time::{Duration, Instant};

use crate::recovery::rtt::{RttEstimator, GRANULARITY};
use crate::recovery::sent::{SentPacket, SentPacketTracker};

pub const PACKET_THRESHOLD: u64 = 3;
const TIME_THRESHOLD_NUMERATOR: u32 = 9;
const TIME_THRESHOLD_DENOMINATOR: u32 = 8;
pub const PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

pub struct LossDetectionResult {
    pub lost: Vec<SentPacket>,
    /// When set, the earliest time a currently-outstanding packet would
    /// be declared lost by the time threshold alone; drives the loss
    /// detection timer for packets not yet past it.
    pub loss_time: Option<Instant>,
}

fn time_threshold(rtt: &RttEstimator) -> Duration {
    let base = rtt.latest().max(rtt.smoothed());
    (base * TIME_THRESHOLD_NUMERATOR / TIME_THRESHOLD_DENOMINATOR).max(GRANULARITY)
}

/// Scans every outstanding packet `<= largest_acked` in `tracker` for the
/// packet-threshold and time-threshold conditions (§6.1), removing and
/// returning the ones that are lost.
pub fn detect_losses(
    tracker: &mut SentPacketTracker,
    largest_acked: u64,
    rtt: &RttEstimator,
    now: Instant,
) -> LossDetectionResult {
    let loss_delay = time_threshold(rtt);
    let lost_send_time = now.checked_sub(loss_delay);

    let candidates: Vec<u64> = tracker
        .outstanding_up_to(largest_acked)
        .map(|p| p.packet_number)
        .collect();

    let mut lost = Vec::new();
    let mut loss_time = None;

    for pn in candidates {
        let packet = tracker.get(pn).expect("just collected from this tracker");
        let by_packet_threshold = pn + PACKET_THRESHOLD <= largest_acked;
        let by_time_threshold = lost_send_time.map(|t| packet.time_sent <= t).unwrap_or(false);

        if by_packet_threshold || by_time_threshold {
            lost.push(tracker.remove(pn).expect("packet was just looked up"));
        } else {
            let candidate_loss_time = packet.time_sent + loss_delay;
            loss_time = Some(loss_time.map_or(candidate_loss_time, |t: Instant| t.min(candidate_loss_time)));
        }
    }

    LossDetectionResult { lost, loss_time }
}

/// RFC 9002 §6.2.1 PTO period for one packet number space, with the
/// exponential backoff applied for `pto_count` consecutive expirations.
pub fn pto_period(rtt: &RttEstimator, pto_count: u32) -> Duration {
    rtt.pto_base_period() * (1u32 << pto_count.min(16))
}

/// True when every packet in `lost` was sent within one persistent
/// congestion period of each other, spanning at least that period
/// (RFC 9002 §7.6) — the congestion controller resets to the minimum
/// window rather than just halving.
pub fn is_persistent_congestion(lost: &[SentPacket], rtt: &RttEstimator) -> bool {
    if lost.len() < 2 {
        return false;
    }
    let period = (rtt.smoothed() + (rtt.var() * 4).max(GRANULARITY) + Duration::ZERO)
        * PERSISTENT_CONGESTION_THRESHOLD;
    let first = lost.first().unwrap().time_sent;
    let last = lost.last().unwrap().time_sent;
    last.saturating_duration_since(first) >= period
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_at(pn: u64, time_sent: Instant) -> SentPacket {
        SentPacket { packet_number: pn, time_sent, ack_eliciting: true, in_flight: true, size: 100, frames: vec![] }
    }

    #[test]
    fn packet_threshold_declares_loss_three_behind_largest_acked() {
        let mut tracker = SentPacketTracker::new();
        let now = Instant::now();
        for pn in 0..5 {
            tracker.on_packet_sent(packet_at(pn, now));
        }
        let rtt = RttEstimator::new(Duration::from_millis(25));
        let result = detect_losses(&mut tracker, 4, &rtt, now);
        // pn 0 and 1 are >= 3 behind largest_acked(4) -> lost; pn 2,3 are not
        let lost_pns: Vec<_> = result.lost.iter().map(|p| p.packet_number).collect();
        assert!(lost_pns.contains(&0));
        assert!(lost_pns.contains(&1));
        assert!(!lost_pns.contains(&3));
    }

    #[test]
    fn time_threshold_declares_loss_after_the_delay_elapses() {
        let mut tracker = SentPacketTracker::new();
        let now = Instant::now();
        tracker.on_packet_sent(packet_at(0, now));
        tracker.on_packet_sent(packet_at(1, now));

        let mut rtt = RttEstimator::new(Duration::from_millis(25));
        rtt.update(Duration::from_millis(100), Duration::ZERO);

        let later = now + Duration::from_millis(200);
        let result = detect_losses(&mut tracker, 1, &rtt, later);
        assert_eq!(result.lost.len(), 2);
    }

    #[test]
    fn persistent_congestion_requires_losses_spanning_the_full_period() {
        let rtt_with_sample = {
            let mut rtt = RttEstimator::new(Duration::from_millis(25));
            rtt.update(Duration::from_millis(100), Duration::ZERO);
            rtt
        };
        let now = Instant::now();
        let close_together = vec![packet_at(0, now), packet_at(1, now + Duration::from_millis(10))];
        assert!(!is_persistent_congestion(&close_together, &rtt_with_sample));

        let far_apart = vec![packet_at(0, now), packet_at(1, now + Duration::from_secs(5))];
        assert!(is_persistent_congestion(&far_apart, &rtt_with_sample));
    }
}
