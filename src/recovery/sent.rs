//! Sent-packet bookkeeping (RFC 9002 §B): what's outstanding per packet
//! number space, so loss detection and the congestion controller can act
//! on ACKs and declared losses.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::packet::frame::Frame;

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub packet_number: u64,
    pub time_sent: Instant,
    pub ack_eliciting: bool,
    pub in_flight: bool,
    pub size: usize,
    /// Frames carried, kept so loss triggers a resend of the same data.
    pub frames: Vec<Frame>,
}

#[derive(Debug, Default)]
pub struct SentPacketTracker {
    sent: BTreeMap<u64, SentPacket>,
    pub bytes_in_flight: usize,
}

impl SentPacketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_packet_sent(&mut self, packet: SentPacket) {
        if packet.in_flight {
            self.bytes_in_flight += packet.size;
        }
        self.sent.insert(packet.packet_number, packet);
    }

    /// Removes every packet acknowledged by `ranges` (inclusive
    /// `(largest, smallest)` pairs) and returns them, largest-acked last.
    pub fn on_ack_ranges(&mut self, ranges: &[(u64, u64)]) -> Vec<SentPacket> {
        let mut acked = Vec::new();
        for &(largest, smallest) in ranges.iter().rev() {
            for pn in smallest..=largest {
                if let Some(packet) = self.sent.remove(&pn) {
                    if packet.in_flight {
                        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size);
                    }
                    acked.push(packet);
                }
            }
        }
        acked
    }

    /// All still-outstanding packets with number `<= upto`, for
    /// packet-threshold loss detection.
    pub fn outstanding_up_to(&self, upto: u64) -> impl Iterator<Item = &SentPacket> {
        self.sent.range(..=upto).map(|(_, p)| p)
    }

    pub fn remove(&mut self, pn: u64) -> Option<SentPacket> {
        let packet = self.sent.remove(&pn)?;
        if packet.in_flight {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size);
        }
        Some(packet)
    }

    pub fn get(&self, pn: u64) -> Option<&SentPacket> {
        self.sent.get(&pn)
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn oldest_in_flight_ack_eliciting(&self) -> Option<&SentPacket> {
        self.sent.values().find(|p| p.ack_eliciting && p.in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pn: u64, size: usize) -> SentPacket {
        SentPacket {
            packet_number: pn,
            time_sent: Instant::now(),
            ack_eliciting: true,
            in_flight: true,
            size,
            frames: vec![],
        }
    }

    #[test]
    fn acking_a_range_removes_and_returns_those_packets() {
        let mut tracker = SentPacketTracker::new();
        for pn in 0..5 {
            tracker.on_packet_sent(packet(pn, 100));
        }
        assert_eq!(tracker.bytes_in_flight, 500);

        let acked = tracker.on_ack_ranges(&[(4, 2)]);
        assert_eq!(acked.len(), 3);
        assert_eq!(tracker.bytes_in_flight, 200);
        assert!(tracker.get(0).is_some());
        assert!(tracker.get(3).is_none());
    }

    #[test]
    fn outstanding_up_to_only_returns_unacked_packets_at_or_below_a_bound() {
        let mut tracker = SentPacketTracker::new();
        for pn in 0..5 {
            tracker.on_packet_sent(packet(pn, 10));
        }
        let below_3: Vec<_> = tracker.outstanding_up_to(2).map(|p| p.packet_number).collect();
        assert_eq!(below_3, vec![0, 1, 2]);
    }
}
