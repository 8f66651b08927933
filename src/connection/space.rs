//! Per-packet-number-space bookkeeping (RFC 9000 §12.3, RFC 9002 §A.1):
//! each of Initial/Handshake/Application tracks its own sent-packet
//! history, next outgoing packet number, and received-packet record for
//! ACK generation, independent of the other spaces.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::recovery::sent::SentPacketTracker;

pub struct PacketNumberSpaceState {
    pub next_packet_number: u64,
    pub sent: SentPacketTracker,
    /// Packet numbers received but not yet acknowledged, for building the
    /// next outgoing ACK frame's ranges.
    pub received: BTreeSet<u64>,
    pub largest_acked_by_peer: Option<u64>,
    pub largest_received: Option<u64>,
    pub ack_eliciting_since_last_ack: u32,
    pub loss_time: Option<Instant>,
    pub pto_count: u32,
    /// Set once an ack-eliciting packet is received and no ACK has been
    /// sent yet for it; drives the max_ack_delay timer.
    pub ack_pending: bool,
}

impl PacketNumberSpaceState {
    pub fn new() -> Self {
        Self {
            next_packet_number: 0,
            sent: SentPacketTracker::new(),
            received: BTreeSet::new(),
            largest_acked_by_peer: None,
            largest_received: None,
            ack_eliciting_since_last_ack: 0,
            loss_time: None,
            pto_count: 0,
            ack_pending: false,
        }
    }

    pub fn allocate_packet_number(&mut self) -> u64 {
        let pn = self.next_packet_number;
        self.next_packet_number += 1;
        pn
    }

    pub fn on_packet_received(&mut self, pn: u64, ack_eliciting: bool) {
        self.received.insert(pn);
        self.largest_received = Some(self.largest_received.map_or(pn, |l| l.max(pn)));
        if ack_eliciting {
            self.ack_eliciting_since_last_ack += 1;
            self.ack_pending = true;
        }
    }

    /// Builds descending (largest, smallest) inclusive ranges covering all
    /// received, unacknowledged packet numbers, for an outgoing ACK frame.
    pub fn ack_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        let mut iter = self.received.iter().rev().peekable();
        while let Some(&start) = iter.next() {
            let mut end = start;
            while let Some(&&next) = iter.peek() {
                if next + 1 == end {
                    end = next;
                    iter.next();
                } else {
                    break;
                }
            }
            ranges.push((start, end));
        }
        ranges
    }

    pub fn on_ack_sent(&mut self) {
        self.ack_eliciting_since_last_ack = 0;
        self.ack_pending = false;
    }
}

impl Default for PacketNumberSpaceState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_ranges_coalesce_contiguous_runs() {
        let mut space = PacketNumberSpaceState::new();
        for pn in [1, 2, 3, 5, 6, 9] {
            space.on_packet_received(pn, true);
        }
        assert_eq!(space.ack_ranges(), vec![(9, 9), (6, 5), (3, 1)]);
    }

    #[test]
    fn packet_numbers_allocate_monotonically() {
        let mut space = PacketNumberSpaceState::new();
        assert_eq!(space.allocate_packet_number(), 0);
        assert_eq!(space.allocate_packet_number(), 1);
    }
}
