//! Packet-number truncation and reconstruction (RFC 9000 §17.1, Appendix A.3).

/// Smallest number of bytes needed to represent `full` relative to the
/// largest packet number the peer has acknowledged, per RFC 9000 §17.1:
/// the encoder must use enough bits that the window covers at least one
/// full epoch beyond `full - largest_acked`.
pub fn encode_length(full: u64, largest_acked: Option<u64>) -> usize {
    let num_unacked = match largest_acked {
        Some(la) => full.saturating_sub(la),
        None => full + 1,
    };
    // need (bits in num_unacked) + 1 bit of headroom, rounded up to bytes
    let bits_needed = 64 - num_unacked.leading_zeros() as usize + 1;
    let bytes_needed = bits_needed.div_ceil(8).max(1);
    bytes_needed.min(4)
}

pub fn truncate(full: u64, len: usize) -> u32 {
    let mask = if len >= 4 { u32::MAX as u64 } else { (1u64 << (8 * len)) - 1 };
    (full & mask) as u32
}

/// RFC 9000 Appendix A.3 window algorithm: reconstructs the full 62-bit
/// packet number nearest to `expected = largest_acked + 1` that truncates
/// to `truncated` under an encoding of `pn_len` bytes.
pub fn reconstruct(largest_acked: Option<u64>, truncated: u32, pn_len: usize) -> u64 {
    let expected = largest_acked.map(|x| x + 1).unwrap_or(0);
    let pn_nbits = 8 * pn_len as u32;
    let pn_win: u64 = 1u64 << pn_nbits;
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let candidate = (expected & !pn_mask) | (truncated as u64 & pn_mask);

    if candidate.checked_add(pn_hwin).map(|v| v <= expected).unwrap_or(false)
        && candidate < (1u64 << 62) - pn_win
    {
        candidate + pn_win
    } else if candidate > expected + pn_hwin && candidate >= pn_win {
        candidate - pn_win
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruction_round_trips_within_window() {
        for n in 1..=4usize {
            let window = 1u64 << (8 * n - 1);
            let samples: [i64; 5] = [0, 1, -1, (window as i64) - 1, -(window as i64)];
            let largest: u64 = 1_000_000;
            for &delta in &samples {
                let full = (largest as i64 + delta).max(0) as u64;
                if full < (largest.saturating_sub(window)) || full >= largest + window {
                    continue;
                }
                let truncated = truncate(full, n);
                let reconstructed = reconstruct(Some(largest), truncated, n);
                assert_eq!(reconstructed, full, "n={n} delta={delta}");
            }
        }
    }

    #[test]
    fn first_packet_reconstructs_from_zero() {
        assert_eq!(reconstruct(None, 0, 1), 0);
        assert_eq!(reconstruct(None, 2, 1), 2);
    }

    #[test]
    fn encode_length_grows_with_distance_from_largest_acked() {
        assert_eq!(encode_length(5, Some(4)), 1);
        assert_eq!(encode_length(1000, Some(0)), 2);
    }
}
