//! Out-of-order byte-stream reassembly, shared by the stream engine's
//! receive side (§4.9) and the TLS adapter's per-level CRYPTO buffers
//! (§4.5), which resolves the Open Question about out-of-order CRYPTO by
//! reassembling it the same way STREAM data is reassembled instead of
//! treating a gap as a protocol violation.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::result::{ConnectionError, QuicheResult};

/// Classification of an incoming fragment against the current contiguous
/// offset, per §4.9:
/// - `o == recvOffset`: append and drain
/// - `o > recvOffset`: buffer out of order
/// - `o + len <= recvOffset`: duplicate, ignore
/// - partial overlap: accept the tail past recvOffset
#[derive(Debug)]
pub struct Reassembler {
    recv_offset: u64,
    out_of_order: BTreeMap<u64, Vec<u8>>,
    ready: VecDeque<u8>,
    final_size: Option<u64>,
    /// Highest `offset + len` observed across all fragments, including
    /// duplicates/retransmits — used by flow control to avoid
    /// double-counting retransmitted bytes (§4.9).
    high_water: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            recv_offset: 0,
            out_of_order: BTreeMap::new(),
            ready: VecDeque::new(),
            final_size: None,
            high_water: 0,
        }
    }

    pub fn recv_offset(&self) -> u64 {
        self.recv_offset
    }

    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Inserts a fragment. Returns the number of bytes that newly count
    /// against flow control (`max(offset+len, high_water) - high_water`).
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> QuicheResult<u64> {
        let end = offset + data.len() as u64;
        if let Some(final_size) = self.final_size {
            if end > final_size {
                return Err(ConnectionError::StreamState(0).into());
            }
        }

        let newly_counted = end.saturating_sub(self.high_water);
        self.high_water = self.high_water.max(end);

        if end <= self.recv_offset {
            return Ok(newly_counted); // pure duplicate
        }

        let (offset, data) = if offset < self.recv_offset {
            let skip = (self.recv_offset - offset) as usize;
            (self.recv_offset, &data[skip..])
        } else {
            (offset, data)
        };

        if offset == self.recv_offset {
            self.ready.extend(data);
            self.recv_offset += data.len() as u64;
            self.drain_buffered();
        } else {
            self.out_of_order.entry(offset).or_insert_with(|| data.to_vec());
        }

        Ok(newly_counted)
    }

    fn drain_buffered(&mut self) {
        loop {
            let Some((&offset, _)) = self.out_of_order.iter().next() else { break };
            if offset > self.recv_offset {
                break;
            }
            let (_, buffered) = self.out_of_order.remove_entry(&offset).unwrap();
            if offset == self.recv_offset {
                self.ready.extend(buffered.iter());
                self.recv_offset += buffered.len() as u64;
            } else {
                // overlapping tail of a fragment we've already partly consumed
                let skip = (self.recv_offset - offset) as usize;
                if skip < buffered.len() {
                    self.ready.extend(&buffered[skip..]);
                    self.recv_offset += (buffered.len() - skip) as u64;
                }
            }
        }
    }

    pub fn set_final_size(&mut self, size: u64) -> QuicheResult<()> {
        if let Some(existing) = self.final_size {
            if existing != size {
                return Err(ConnectionError::StreamState(0).into());
            }
        }
        if size < self.high_water {
            return Err(ConnectionError::StreamState(0).into());
        }
        self.final_size = Some(size);
        Ok(())
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// True once every byte up to the final size has been delivered and
    /// the ready buffer is drained (stream recv side is then at EOF).
    pub fn is_finished(&self) -> bool {
        self.ready.is_empty() && self.final_size == Some(self.recv_offset)
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.ready.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.ready.pop_front().unwrap();
        }
        n
    }

    pub fn read_to_vec(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.ready.len());
        self.ready.drain(..n).collect()
    }

    pub fn has_ready_bytes(&self) -> bool {
        !self.ready.is_empty()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_out_of_order_fragments_in_order() {
        let mut r = Reassembler::new();
        r.insert(5, b"world").unwrap();
        r.insert(0, b"hello").unwrap();
        r.set_final_size(10).unwrap();
        let data = r.read_to_vec(100);
        assert_eq!(&data, b"helloworld");
        assert!(r.is_finished());
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let mut r = Reassembler::new();
        r.insert(0, b"hello").unwrap();
        let counted = r.insert(0, b"hello").unwrap();
        assert_eq!(counted, 0);
        assert_eq!(r.read_to_vec(100), b"hello");
    }

    #[test]
    fn partial_overlap_merges_tail_only() {
        let mut r = Reassembler::new();
        r.insert(0, b"hel").unwrap();
        r.insert(2, b"llo").unwrap();
        assert_eq!(r.read_to_vec(100), b"hello");
    }

    #[test]
    fn high_water_avoids_double_counting_retransmits() {
        let mut r = Reassembler::new();
        let first = r.insert(0, b"hello").unwrap();
        assert_eq!(first, 5);
        let retransmit = r.insert(0, b"hello").unwrap();
        assert_eq!(retransmit, 0);
        let extension = r.insert(3, b"loworld").unwrap();
        assert_eq!(extension, 5);
    }

    #[test]
    fn any_permutation_of_fragments_reassembles_correctly() {
        let chunks: &[(u64, &[u8])] = &[(0, b"aa"), (2, b"bb"), (4, b"cc"), (6, b"dd")];
        let perms = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
        ];
        for perm in perms {
            let mut r = Reassembler::new();
            for &i in &perm {
                let (off, data) = chunks[i];
                r.insert(off, data).unwrap();
            }
            r.set_final_size(8).unwrap();
            assert_eq!(r.read_to_vec(100), b"aabbccdd");
            assert!(r.is_finished());
        }
    }
}
