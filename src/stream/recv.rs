//! Receive-side stream state machine (§4.9, RFC 9000 §3.2): Recv ->
//! (Size Known) -> Data Recvd -> Data Read, or Recv -> Reset Recvd ->
//! Reset Read on RESET_STREAM.

use crate::result::{ConnectionError, QuicheResult};
use crate::stream::id::StreamId;
use crate::stream::reassembly::Reassembler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Recv,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

pub struct RecvStream {
    id: StreamId,
    reassembler: Reassembler,
    state: RecvState,
    /// Flow-control limit we've granted the peer for this stream
    /// (MAX_STREAM_DATA we've sent); enforced against incoming offsets.
    max_data: u64,
    reset_error: Option<u64>,
}

impl RecvStream {
    pub fn new(id: StreamId, initial_max_data: u64) -> Self {
        Self {
            id,
            reassembler: Reassembler::new(),
            state: RecvState::Recv,
            max_data: initial_max_data,
            reset_error: None,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> RecvState {
        self.state
    }

    pub fn set_max_data(&mut self, v: u64) {
        self.max_data = self.max_data.max(v);
    }

    pub fn max_data(&self) -> u64 {
        self.max_data
    }

    /// Applies a STREAM frame's payload. Returns the number of newly
    /// flow-controlled bytes, for the connection-level accountant.
    pub fn on_stream_frame(&mut self, offset: u64, data: &[u8], fin: bool) -> QuicheResult<u64> {
        if matches!(self.state, RecvState::ResetRecvd | RecvState::ResetRead) {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        if end > self.max_data {
            return Err(ConnectionError::FlowControl { sent: end, limit: self.max_data }.into());
        }
        let newly_counted = self.reassembler.insert(offset, data)?;
        if fin {
            self.reassembler.set_final_size(end)?;
        }
        if self.reassembler.is_finished() {
            self.state = RecvState::DataRecvd;
        }
        Ok(newly_counted)
    }

    pub fn on_reset(&mut self, final_size: u64, error_code: u64) -> QuicheResult<()> {
        if final_size > self.max_data {
            return Err(ConnectionError::FlowControl { sent: final_size, limit: self.max_data }.into());
        }
        self.reset_error = Some(error_code);
        self.state = RecvState::ResetRecvd;
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.reassembler.read(buf);
        if self.state == RecvState::DataRecvd && !self.reassembler.has_ready_bytes() {
            self.state = RecvState::DataRead;
        }
        n
    }

    pub fn take_reset(&mut self) -> Option<u64> {
        if self.state == RecvState::ResetRecvd {
            self.state = RecvState::ResetRead;
            return self.reset_error;
        }
        None
    }

    pub fn highest_offset_seen(&self) -> u64 {
        self.reassembler.high_water()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side::Side;
    use crate::stream::id::Directionality;

    fn stream_id() -> StreamId {
        StreamId::from_index(0, Side::Client, Directionality::Bidi)
    }

    #[test]
    fn delivers_in_order_bytes() {
        let mut s = RecvStream::new(stream_id(), 100);
        s.on_stream_frame(0, b"hello", false).unwrap();
        let mut buf = [0u8; 5];
        let n = s.read(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn fin_transitions_to_data_recvd_then_data_read() {
        let mut s = RecvStream::new(stream_id(), 100);
        s.on_stream_frame(0, b"hi", true).unwrap();
        assert_eq!(s.state(), RecvState::DataRecvd);
        let mut buf = [0u8; 2];
        s.read(&mut buf);
        assert_eq!(s.state(), RecvState::DataRead);
    }

    #[test]
    fn exceeding_max_data_is_a_flow_control_error() {
        let mut s = RecvStream::new(stream_id(), 4);
        let err = s.on_stream_frame(0, b"hello", false).unwrap_err();
        assert!(matches!(err, crate::result::QuicheError::Connection(ConnectionError::FlowControl { .. })));
    }

    #[test]
    fn reset_is_surfaced_once() {
        let mut s = RecvStream::new(stream_id(), 100);
        s.on_reset(10, 42).unwrap();
        assert_eq!(s.take_reset(), Some(42));
        assert_eq!(s.take_reset(), None);
    }
}
