//! Send-side stream state machine (§4.9, RFC 9000 §3.1): Ready -> Send ->
//! Data Sent -> Data Recvd, or Ready/Send -> Reset Sent -> Reset Recvd.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::packet::frame::{Frame, StreamFrame};
use crate::stream::id::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Send,
    DataSent,
    DataRecvd,
    ResetSent,
    ResetRecvd,
}

pub struct SendStream {
    id: StreamId,
    state: SendState,
    unsent: VecDeque<u8>,
    /// Offset of the next byte not yet placed into a frame.
    next_offset: u64,
    /// Flow-control limit the peer has granted us (MAX_STREAM_DATA).
    max_data: u64,
    fin_requested: bool,
    fin_sent: bool,
    acked_through: u64,
}

impl SendStream {
    pub fn new(id: StreamId, initial_max_data: u64) -> Self {
        Self {
            id,
            state: SendState::Ready,
            unsent: VecDeque::new(),
            next_offset: 0,
            max_data: initial_max_data,
            fin_requested: false,
            fin_sent: false,
            acked_through: 0,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn set_max_data(&mut self, v: u64) {
        self.max_data = self.max_data.max(v);
    }

    pub fn max_data(&self) -> u64 {
        self.max_data
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.fin_requested || matches!(self.state, SendState::ResetSent | SendState::ResetRecvd) {
            return;
        }
        self.unsent.extend(data);
        if self.state == SendState::Ready {
            self.state = SendState::Send;
        }
    }

    pub fn finish(&mut self) {
        self.fin_requested = true;
    }

    /// True when the stream cannot place more bytes on the wire right now
    /// because the peer's stream-level flow-control window is exhausted.
    pub fn is_blocked(&self) -> bool {
        !self.unsent.is_empty() && self.next_offset >= self.max_data
    }

    /// Pulls up to `max_len` bytes of pending data into a STREAM frame,
    /// respecting the peer's flow-control limit. Returns `None` if there's
    /// nothing eligible to send right now.
    pub fn emit_frame(&mut self, max_len: usize) -> Option<Frame> {
        if matches!(self.state, SendState::ResetSent | SendState::ResetRecvd) {
            return None;
        }
        let budget = self.max_data.saturating_sub(self.next_offset) as usize;
        let take = max_len.min(budget).min(self.unsent.len());
        let fin = self.fin_requested && take == self.unsent.len();

        if take == 0 && !fin {
            return None;
        }

        let data: Vec<u8> = self.unsent.drain(..take).collect();
        let offset = self.next_offset;
        self.next_offset += take as u64;

        if fin {
            self.fin_sent = true;
            self.state = SendState::DataSent;
        } else if self.state == SendState::Ready {
            self.state = SendState::Send;
        }

        Some(Frame::Stream(StreamFrame { stream_id: self.id.value(), offset, fin, data: Bytes::from(data) }))
    }

    /// Marks `[offset, offset+len)` as acknowledged; once every sent byte
    /// (and FIN, if sent) has been acked the stream retires.
    pub fn on_ack(&mut self, offset: u64, len: u64, fin_acked: bool) {
        let end = offset + len;
        if end > self.acked_through {
            self.acked_through = end;
        }
        if self.fin_sent && fin_acked && self.acked_through >= self.next_offset {
            self.state = SendState::DataRecvd;
        }
    }

    pub fn reset(&mut self) {
        self.unsent.clear();
        self.state = SendState::ResetSent;
    }

    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetRecvd;
        }
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
    fn emits_a_frame_with_correct_offset_and_fin() {
        let mut s = SendStream::new(stream_id(), 1000);
        s.write(b"hello");
        s.finish();
        let frame = s.emit_frame(100).unwrap();
        match frame {
            Frame::Stream(f) => {
                assert_eq!(f.offset, 0);
                assert!(f.fin);
                assert_eq!(&f.data[..], b"hello");
            }
            _ => panic!("expected stream frame"),
        }
        assert_eq!(s.state(), SendState::DataSent);
    }

    #[test]
    fn respects_peer_flow_control_limit() {
        let mut s = SendStream::new(stream_id(), 3);
        s.write(b"hello");
        let frame = s.emit_frame(100).unwrap();
        match frame {
            Frame::Stream(f) => assert_eq!(&f.data[..], b"hel"),
            _ => panic!(),
        }
        assert!(s.is_blocked());
    }

    #[test]
    fn ack_of_all_data_and_fin_retires_the_stream() {
        let mut s = SendStream::new(stream_id(), 1000);
        s.write(b"hi");
        s.finish();
        let frame = s.emit_frame(100).unwrap();
        let (offset, len, fin) = match frame {
            Frame::Stream(f) => (f.offset, f.data.len() as u64, f.fin),
            _ => panic!(),
        };
        s.on_ack(offset, len, fin);
        assert_eq!(s.state(), SendState::DataRecvd);
    }

    #[test]
    fn splits_large_writes_across_multiple_frames() {
        let mut s = SendStream::new(stream_id(), 1000);
        s.write(&[1u8; 10]);
        let first = s.emit_frame(4).unwrap();
        let second = s.emit_frame(4).unwrap();
        match (first, second) {
            (Frame::Stream(a), Frame::Stream(b)) => {
                assert_eq!(a.offset, 0);
                assert_eq!(b.offset, 4);
            }
            _ => panic!(),
        }
    }
}
