//! Ties a stream's send and/or receive half together and exposes the
//! directional API an application actually uses (§4.9).

use crate::stream::id::{Directionality, StreamId};
use crate::stream::recv::RecvStream;
use crate::stream::send::SendStream;

pub enum Stream {
    Bidi { send: SendStream, recv: RecvStream },
    SendOnly(SendStream),
    RecvOnly(RecvStream),
}

impl Stream {
    pub fn new(id: StreamId, send_max_data: u64, recv_max_data: u64, local_directionality: Directionality) -> Self {
        match (id.directionality(), local_directionality) {
            (Directionality::Bidi, _) => Stream::Bidi {
                send: SendStream::new(id, send_max_data),
                recv: RecvStream::new(id, recv_max_data),
            },
            (Directionality::Uni, Directionality::Bidi) => {
                // this shouldn't happen: uni stream id but bidi request
                Stream::SendOnly(SendStream::new(id, send_max_data))
            }
            (Directionality::Uni, Directionality::Uni) => Stream::SendOnly(SendStream::new(id, send_max_data)),
        }
    }

    pub fn new_uni_recv(id: StreamId, recv_max_data: u64) -> Self {
        Stream::RecvOnly(RecvStream::new(id, recv_max_data))
    }

    pub fn send(&mut self) -> Option<&mut SendStream> {
        match self {
            Stream::Bidi { send, .. } | Stream::SendOnly(send) => Some(send),
            Stream::RecvOnly(_) => None,
        }
    }

    pub fn recv(&mut self) -> Option<&mut RecvStream> {
        match self {
            Stream::Bidi { recv, .. } | Stream::RecvOnly(recv) => Some(recv),
            Stream::SendOnly(_) => None,
        }
    }

    pub fn id(&self) -> StreamId {
        match self {
            Stream::Bidi { send, .. } => send.id(),
            Stream::SendOnly(s) => s.id(),
            Stream::RecvOnly(r) => r.id(),
        }
    }
}
