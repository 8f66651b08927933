//! Stream collection management (§4.9): allocates locally-initiated stream
//! IDs, creates streams lazily on first remote frame, and tracks the
//! peer-advertised concurrency limits.

use std::collections::HashMap;

use crate::result::{ConnectionError, QuicheResult};
use crate::side::Side;
use crate::stream::id::{Directionality, StreamId};
use crate::stream::Stream;

pub struct StreamManager {
    side: Side,
    streams: HashMap<StreamId, Stream>,
    next_bidi_index: u64,
    next_uni_index: u64,
    /// Peer-advertised concurrency limits (INITIAL_MAX_STREAMS_*, updated
    /// by MAX_STREAMS frames).
    peer_max_streams_bidi: u64,
    peer_max_streams_uni: u64,
    default_send_max_data: u64,
    default_recv_max_data: u64,
}

impl StreamManager {
    pub fn new(side: Side, peer_max_streams_bidi: u64, peer_max_streams_uni: u64, default_send_max_data: u64, default_recv_max_data: u64) -> Self {
        Self {
            side,
            streams: HashMap::new(),
            next_bidi_index: 0,
            next_uni_index: 0,
            peer_max_streams_bidi,
            peer_max_streams_uni,
            default_send_max_data,
            default_recv_max_data,
        }
    }

    pub fn on_max_streams_bidi(&mut self, v: u64) {
        self.peer_max_streams_bidi = self.peer_max_streams_bidi.max(v);
    }

    pub fn on_max_streams_uni(&mut self, v: u64) {
        self.peer_max_streams_uni = self.peer_max_streams_uni.max(v);
    }

    /// Opens the next locally-initiated stream of the given directionality,
    /// enforcing the peer's concurrency limit (§4.9, RFC 9000 §4.6).
    pub fn open_local(&mut self, dir: Directionality) -> QuicheResult<StreamId> {
        let (index, limit) = match dir {
            Directionality::Bidi => (self.next_bidi_index, self.peer_max_streams_bidi),
            Directionality::Uni => (self.next_uni_index, self.peer_max_streams_uni),
        };
        if index >= limit {
            return Err(ConnectionError::StreamState(index).into());
        }
        let id = StreamId::from_index(index, self.side, dir);
        match dir {
            Directionality::Bidi => self.next_bidi_index += 1,
            Directionality::Uni => self.next_uni_index += 1,
        }
        self.streams.insert(
            id,
            Stream::new(id, self.default_send_max_data, self.default_recv_max_data, dir),
        );
        Ok(id)
    }

    /// Looks a stream up, lazily creating it if this is the first frame
    /// we've seen referencing a remotely-initiated stream.
    pub fn get_or_create_remote(&mut self, id: StreamId) -> &mut Stream {
        self.streams.entry(id).or_insert_with(|| {
            if id.initiator() == self.side {
                // Locally-initiated streams are always created by open_local;
                // a frame referencing one we haven't opened yet is a bug in
                // the caller, not a protocol event, so just materialize it
                // rather than special-casing further.
                Stream::new(id, self.default_send_max_data, self.default_recv_max_data, id.directionality())
            } else if id.is_bidi() {
                Stream::new(id, self.default_send_max_data, self.default_recv_max_data, Directionality::Bidi)
            } else {
                Stream::new_uni_recv(id, self.default_recv_max_data)
            }
        })
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }
}
