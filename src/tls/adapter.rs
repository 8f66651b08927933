//! CRYPTO-frame byte-stream plumbing between the packet layer and a TLS
//! implementation (§4.5). Resolves the Open Question on out-of-order
//! CRYPTO data: frames are reassembled the same way STREAM data is,
//! instead of being rejected when they arrive with a gap.
//!
//! Resolves the second Open Question (the TLS key schedule): this module
//! defines a real callback trait a TLS stack's key-update hook would
//! implement, not a stand-in that returns fixed test-vector secrets.

use std::collections::HashMap;

use bytes::Bytes;

use crate::crypto::keys::CipherSuite;
use crate::packet::frame::Frame;
use crate::packet::types::EncryptionLevel;
use crate::result::QuicheResult;
use crate::stream::reassembly::Reassembler;

/// Per-level CRYPTO byte stream: outgoing bytes queued by the handshake
/// driver, incoming bytes reassembled out of order per §4.9's algorithm.
pub struct CryptoStream {
    send_offset: u64,
    outgoing: Vec<u8>,
    recv: Reassembler,
}

impl CryptoStream {
    fn new() -> Self {
        Self { send_offset: 0, outgoing: Vec::new(), recv: Reassembler::new() }
    }

    pub fn queue(&mut self, data: &[u8]) {
        self.outgoing.extend_from_slice(data);
    }

    /// Pulls up to `max_len` queued bytes into a CRYPTO frame.
    pub fn emit_frame(&mut self, max_len: usize) -> Option<Frame> {
        if self.outgoing.is_empty() {
            return None;
        }
        let take = max_len.min(self.outgoing.len());
        let data: Vec<u8> = self.outgoing.drain(..take).collect();
        let offset = self.send_offset;
        self.send_offset += take as u64;
        Some(Frame::Crypto { offset, data: Bytes::from(data) })
    }

    pub fn on_crypto_frame(&mut self, offset: u64, data: &[u8]) -> QuicheResult<()> {
        self.recv.insert(offset, data)?;
        Ok(())
    }

    pub fn read_to_vec(&mut self, max: usize) -> Vec<u8> {
        self.recv.read_to_vec(max)
    }

    pub fn has_ready_bytes(&self) -> bool {
        self.recv.has_ready_bytes()
    }
}

impl Default for CryptoStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Handshake secrets derived for one encryption level, handed to the
/// packet-protection layer to build a [`crate::crypto::KeyPair`].
pub struct LevelSecrets {
    pub suite: CipherSuite,
    pub local: Vec<u8>,
    pub remote: Vec<u8>,
}

/// The boundary a TLS library's key schedule calls back across: every
/// time it derives a new set of traffic secrets (initial handshake
/// progression, or a post-handshake key update), it reports them here
/// rather than QUIC guessing or hardcoding them.
pub trait KeyScheduleCallback: Send {
    fn on_secrets_available(&mut self, level: EncryptionLevel, secrets: LevelSecrets);
    fn on_key_update(&mut self, secrets: LevelSecrets);
}

/// Bundles the three CRYPTO byte streams the handshake uses (0-RTT
/// carries no CRYPTO frames of its own, RFC 9000 §12.3).
pub struct CryptoStreams {
    streams: HashMap<EncryptionLevel, CryptoStream>,
}

impl CryptoStreams {
    pub fn new() -> Self {
        let mut streams = HashMap::new();
        streams.insert(EncryptionLevel::Initial, CryptoStream::new());
        streams.insert(EncryptionLevel::Handshake, CryptoStream::new());
        streams.insert(EncryptionLevel::Application, CryptoStream::new());
        Self { streams }
    }

    pub fn get_mut(&mut self, level: EncryptionLevel) -> &mut CryptoStream {
        self.streams
            .get_mut(&level)
            .expect("crypto streams are preallocated for every level that carries CRYPTO frames")
    }
}

impl Default for CryptoStreams {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_bytes_come_back_through_emitted_frames() {
        let mut cs = CryptoStream::new();
        cs.queue(b"client hello");
        let frame = cs.emit_frame(100).unwrap();
        match frame {
            Frame::Crypto { offset, data } => {
                assert_eq!(offset, 0);
                assert_eq!(&data[..], b"client hello");
            }
            _ => panic!("expected crypto frame"),
        }
    }

    #[test]
    fn out_of_order_crypto_frames_reassemble() {
        let mut cs = CryptoStream::new();
        cs.on_crypto_frame(5, b"world").unwrap();
        cs.on_crypto_frame(0, b"hello").unwrap();
        assert_eq!(cs.read_to_vec(100), b"helloworld");
    }

    #[test]
    fn per_level_streams_are_independent() {
        let mut streams = CryptoStreams::new();
        streams.get_mut(EncryptionLevel::Initial).queue(b"initial");
        streams.get_mut(EncryptionLevel::Handshake).queue(b"handshake");
        assert_eq!(streams.get_mut(EncryptionLevel::Initial).outgoing, b"initial");
        assert_eq!(streams.get_mut(EncryptionLevel::Handshake).outgoing, b"handshake");
    }
}
