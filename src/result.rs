//! Crate-wide error type. Every layer gets its own `thiserror` variant set
//! which rolls up into [`QuicheError`] at the connection boundary.

use thiserror::Error;

use crate::packet::error::ProtocolError;

pub type QuicheResult<T> = Result<T, QuicheError>;

#[derive(Debug, Error)]
pub enum VarIntError {
    #[error("buffer truncated while decoding varint")]
    Truncated,
    #[error("connection id length {0} exceeds the 20-byte maximum")]
    ConnectionIdTooLong(usize),
    #[error("value {0} exceeds the 62-bit varint maximum")]
    Overflow(u64),
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("buffer truncated while parsing packet")]
    Truncated,
    #[error("unsupported QUIC version {0:#010x}")]
    UnsupportedVersion(u32),
    #[error("fixed bit was not set")]
    InvalidFixedBit,
    #[error("packet decryption failed")]
    DecryptionFailed,
    #[error("header protection removal failed")]
    HeaderProtectionFailed,
    #[error("packet number length {0} is invalid")]
    InvalidPacketNumberLength(usize),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame type {0:#x}")]
    UnknownType(u64),
    #[error("frame buffer truncated")]
    Truncated,
    #[error("frame is malformed: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD seal failed")]
    SealFailed,
    #[error("AEAD open failed")]
    OpenFailed,
    #[error("keys for encryption level {0:?} are not yet available")]
    KeysNotAvailable(crate::packet::types::EncryptionLevel),
    #[error("unsupported cipher suite {0:#06x}")]
    UnsupportedCipherSuite(u16),
    #[error("key update rejected: {0}")]
    KeyUpdateRejected(&'static str),
}

#[derive(Debug, Error)]
pub enum QpackError {
    #[error("dynamic table is full: entry of {0} bytes cannot fit in capacity {1}")]
    TableFull(usize, usize),
    #[error("integer encoding overflow")]
    IntegerOverflow,
    #[error("invalid huffman encoding")]
    InvalidHuffman,
    #[error("header block references an index that does not exist")]
    InvalidIndex,
    #[error("decoding is blocked waiting on encoder-stream instructions")]
    Blocked,
    #[error("buffer truncated")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0:?}")]
    Transport(ProtocolError),
    #[error("flow control violation: peer sent {sent} bytes against a {limit}-byte limit")]
    FlowControl { sent: u64, limit: u64 },
    #[error("stream {0} is in an invalid state for this operation")]
    StreamState(u64),
    #[error("transport parameter error: {0}")]
    TransportParameter(&'static str),
    #[error("connection id limit exceeded")]
    ConnectionIdLimit,
    #[error("application error {0}")]
    Application(u64),
    #[error("idle timeout elapsed")]
    IdleTimeout,
}

#[derive(Debug, Error)]
pub enum QuicheError {
    #[error(transparent)]
    VarInt(#[from] VarIntError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Qpack(#[from] QpackError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for QuicheError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        QuicheError::Other(err.to_string())
    }
}

/// Ports the teacher's lightweight assertion helper forward: fail with a
/// string reason rather than unwinding.
pub fn require(cond: bool, msg: &str) -> QuicheResult<()> {
    if !cond {
        return Err(QuicheError::Other(msg.to_string()));
    }
    Ok(())
}
