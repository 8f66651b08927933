//! Long- and short-header parsing, phase 1 only (§4.2): everything that can
//! be read before header protection is removed. The packet-number bytes
//! remain masked at this point; `packet::codec` does phase 2.

use bytes::{Buf, BufMut, Bytes};

use crate::primitives::varint::{decode_cid, encode_cid, VarInt};
use crate::result::{PacketError, QuicheResult};

use super::types::ConnectionId;

pub const RETRY_INTEGRITY_TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongPacketType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => LongPacketType::Initial,
            0b01 => LongPacketType::ZeroRtt,
            0b10 => LongPacketType::Handshake,
            0b11 => LongPacketType::Retry,
            _ => unreachable!(),
        }
    }

    fn bits(self) -> u8 {
        match self {
            LongPacketType::Initial => 0b00,
            LongPacketType::ZeroRtt => 0b01,
            LongPacketType::Handshake => 0b10,
            LongPacketType::Retry => 0b11,
        }
    }
}

/// Long-header fields visible before header protection removal. `first_byte`
/// still carries the masked reserved bits / packet-number-length bits;
/// `remainder` is everything from the packet number onward (protected).
#[derive(Debug, Clone)]
pub struct LongHeader {
    pub ty: LongPacketType,
    pub first_byte: u8,
    pub version: u32,
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub token: Vec<u8>,
    /// Byte offset, from the start of the datagram, at which the (still
    /// masked) packet number begins. Needed to locate the header-protection
    /// sample (`offset + 4`, §4.2).
    pub pn_offset: usize,
}

impl LongHeader {
    /// Builds the header bytes prior to the packet number field, leaving
    /// the low 4 bits of `first_byte` as `0000` for the caller to patch
    /// with the real reserved bits + packet-number length once both are
    /// known (they get header-protection-masked afterward anyway).
    pub fn encode_prefix<B: BufMut>(
        buf: &mut B,
        ty: LongPacketType,
        version: u32,
        dst_cid: &ConnectionId,
        src_cid: &ConnectionId,
        token: &[u8],
    ) -> QuicheResult<()> {
        let first_byte = 0b1100_0000 | (ty.bits() << 4);
        buf.put_u8(first_byte);
        buf.put_u32(version);
        encode_cid(buf, dst_cid.as_slice())?;
        encode_cid(buf, src_cid.as_slice())?;
        if matches!(ty, LongPacketType::Initial) {
            VarInt::from_u64(token.len() as u64)?.encode(buf);
            buf.put_slice(token);
        }
        Ok(())
    }

    /// Phase 1 parse: first byte through token/length, stopping right
    /// before the (masked) packet number. `datagram_offset` is the offset
    /// of `buf`'s start within the enclosing UDP datagram, used to compute
    /// `pn_offset` for coalesced packets.
    pub fn parse(buf: &mut Bytes, datagram_offset: usize) -> QuicheResult<(Self, u64)> {
        if buf.remaining() < 5 {
            return Err(PacketError::Truncated.into());
        }
        let start_remaining = buf.remaining();
        let first_byte = buf.get_u8();
        if first_byte & 0b0100_0000 == 0 {
            return Err(PacketError::InvalidFixedBit.into());
        }
        let ty = LongPacketType::from_bits(first_byte >> 4);
        let version = buf.get_u32();
        let dst_cid = ConnectionId::new(decode_cid(buf)?);
        let src_cid = ConnectionId::new(decode_cid(buf)?);
        let token = if matches!(ty, LongPacketType::Initial) {
            let len = VarInt::decode(buf)?.usize();
            if buf.remaining() < len {
                return Err(PacketError::Truncated.into());
            }
            buf.copy_to_bytes(len).to_vec()
        } else {
            Vec::new()
        };
        let length = VarInt::decode(buf)?;
        let consumed = start_remaining - buf.remaining();
        let pn_offset = datagram_offset + consumed;
        Ok((
            Self {
                ty,
                first_byte,
                version,
                dst_cid,
                src_cid,
                token,
                pn_offset,
            },
            length.into_inner(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ShortHeader {
    pub first_byte: u8,
    pub dst_cid: ConnectionId,
    pub pn_offset: usize,
}

impl ShortHeader {
    pub fn encode_prefix<B: BufMut>(buf: &mut B, dst_cid: &ConnectionId, spin_bit: bool, key_phase: bool) {
        let mut first_byte = 0b0100_0000u8;
        if spin_bit {
            first_byte |= 0b0010_0000;
        }
        if key_phase {
            first_byte |= 0b0000_0100;
        }
        buf.put_u8(first_byte);
        buf.put_slice(dst_cid.as_slice());
    }

    pub fn parse(buf: &mut Bytes, dst_cid_len: usize, datagram_offset: usize) -> QuicheResult<Self> {
        if buf.remaining() < 1 + dst_cid_len {
            return Err(PacketError::Truncated.into());
        }
        let first_byte = buf.get_u8();
        if first_byte & 0b0100_0000 == 0 {
            return Err(PacketError::InvalidFixedBit.into());
        }
        let mut cid = vec![0u8; dst_cid_len];
        buf.copy_to_slice(&mut cid);
        Ok(Self {
            first_byte,
            dst_cid: ConnectionId::new(cid),
            pn_offset: datagram_offset + 1 + dst_cid_len,
        })
    }

    pub fn spin_bit(&self) -> bool {
        self.first_byte & 0b0010_0000 != 0
    }
}

#[derive(Debug, Clone)]
pub struct RetryHeader {
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub token: Vec<u8>,
    pub integrity_tag: [u8; RETRY_INTEGRITY_TAG_LEN],
}

#[derive(Debug, Clone)]
pub struct VersionNegotiateHeader {
    pub dst_cid: ConnectionId,
    pub src_cid: ConnectionId,
    pub supported_versions: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum Header {
    Long(LongHeader),
    Short(ShortHeader),
    Retry(RetryHeader),
    VersionNegotiate(VersionNegotiateHeader),
}

/// Peeks the header form without consuming, per §6 "bit 7 header form".
pub fn is_long_header(first_byte: u8) -> bool {
    first_byte & 0b1000_0000 != 0
}
