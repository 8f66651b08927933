//! QUIC variable-length integers (RFC 9000 §16).
//!
//! heavily inspired by quinn's `VarInt`, reworked onto `bytes::Buf`/`BufMut`
//! so decode doesn't pay an O(n) `Vec::remove(0)` per byte.

use bytes::{Buf, BufMut};

use crate::result::{QuicheResult, VarIntError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VarInt(pub(crate) u64);

impl VarInt {
    pub const MAX: Self = Self((1 << 62) - 1);

    #[inline(always)]
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    #[inline(always)]
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn from_u64(value: u64) -> QuicheResult<Self> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(VarIntError::Overflow(value).into())
        }
    }

    /// Caller must guarantee `value <= VarInt::MAX`.
    pub const unsafe fn from_u64_unchecked(value: u64) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    pub fn usize(self) -> usize {
        self.0 as usize
    }

    /// Wire length in bytes for the shortest valid encoding of this value.
    pub fn size(self) -> usize {
        if self.0 < (1 << 6) {
            1
        } else if self.0 < (1 << 14) {
            2
        } else if self.0 < (1 << 30) {
            4
        } else {
            8
        }
    }

    pub fn encode<B: BufMut>(self, buf: &mut B) {
        let size = self.size();
        let prefix: u8 = match size {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            8 => 0b11,
            _ => unreachable!(),
        };
        let shift = 8 * (size - 1);
        buf.put_u8((prefix << 6) | ((self.0 >> shift) & 0x3F) as u8);
        for i in (0..size - 1).rev() {
            buf.put_u8(((self.0 >> (8 * i)) & 0xFF) as u8);
        }
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.encode(&mut buf);
        buf
    }

    pub fn decode<B: Buf>(buf: &mut B) -> QuicheResult<Self> {
        if !buf.has_remaining() {
            return Err(VarIntError::Truncated.into());
        }
        let first = buf.get_u8();
        let disc = first >> 6;
        let len = 1usize << disc;
        if buf.remaining() < len - 1 {
            return Err(VarIntError::Truncated.into());
        }
        let mut val = (first & 0x3F) as u64;
        for _ in 0..len - 1 {
            val = (val << 8) | buf.get_u8() as u64;
        }
        Ok(Self(val))
    }
}

impl From<VarInt> for u64 {
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = crate::result::QuicheError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_u64(value)
    }
}

impl From<u32> for VarInt {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

/// Writes a connection ID as a single length byte (0..20) followed by its
/// bytes, per §4.1. Rejects IDs longer than 20 bytes up front.
pub fn encode_cid<B: BufMut>(buf: &mut B, cid: &[u8]) -> QuicheResult<()> {
    if cid.len() > 20 {
        return Err(VarIntError::ConnectionIdTooLong(cid.len()).into());
    }
    buf.put_u8(cid.len() as u8);
    buf.put_slice(cid);
    Ok(())
}

pub fn decode_cid<B: Buf>(buf: &mut B) -> QuicheResult<Vec<u8>> {
    if !buf.has_remaining() {
        return Err(VarIntError::Truncated.into());
    }
    let len = buf.get_u8() as usize;
    if len > 20 {
        return Err(VarIntError::ConnectionIdTooLong(len).into());
    }
    if buf.remaining() < len {
        return Err(VarIntError::Truncated.into());
    }
    let mut cid = vec![0u8; len];
    buf.copy_to_slice(&mut cid);
    Ok(cid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_from_spec() {
        assert_eq!(VarInt::from_u32(63).to_vec(), vec![0x3F]);
        assert_eq!(VarInt::from_u32(64).to_vec(), vec![0x40, 0x40]);
        assert_eq!(VarInt::from_u32(16383).to_vec(), vec![0x7F, 0xFF]);
        assert_eq!(VarInt::from_u32(16384).to_vec(), vec![0x80, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn round_trip_shortest_form() {
        let samples: &[u64] = &[
            0,
            1,
            63,
            64,
            16_383,
            16_384,
            (1 << 30) - 1,
            1 << 30,
            VarInt::MAX.into_inner(),
        ];
        for &v in samples {
            let vi = VarInt::from_u64(v).unwrap();
            let bytes = vi.to_vec();
            assert_eq!(bytes.len(), vi.size());
            let mut cursor = &bytes[..];
            let (decoded, consumed) = (VarInt::decode(&mut cursor).unwrap(), bytes.len() - cursor.len());
            assert_eq!(decoded, vi);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn decode_truncated_is_an_error() {
        let mut empty: &[u8] = &[];
        assert!(VarInt::decode(&mut empty).is_err());
        let mut partial: &[u8] = &[0xC0];
        assert!(VarInt::decode(&mut partial).is_err());
    }

    #[test]
    fn rejects_overlong_connection_id() {
        let mut buf = Vec::new();
        let too_long = vec![0u8; 21];
        assert!(encode_cid(&mut buf, &too_long).is_err());
    }

    #[test]
    fn connection_id_round_trip() {
        let mut buf = Vec::new();
        let cid = vec![1, 2, 3, 4, 5, 6, 7, 8];
        encode_cid(&mut buf, &cid).unwrap();
        let mut cursor = &buf[..];
        let decoded = decode_cid(&mut cursor).unwrap();
        assert_eq!(decoded, cid);
    }
}
