//! Full packet encode/decode (§4.2): header protection + AEAD layered on
//! top of `packet::header`'s phase-1 parse. This is where the two phases
//! described in spec §4.2 meet.

use bytes::{Buf, BufMut, Bytes};

use crate::crypto::header_protection::{self, SAMPLE_LEN};
use crate::crypto::keys::PacketKeys;
use crate::primitives::varint::VarInt;
use crate::result::{PacketError, QuicheResult};

use super::frame::Frame;
use super::header::{LongHeader, LongPacketType, RetryHeader, ShortHeader, VersionNegotiateHeader};
use super::number;
use super::types::ConnectionId;

pub struct DecodedLong {
    pub header: LongHeader,
    pub packet_number: u64,
    pub frames: Vec<Frame>,
}

pub struct DecodedShort {
    pub header: ShortHeader,
    pub packet_number: u64,
    pub frames: Vec<Frame>,
}

/// Removes header protection from `header_prefix`'s last byte and from the
/// leading bytes of `protected`, then reconstructs the full packet number.
/// Returns the packet-number length actually used and the reconstructed
/// value; `protected` is mutated in place so its pn-length prefix is now
/// plaintext (the AEAD ciphertext that follows is untouched).
fn unprotect(
    first_byte: &mut u8,
    protected: &mut [u8],
    keys: &PacketKeys,
    largest_acked: Option<u64>,
    is_long_header: bool,
) -> QuicheResult<(usize, u64)> {
    if protected.len() < 4 + SAMPLE_LEN {
        return Err(PacketError::Truncated.into());
    }
    let sample = &protected[4..4 + SAMPLE_LEN];
    let mask = header_protection::compute_mask(keys.suite, &keys.hp_key, sample)?;

    let original_first_byte = *first_byte;
    *first_byte ^= mask.first_byte & if is_long_header { 0x0f } else { 0x1f };
    let pn_len = (*first_byte & 0x03) as usize + 1;
    if protected.len() < pn_len {
        *first_byte = original_first_byte;
        return Err(PacketError::Truncated.into());
    }

    for i in 0..pn_len {
        protected[i] ^= mask.packet_number[i];
    }

    let mut truncated = 0u32;
    for &b in &protected[..pn_len] {
        truncated = (truncated << 8) | b as u32;
    }
    let full_pn = number::reconstruct(largest_acked, truncated, pn_len);
    Ok((pn_len, full_pn))
}

fn parse_frames(mut plaintext: Bytes) -> QuicheResult<Vec<Frame>> {
    let mut frames = Vec::new();
    while plaintext.has_remaining() {
        frames.push(Frame::decode(&mut plaintext)?);
    }
    Ok(frames)
}

/// Decodes a single long-header packet (Initial/0-RTT/Handshake). `raw`
/// must contain exactly this packet (coalesced datagrams are split by the
/// caller using the header's `length` field before this is called).
pub fn decode_long(mut raw: Vec<u8>, keys: &PacketKeys, largest_acked: Option<u64>) -> QuicheResult<DecodedLong> {
    let mut cursor = Bytes::from(raw.clone());
    let (mut header, length) = LongHeader::parse(&mut cursor, 0)?;
    let pn_offset = header.pn_offset;
    let length = length as usize;
    if raw.len() < pn_offset + length {
        return Err(PacketError::Truncated.into());
    }

    let mut first_byte = raw[0];
    let (pn_len, packet_number) = {
        let protected = &mut raw[pn_offset..pn_offset + length];
        unprotect(&mut first_byte, protected, keys, largest_acked, true)?
    };
    raw[0] = first_byte;
    header.first_byte = first_byte;

    let aad_end = pn_offset + pn_len;
    let aad = raw[..aad_end].to_vec();
    let ciphertext = &raw[aad_end..pn_offset + length];
    let plaintext = keys.open(packet_number, &aad, ciphertext)?;

    Ok(DecodedLong {
        header,
        packet_number,
        frames: parse_frames(Bytes::from(plaintext))?,
    })
}

pub fn decode_short(
    mut raw: Vec<u8>,
    dst_cid_len: usize,
    keys: &PacketKeys,
    largest_acked: Option<u64>,
) -> QuicheResult<DecodedShort> {
    let mut cursor = Bytes::from(raw.clone());
    let mut header = ShortHeader::parse(&mut cursor, dst_cid_len, 0)?;
    let pn_offset = header.pn_offset;

    let mut first_byte = raw[0];
    let (pn_len, packet_number) = {
        let protected = &mut raw[pn_offset..];
        unprotect(&mut first_byte, protected, keys, largest_acked, false)?
    };
    raw[0] = first_byte;
    header.first_byte = first_byte;

    let aad_end = pn_offset + pn_len;
    let aad = raw[..aad_end].to_vec();
    let ciphertext = &raw[aad_end..];
    let plaintext = keys.open(packet_number, &aad, ciphertext)?;

    Ok(DecodedShort {
        header,
        packet_number,
        frames: parse_frames(Bytes::from(plaintext))?,
    })
}

fn pn_bytes(pn: u64, len: usize) -> Vec<u8> {
    pn.to_be_bytes()[8 - len..].to_vec()
}

/// Serializes a long-header packet: header, truncated packet number,
/// AEAD-sealed payload, then header protection applied last (§4.2).
pub fn encode_long(
    ty: LongPacketType,
    version: u32,
    dst_cid: &ConnectionId,
    src_cid: &ConnectionId,
    token: &[u8],
    packet_number: u64,
    largest_acked: Option<u64>,
    frames: &[Frame],
    keys: &PacketKeys,
    min_padding_bytes: usize,
) -> QuicheResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    for frame in frames {
        frame.encode(&mut plaintext)?;
    }
    plaintext.resize(plaintext.len() + min_padding_bytes, 0); // PADDING frames are the byte 0x00

    let pn_len = number::encode_length(packet_number, largest_acked).max(1);
    let sealed_len = plaintext.len() + PacketKeys::TAG_LEN_HINT;

    let mut header = Vec::new();
    LongHeader::encode_prefix(&mut header, ty, version, dst_cid, src_cid, token)?;
    let length_field = pn_len + sealed_len;
    VarInt::from_u64(length_field as u64)?.encode(&mut header);
    let pn_offset = header.len();
    header[0] = (header[0] & 0xfc) | (pn_len as u8 - 1);
    let pn = pn_bytes(packet_number, pn_len);
    header.extend_from_slice(&pn);

    let aad = header[..pn_offset + pn_len].to_vec();
    let ciphertext = keys.seal(packet_number, &aad, &plaintext)?;

    let mut packet = header;
    packet.extend_from_slice(&ciphertext);

    let sample_start = pn_offset + 4;
    if packet.len() < sample_start + SAMPLE_LEN {
        return Err(PacketError::Truncated.into());
    }
    let sample = packet[sample_start..sample_start + SAMPLE_LEN].to_vec();
    let mask = header_protection::compute_mask(keys.suite, &keys.hp_key, &sample)?;
    let mut first_byte = packet[0];
    let mut pn_field = packet[pn_offset..pn_offset + pn_len].to_vec();
    header_protection::apply(&mut first_byte, &mut pn_field, &mask, true);
    packet[0] = first_byte;
    packet[pn_offset..pn_offset + pn_len].copy_from_slice(&pn_field);

    Ok(packet)
}

pub fn encode_short(
    dst_cid: &ConnectionId,
    spin_bit: bool,
    key_phase: bool,
    packet_number: u64,
    largest_acked: Option<u64>,
    frames: &[Frame],
    keys: &PacketKeys,
) -> QuicheResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    for frame in frames {
        frame.encode(&mut plaintext)?;
    }

    let pn_len = number::encode_length(packet_number, largest_acked).max(1);

    let mut header = Vec::new();
    ShortHeader::encode_prefix(&mut header, dst_cid, spin_bit, key_phase);
    let pn_offset = header.len();
    header[0] = (header[0] & 0xfc) | (pn_len as u8 - 1);
    let pn = pn_bytes(packet_number, pn_len);
    header.extend_from_slice(&pn);

    let aad = header.clone();
    let ciphertext = keys.seal(packet_number, &aad, &plaintext)?;

    let mut packet = header;
    packet.extend_from_slice(&ciphertext);

    let sample_start = pn_offset + 4;
    if packet.len() < sample_start + SAMPLE_LEN {
        return Err(PacketError::Truncated.into());
    }
    let sample = packet[sample_start..sample_start + SAMPLE_LEN].to_vec();
    let mask = header_protection::compute_mask(keys.suite, &keys.hp_key, &sample)?;
    let mut first_byte = packet[0];
    let mut pn_field = packet[pn_offset..pn_offset + pn_len].to_vec();
    header_protection::apply(&mut first_byte, &mut pn_field, &mask, false);
    packet[0] = first_byte;
    packet[pn_offset..pn_offset + pn_len].copy_from_slice(&pn_field);

    Ok(packet)
}

/// Retry and Version Negotiation packets carry no packet number and are
/// never encrypted; parsed/built directly from the wire format (§4.2, §6).
pub fn parse_retry(mut buf: Bytes) -> QuicheResult<RetryHeader> {
    use crate::primitives::varint::decode_cid;
    if buf.remaining() < 1 {
        return Err(PacketError::Truncated.into());
    }
    let first_byte = buf.get_u8();
    if first_byte & 0x40 == 0 {
        return Err(PacketError::InvalidFixedBit.into());
    }
    let _version = buf.get_u32();
    let dst_cid = ConnectionId::new(decode_cid(&mut buf)?);
    let src_cid = ConnectionId::new(decode_cid(&mut buf)?);
    if buf.remaining() < super::header::RETRY_INTEGRITY_TAG_LEN {
        return Err(PacketError::Truncated.into());
    }
    let token_len = buf.remaining() - super::header::RETRY_INTEGRITY_TAG_LEN;
    let token = buf.copy_to_bytes(token_len).to_vec();
    let mut integrity_tag = [0u8; 16];
    buf.copy_to_slice(&mut integrity_tag);
    Ok(RetryHeader { dst_cid, src_cid, token, integrity_tag })
}

pub fn parse_version_negotiate(mut buf: Bytes) -> QuicheResult<VersionNegotiateHeader> {
    use crate::primitives::varint::decode_cid;
    if buf.remaining() < 5 {
        return Err(PacketError::Truncated.into());
    }
    buf.advance(1);
    let version = buf.get_u32();
    if version != 0 {
        return Err(PacketError::UnsupportedVersion(version).into());
    }
    let dst_cid = ConnectionId::new(decode_cid(&mut buf)?);
    let src_cid = ConnectionId::new(decode_cid(&mut buf)?);
    let mut supported_versions = Vec::new();
    while buf.remaining() >= 4 {
        supported_versions.push(buf.get_u32());
    }
    Ok(VersionNegotiateHeader { dst_cid, src_cid, supported_versions })
}

impl PacketKeys {
    /// Tag length used when sizing the ciphertext before sealing.
    pub(crate) const TAG_LEN_HINT: usize = 16;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{initial_secrets, CipherSuite};

    fn test_keys() -> (PacketKeys, PacketKeys) {
        let dcid = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];
        let (client_secret, server_secret) = initial_secrets(&dcid);
        (
            PacketKeys::derive(&client_secret, CipherSuite::Aes128Gcm),
            PacketKeys::derive(&server_secret, CipherSuite::Aes128Gcm),
        )
    }

    #[test]
    fn long_header_packet_round_trips() {
        let (client_keys, _server_keys) = test_keys();
        let dst_cid = ConnectionId::new(vec![0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]);
        let src_cid = ConnectionId::new(vec![1, 2, 3, 4]);
        let frames = vec![Frame::Ping, Frame::Padding(20)];

        let packet = encode_long(
            LongPacketType::Initial,
            1,
            &dst_cid,
            &src_cid,
            &[],
            0,
            None,
            &frames,
            &client_keys,
            0,
        )
        .unwrap();

        let decoded = decode_long(packet, &client_keys, None).unwrap();
        assert_eq!(decoded.packet_number, 0);
        assert_eq!(decoded.frames[0], Frame::Ping);
    }

    #[test]
    fn short_header_packet_round_trips() {
        let (client_keys, _) = test_keys();
        let dst_cid = ConnectionId::new(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let frames = vec![Frame::Stream(crate::packet::frame::StreamFrame {
            stream_id: 4,
            offset: 0,
            fin: true,
            data: Bytes::from_static(b"hi"),
        })];

        let packet =
            encode_short(&dst_cid, false, false, 5, Some(4), &frames, &client_keys).unwrap();
        let decoded = decode_short(packet, dst_cid.len(), &client_keys, Some(4)).unwrap();
        assert_eq!(decoded.packet_number, 5);
        assert_eq!(decoded.frames, frames);
    }

    #[test]
    fn tampered_packet_fails_to_decrypt() {
        let (client_keys, _) = test_keys();
        let dst_cid = ConnectionId::new(vec![0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]);
        let src_cid = ConnectionId::new(vec![1, 2, 3, 4]);
        let mut packet = encode_long(
            LongPacketType::Initial,
            1,
            &dst_cid,
            &src_cid,
            &[],
            0,
            None,
            &[Frame::Ping, Frame::Padding(20)],
            &client_keys,
            0,
        )
        .unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        assert!(decode_long(packet, &client_keys, None).is_err());
    }
}
