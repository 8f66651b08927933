//! Encoder-stream instructions (RFC 9204 §4.3): the side channel the
//! encoder uses to populate the dynamic table ahead of (or alongside)
//! header blocks that reference it.

use bytes::{Buf, BufMut, Bytes};

use crate::qpack::huffman;
use crate::qpack::prefix_int;
use crate::result::{QpackError, QuicheResult};

#[derive(Debug, Clone, PartialEq)]
pub enum EncoderInstruction {
    SetDynamicTableCapacity(u64),
    /// `dynamic = true` means the name reference is into the dynamic
    /// table (relative to the insert count at encode time), `false`
    /// means the static table.
    InsertWithNameRef { dynamic: bool, name_index: u64, value: Vec<u8> },
    InsertWithoutNameRef { name: Vec<u8>, value: Vec<u8> },
    Duplicate(u64),
}

fn encode_string<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    let huffman_encoded = huffman::encode(bytes);
    if huffman_encoded.len() < bytes.len() {
        prefix_int::encode(buf, 7, 0x80, huffman_encoded.len() as u64);
        buf.put_slice(&huffman_encoded);
    } else {
        prefix_int::encode(buf, 7, 0x00, bytes.len() as u64);
        buf.put_slice(bytes);
    }
}

fn decode_string(buf: &mut Bytes) -> QuicheResult<Vec<u8>> {
    if !buf.has_remaining() {
        return Err(QpackError::Truncated.into());
    }
    let first_byte = buf.get_u8();
    let is_huffman = first_byte & 0x80 != 0;
    let len = prefix_int::decode(buf, 7, first_byte)? as usize;
    if buf.remaining() < len {
        return Err(QpackError::Truncated.into());
    }
    let data = buf.copy_to_bytes(len);
    if is_huffman {
        huffman::decode(&data)
    } else {
        Ok(data.to_vec())
    }
}

impl EncoderInstruction {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            EncoderInstruction::SetDynamicTableCapacity(capacity) => {
                prefix_int::encode(buf, 5, 0b001_00000, *capacity);
            }
            EncoderInstruction::InsertWithNameRef { dynamic, name_index, value } => {
                let high = 0b1000_0000 | if *dynamic { 0 } else { 0b0100_0000 };
                prefix_int::encode(buf, 6, high, *name_index);
                encode_string(buf, value);
            }
            EncoderInstruction::InsertWithoutNameRef { name, value } => {
                let huffman_encoded = huffman::encode(name);
                if huffman_encoded.len() < name.len() {
                    prefix_int::encode(buf, 5, 0b0110_0000, huffman_encoded.len() as u64);
                    buf.put_slice(&huffman_encoded);
                } else {
                    prefix_int::encode(buf, 5, 0b0100_0000, name.len() as u64);
                    buf.put_slice(name);
                }
                encode_string(buf, value);
            }
            EncoderInstruction::Duplicate(relative_index) => {
                prefix_int::encode(buf, 5, 0b000_00000, *relative_index);
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> QuicheResult<Self> {
        if !buf.has_remaining() {
            return Err(QpackError::Truncated.into());
        }
        let first_byte = buf.get_u8();

        if first_byte & 0b1000_0000 != 0 {
            let dynamic = first_byte & 0b0100_0000 == 0;
            let name_index = prefix_int::decode(buf, 6, first_byte)?;
            let value = decode_string(buf)?;
            return Ok(EncoderInstruction::InsertWithNameRef { dynamic, name_index, value });
        }

        if first_byte & 0b0100_0000 != 0 {
            let is_huffman = first_byte & 0b0010_0000 != 0;
            let len = prefix_int::decode(buf, 5, first_byte)? as usize;
            if buf.remaining() < len {
                return Err(QpackError::Truncated.into());
            }
            let name_bytes = buf.copy_to_bytes(len);
            let name = if is_huffman { huffman::decode(&name_bytes)? } else { name_bytes.to_vec() };
            let value = decode_string(buf)?;
            return Ok(EncoderInstruction::InsertWithoutNameRef { name, value });
        }

        if first_byte & 0b0010_0000 != 0 {
            let capacity = prefix_int::decode(buf, 5, first_byte)?;
            return Ok(EncoderInstruction::SetDynamicTableCapacity(capacity));
        }

        let relative_index = prefix_int::decode(buf, 5, first_byte)?;
        Ok(EncoderInstruction::Duplicate(relative_index))
    }
}

/// Decoder-stream instructions (§4.4): feedback the decoder sends back so
/// the encoder knows what's safe to evict and which streams are unblocked.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderInstruction {
    SectionAcknowledgment { stream_id: u64 },
    StreamCancellation { stream_id: u64 },
    InsertCountIncrement(u64),
}

impl DecoderInstruction {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            DecoderInstruction::SectionAcknowledgment { stream_id } => {
                prefix_int::encode(buf, 7, 0b1000_0000, *stream_id);
            }
            DecoderInstruction::StreamCancellation { stream_id } => {
                prefix_int::encode(buf, 6, 0b0100_0000, *stream_id);
            }
            DecoderInstruction::InsertCountIncrement(n) => {
                prefix_int::encode(buf, 6, 0b0000_0000, *n);
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> QuicheResult<Self> {
        if !buf.has_remaining() {
            return Err(QpackError::Truncated.into());
        }
        let first_byte = buf.get_u8();
        if first_byte & 0b1000_0000 != 0 {
            let stream_id = prefix_int::decode(buf, 7, first_byte)?;
            return Ok(DecoderInstruction::SectionAcknowledgment { stream_id });
        }
        if first_byte & 0b0100_0000 != 0 {
            let stream_id = prefix_int::decode(buf, 6, first_byte)?;
            return Ok(DecoderInstruction::StreamCancellation { stream_id });
        }
        let n = prefix_int::decode(buf, 6, first_byte)?;
        Ok(DecoderInstruction::InsertCountIncrement(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_encoder(instr: EncoderInstruction) {
        let mut buf = Vec::new();
        instr.encode(&mut buf);
        let mut cursor = Bytes::from(buf);
        let decoded = EncoderInstruction::decode(&mut cursor).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn set_capacity_round_trips() {
        round_trip_encoder(EncoderInstruction::SetDynamicTableCapacity(4096));
    }

    #[test]
    fn insert_with_name_ref_round_trips_static_and_dynamic() {
        round_trip_encoder(EncoderInstruction::InsertWithNameRef {
            dynamic: false,
            name_index: 17,
            value: b"GET".to_vec(),
        });
        round_trip_encoder(EncoderInstruction::InsertWithNameRef {
            dynamic: true,
            name_index: 2,
            value: b"custom-value".to_vec(),
        });
    }

    #[test]
    fn insert_without_name_ref_round_trips() {
        round_trip_encoder(EncoderInstruction::InsertWithoutNameRef {
            name: b"x-custom-header".to_vec(),
            value: b"some value here".to_vec(),
        });
    }

    #[test]
    fn duplicate_round_trips() {
        round_trip_encoder(EncoderInstruction::Duplicate(12));
    }

    fn round_trip_decoder(instr: DecoderInstruction) {
        let mut buf = Vec::new();
        instr.encode(&mut buf);
        let mut cursor = Bytes::from(buf);
        let decoded = DecoderInstruction::decode(&mut cursor).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn decoder_instructions_round_trip() {
        round_trip_decoder(DecoderInstruction::SectionAcknowledgment { stream_id: 4 });
        round_trip_decoder(DecoderInstruction::StreamCancellation { stream_id: 8 });
        round_trip_decoder(DecoderInstruction::InsertCountIncrement(3));
    }
}
