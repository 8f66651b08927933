//! QPACK header-block decoding (RFC 9204 §4.5) and the decoder-side
//! dynamic table maintained from encoder-stream instructions.

use bytes::{Buf, Bytes};

use crate::qpack::dynamic_table::DynamicTable;
use crate::qpack::instruction::EncoderInstruction;
use crate::qpack::prefix_int;
use crate::qpack::static_table;
use crate::result::{QpackError, QuicheResult};

pub struct QpackDecoder {
    dynamic_table: DynamicTable,
}

/// RFC 9204 §4.5.1.2: undoes the truncation done by the encoder, using the
/// total number of inserts this decoder has applied so far.
fn decode_required_insert_count(encoded: u64, max_entries: u64, total_inserts: u64) -> QuicheResult<u64> {
    if encoded == 0 {
        return Ok(0);
    }
    if max_entries == 0 {
        return Err(QpackError::InvalidIndex.into());
    }
    let full_range = 2 * max_entries;
    if encoded > full_range {
        return Err(QpackError::InvalidIndex.into());
    }
    let max_value = total_inserts + max_entries;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut required_insert_count = max_wrapped + encoded - 1;
    if required_insert_count > max_value {
        if required_insert_count <= full_range {
            return Err(QpackError::InvalidIndex.into());
        }
        required_insert_count -= full_range;
    }
    if required_insert_count == 0 {
        return Err(QpackError::InvalidIndex.into());
    }
    Ok(required_insert_count)
}

impl QpackDecoder {
    pub fn new(dynamic_table_capacity: usize) -> Self {
        Self { dynamic_table: DynamicTable::new(dynamic_table_capacity) }
    }

    fn max_entries(&self) -> u64 {
        (self.dynamic_table.capacity() / 32) as u64
    }

    /// Applies an instruction read off the encoder stream, growing the
    /// mirrored dynamic table to match the encoder's.
    pub fn apply_instruction(&mut self, instruction: EncoderInstruction) -> QuicheResult<()> {
        match instruction {
            EncoderInstruction::SetDynamicTableCapacity(capacity) => {
                self.dynamic_table.set_capacity(capacity as usize)?;
            }
            EncoderInstruction::InsertWithNameRef { dynamic, name_index, value } => {
                let name = if dynamic {
                    let absolute = self.dynamic_table.insert_count().checked_sub(name_index + 1).ok_or(QpackError::InvalidIndex)?;
                    self.dynamic_table.get_absolute(absolute).ok_or(QpackError::InvalidIndex)?.0.to_string()
                } else {
                    static_table::lookup(name_index as usize).ok_or(QpackError::InvalidIndex)?.0.to_string()
                };
                let value = String::from_utf8_lossy(&value).into_owned();
                self.dynamic_table.insert(name, value)?;
            }
            EncoderInstruction::InsertWithoutNameRef { name, value } => {
                let name = String::from_utf8_lossy(&name).into_owned();
                let value = String::from_utf8_lossy(&value).into_owned();
                self.dynamic_table.insert(name, value)?;
            }
            EncoderInstruction::Duplicate(relative_index) => {
                let absolute = self.dynamic_table.insert_count().checked_sub(relative_index + 1).ok_or(QpackError::InvalidIndex)?;
                let (name, value) = self.dynamic_table.get_absolute(absolute).ok_or(QpackError::InvalidIndex)?;
                let (name, value) = (name.to_string(), value.to_string());
                self.dynamic_table.insert(name, value)?;
            }
        }
        Ok(())
    }

    /// True once enough inserts have landed that decoding a header block
    /// requiring `required_insert_count` entries won't block.
    pub fn is_ready_for(&self, required_insert_count: u64) -> bool {
        self.dynamic_table.insert_count() >= required_insert_count
    }

    pub fn decode_header_block(&self, buf: &mut Bytes) -> QuicheResult<Vec<(String, String)>> {
        if buf.remaining() < 1 {
            return Err(QpackError::Truncated.into());
        }
        let first = buf.get_u8();
        let encoded_ric = prefix_int::decode(buf, 8, first)?;
        let required_insert_count =
            decode_required_insert_count(encoded_ric, self.max_entries(), self.dynamic_table.insert_count())?;
        if !self.is_ready_for(required_insert_count) {
            return Err(QpackError::Blocked.into());
        }

        if buf.remaining() < 1 {
            return Err(QpackError::Truncated.into());
        }
        let delta_byte = buf.get_u8();
        let sign_negative = delta_byte & 0x80 != 0;
        let delta_base = prefix_int::decode(buf, 7, delta_byte)?;
        let base = if sign_negative {
            required_insert_count.checked_sub(delta_base + 1).ok_or(QpackError::InvalidIndex)?
        } else {
            required_insert_count + delta_base
        };

        let mut headers = Vec::new();
        while buf.has_remaining() {
            headers.push(self.decode_field_line(buf, base)?);
        }
        Ok(headers)
    }

    fn decode_field_line(&self, buf: &mut Bytes, base: u64) -> QuicheResult<(String, String)> {
        let first = buf.get_u8();

        if first & 0b1000_0000 != 0 {
            let is_static = first & 0b0100_0000 == 0;
            let index = prefix_int::decode(buf, 6, first)?;
            if is_static {
                let (name, value) = static_table::lookup(index as usize).ok_or(QpackError::InvalidIndex)?;
                return Ok((name.to_string(), value.to_string()));
            }
            let absolute = base.checked_sub(index + 1).ok_or(QpackError::InvalidIndex)?;
            let (name, value) = self.dynamic_table.get_absolute(absolute).ok_or(QpackError::InvalidIndex)?;
            return Ok((name.to_string(), value.to_string()));
        }

        if first & 0b0100_0000 != 0 {
            let is_static = first & 0b0001_0000 != 0;
            let name_index = prefix_int::decode(buf, 4, first)?;
            let name = if is_static {
                static_table::lookup(name_index as usize).ok_or(QpackError::InvalidIndex)?.0.to_string()
            } else {
                let absolute = base.checked_sub(name_index + 1).ok_or(QpackError::InvalidIndex)?;
                self.dynamic_table.get_absolute(absolute).ok_or(QpackError::InvalidIndex)?.0.to_string()
            };
            let value = decode_string(buf)?;
            return Ok((name, String::from_utf8_lossy(&value).into_owned()));
        }

        if first & 0b0010_0000 != 0 {
            let is_huffman = first & 0b0000_1000 != 0;
            let len = prefix_int::decode(buf, 3, first)? as usize;
            if buf.remaining() < len {
                return Err(QpackError::Truncated.into());
            }
            let name_bytes = buf.copy_to_bytes(len);
            let name = if is_huffman {
                crate::qpack::huffman::decode(&name_bytes)?
            } else {
                name_bytes.to_vec()
            };
            let value = decode_string(buf)?;
            return Ok((String::from_utf8_lossy(&name).into_owned(), String::from_utf8_lossy(&value).into_owned()));
        }

        // Post-base forms (0000xxxx indexed, 0001xxxx literal-with-name) are
        // never emitted by this encoder; reject rather than mis-decode.
        Err(QpackError::InvalidIndex.into())
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
        crate::qpack::huffman::decode(&data)
    } else {
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qpack::encoder::QpackEncoder;

    #[test]
    fn round_trips_static_only_header_block() {
        let mut encoder = QpackEncoder::new(4096);
        let block = encoder.encode_header_block(&[(":method".into(), "GET".into()), (":scheme".into(), "https".into())]);

        let decoder = QpackDecoder::new(4096);
        let mut cursor = block;
        let headers = decoder.decode_header_block(&mut cursor).unwrap();
        assert_eq!(headers, vec![(":method".to_string(), "GET".to_string()), (":scheme".to_string(), "https".to_string())]);
    }

    #[test]
    fn round_trips_header_block_with_dynamic_insert() {
        let mut encoder = QpackEncoder::new(4096);
        let block = encoder.encode_header_block(&[("x-custom".into(), "hello".into())]);
        let instructions = encoder.take_pending_instructions();

        let mut decoder = QpackDecoder::new(4096);
        for instr in instructions {
            decoder.apply_instruction(instr).unwrap();
        }

        let mut cursor = block;
        let headers = decoder.decode_header_block(&mut cursor).unwrap();
        assert_eq!(headers, vec![("x-custom".to_string(), "hello".to_string())]);
    }

    #[test]
    fn blocks_when_dynamic_table_insert_not_yet_applied() {
        let mut encoder = QpackEncoder::new(4096);
        let block = encoder.encode_header_block(&[("x-custom".into(), "hello".into())]);

        let decoder = QpackDecoder::new(4096);
        let mut cursor = block;
        let err = decoder.decode_header_block(&mut cursor).unwrap_err();
        assert!(matches!(err, crate::result::QuicheError::Qpack(QpackError::Blocked)));
    }
}
