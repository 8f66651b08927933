//! QPACK header-block encoding (RFC 9204 §4.5): turns a list of header
//! pairs into a header block plus whatever encoder-stream instructions
//! are needed to populate the dynamic table first.
//!
//! To sidestep decoder blocking bookkeeping entirely, this encoder never
//! emits a reference to an entry it hasn't already flushed an `Insert`
//! instruction for — so the header block's Required Insert Count is
//! always satisfied by instructions the decoder has already applied by
//! the time it needs them. See `DESIGN.md` for the tradeoff (no
//! post-base indexing, slightly lower compression than a blocking-aware
//! encoder could achieve).

use bytes::{BufMut, Bytes, BytesMut};

use crate::qpack::dynamic_table::DynamicTable;
use crate::qpack::instruction::EncoderInstruction;
use crate::qpack::prefix_int;
use crate::qpack::static_table;
use crate::result::QuicheResult;

pub struct QpackEncoder {
    dynamic_table: DynamicTable,
    /// Entries the decoder has not yet been told to expect (queued but
    /// not flushed to the encoder stream).
    pending_instructions: Vec<EncoderInstruction>,
}

fn encode_string<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    let huffman_encoded = crate::qpack::huffman::encode(bytes);
    if huffman_encoded.len() < bytes.len() {
        prefix_int::encode(buf, 7, 0x80, huffman_encoded.len() as u64);
        buf.put_slice(&huffman_encoded);
    } else {
        prefix_int::encode(buf, 7, 0x00, bytes.len() as u64);
        buf.put_slice(bytes);
    }
}

/// RFC 9204 §4.5.1.1: maps the true required insert count onto the
/// truncated value actually carried on the wire.
fn encode_required_insert_count(required_insert_count: u64, max_entries: u64) -> u64 {
    if required_insert_count == 0 {
        0
    } else {
        let full_range = 2 * max_entries;
        (required_insert_count % full_range) + 1
    }
}

impl QpackEncoder {
    pub fn new(dynamic_table_capacity: usize) -> Self {
        Self { dynamic_table: DynamicTable::new(dynamic_table_capacity), pending_instructions: Vec::new() }
    }

    pub fn set_dynamic_table_capacity(&mut self, capacity: usize) -> QuicheResult<()> {
        self.dynamic_table.set_capacity(capacity)?;
        self.pending_instructions.push(EncoderInstruction::SetDynamicTableCapacity(capacity as u64));
        Ok(())
    }

    /// Drains instructions accumulated by `encode_header_block` calls so
    /// far, for the caller to write onto the encoder stream.
    pub fn take_pending_instructions(&mut self) -> Vec<EncoderInstruction> {
        std::mem::take(&mut self.pending_instructions)
    }

    fn max_entries(&self) -> u64 {
        (self.dynamic_table.capacity() / 32) as u64
    }

    /// Encodes a full header block, inserting into the dynamic table (and
    /// queuing the matching encoder-stream instructions) for any header
    /// that isn't already covered by the static table or an existing
    /// dynamic entry and is worth caching (appears more than once is the
    /// caller's call; this always tries to reuse an exact dynamic match).
    pub fn encode_header_block(&mut self, headers: &[(String, String)]) -> Bytes {
        let base = self.dynamic_table.insert_count();
        let mut required_insert_count = 0u64;
        let mut body = BytesMut::new();

        for (name, value) in headers {
            if let Some((index, exact)) = static_table::find(name, value) {
                if exact {
                    encode_indexed_static(&mut body, index as u64);
                    continue;
                }
                if let Some(dyn_index) = self.try_reuse_or_insert(name, value, &mut required_insert_count) {
                    encode_indexed_dynamic(&mut body, base, dyn_index);
                    continue;
                }
                encode_literal_with_name_ref(&mut body, true, index as u64, value.as_bytes());
                continue;
            }

            if let Some(dyn_index) = self.try_reuse_or_insert(name, value, &mut required_insert_count) {
                encode_indexed_dynamic(&mut body, base, dyn_index);
                continue;
            }

            encode_literal_with_literal_name(&mut body, name.as_bytes(), value.as_bytes());
        }

        let mut out = BytesMut::new();
        let encoded_ric = encode_required_insert_count(required_insert_count, self.max_entries());
        prefix_int::encode(&mut out, 8, 0x00, encoded_ric);
        // Delta Base is always 0 (S=0): Base == Required Insert Count.
        prefix_int::encode(&mut out, 7, 0x00, 0);
        out.unsplit(body);
        out.freeze()
    }

    /// Looks for an exact dynamic-table match; if none exists, inserts one
    /// (queuing the matching instruction) as long as it fits the table.
    /// Returns the absolute index either way, bumping `required_insert_count`
    /// to cover it.
    fn try_reuse_or_insert(&mut self, name: &str, value: &str, required_insert_count: &mut u64) -> Option<u64> {
        if let Some((index, true)) = self.dynamic_table.find(name, value) {
            *required_insert_count = (*required_insert_count).max(index + 1);
            return Some(index);
        }
        match self.dynamic_table.insert(name.to_string(), value.to_string()) {
            Ok(index) => {
                self.pending_instructions.push(EncoderInstruction::InsertWithoutNameRef {
                    name: name.as_bytes().to_vec(),
                    value: value.as_bytes().to_vec(),
                });
                *required_insert_count = (*required_insert_count).max(index + 1);
                Some(index)
            }
            Err(_) => None,
        }
    }
}

fn encode_indexed_static<B: BufMut>(buf: &mut B, index: u64) {
    prefix_int::encode(buf, 6, 0b1000_0000, index);
}

/// Dynamic indices are carried Base-relative: `RelativeIndex = Base - 1 - AbsoluteIndex`.
fn encode_indexed_dynamic<B: BufMut>(buf: &mut B, base: u64, absolute_index: u64) {
    let relative = base - 1 - absolute_index;
    prefix_int::encode(buf, 6, 0b1100_0000, relative);
}

fn encode_literal_with_name_ref<B: BufMut>(buf: &mut B, is_static: bool, name_index: u64, value: &[u8]) {
    let high = 0b0100_0000 | if is_static { 0b0001_0000 } else { 0 };
    prefix_int::encode(buf, 4, high, name_index);
    encode_string(buf, value);
}

fn encode_literal_with_literal_name<B: BufMut>(buf: &mut B, name: &[u8], value: &[u8]) {
    let huffman_encoded = crate::qpack::huffman::encode(name);
    if huffman_encoded.len() < name.len() {
        prefix_int::encode(buf, 3, 0b0010_1000, huffman_encoded.len() as u64);
        buf.put_slice(&huffman_encoded);
    } else {
        prefix_int::encode(buf, 3, 0b0010_0000, name.len() as u64);
        buf.put_slice(name);
    }
    encode_string(buf, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_static_only_headers_without_dynamic_growth() {
        let mut encoder = QpackEncoder::new(4096);
        let block = encoder.encode_header_block(&[(":method".into(), "GET".into())]);
        assert!(!block.is_empty());
        assert!(encoder.take_pending_instructions().is_empty());
    }

    #[test]
    fn repeated_custom_header_reuses_dynamic_entry_on_second_call() {
        let mut encoder = QpackEncoder::new(4096);
        encoder.encode_header_block(&[("x-custom".into(), "v1".into())]);
        let first_instructions = encoder.take_pending_instructions();
        assert_eq!(first_instructions.len(), 1);

        encoder.encode_header_block(&[("x-custom".into(), "v1".into())]);
        assert!(encoder.take_pending_instructions().is_empty());
    }

    #[test]
    fn required_insert_count_encoding_rounds_within_full_range() {
        assert_eq!(encode_required_insert_count(0, 100), 0);
        assert_eq!(encode_required_insert_count(5, 100), 6);
    }
}
