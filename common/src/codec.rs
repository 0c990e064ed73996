//! Length-delimited binary encoding for block records.
//!
//! One-block files hold a single record; merged bundles hold the records of
//! a full bundle concatenated back to back. Artifacts whose store extension
//! ends in `.zst` are zstd-compressed as a whole, not per record.
//!
//! # Record layout
//!
//! ```text
//! | len (u32 BE, bytes after this field)                     |
//! | version (u8, currently 0x01)                             |
//! | num (u64 BE) | lib_num (u64 BE) | timestamp_ms (i64 BE)  |
//! | id_len (u16 BE) | id | prev_len (u16 BE) | previous_id   |
//! | payload (remaining bytes of the record)                  |
//! ```
//!
//! Decoding is strict: an unknown version, a truncated record, or a
//! non-UTF-8 id fails rather than being papered over.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::block::Block;

/// Record format version (currently 0x01).
pub const RECORD_VERSION: u8 = 0x01;

/// zstd level used for `.zst` artifacts.
pub const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Truncated { needed: usize, remaining: usize },
    UnknownVersion(u8),
    InvalidField(String),
    Compression(String),
}

impl std::error::Error for CodecError {}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Truncated { needed, remaining } => {
                write!(f, "truncated record: needed {} bytes, {} remaining", needed, remaining)
            }
            CodecError::UnknownVersion(v) => write!(f, "unknown record version: 0x{:02x}", v),
            CodecError::InvalidField(msg) => write!(f, "invalid field: {}", msg),
            CodecError::Compression(msg) => write!(f, "compression error: {}", msg),
        }
    }
}

/// Appends one length-delimited block record to `buf`.
pub fn write_block(buf: &mut BytesMut, block: &Block) {
    let body_len = 1 + 8 + 8 + 8 + 2 + block.id.len() + 2 + block.previous_id.len() + block.payload.len();
    buf.reserve(4 + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u8(RECORD_VERSION);
    buf.put_u64(block.num);
    buf.put_u64(block.lib_num);
    buf.put_i64(block.timestamp.timestamp_millis());
    buf.put_u16(block.id.len() as u16);
    buf.put_slice(block.id.as_bytes());
    buf.put_u16(block.previous_id.len() as u16);
    buf.put_slice(block.previous_id.as_bytes());
    buf.put_slice(&block.payload);
}

/// Encodes a single block as one length-delimited record.
pub fn encode_block(block: &Block) -> Bytes {
    let mut buf = BytesMut::new();
    write_block(&mut buf, block);
    buf.freeze()
}

/// Decodes the next record from `buf`, advancing it past the record.
pub fn decode_block(buf: &mut Bytes) -> Result<Block, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated { needed: 4, remaining: buf.remaining() });
    }
    let body_len = buf.get_u32() as usize;
    if buf.remaining() < body_len {
        return Err(CodecError::Truncated { needed: body_len, remaining: buf.remaining() });
    }
    let mut body = buf.split_to(body_len);

    let version = body.get_u8();
    if version != RECORD_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    if body.remaining() < 8 + 8 + 8 + 2 {
        return Err(CodecError::Truncated { needed: 26, remaining: body.remaining() });
    }
    let num = body.get_u64();
    let lib_num = body.get_u64();
    let timestamp_ms = body.get_i64();
    let id = read_string(&mut body, "id")?;
    let previous_id = read_string(&mut body, "previous_id")?;
    let payload = body;

    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| CodecError::InvalidField(format!("timestamp out of range: {}", timestamp_ms)))?;

    Ok(Block { num, id, previous_id, timestamp, lib_num, payload })
}

fn read_string(body: &mut Bytes, field: &str) -> Result<String, CodecError> {
    if body.remaining() < 2 {
        return Err(CodecError::Truncated { needed: 2, remaining: body.remaining() });
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(CodecError::Truncated { needed: len, remaining: body.remaining() });
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| CodecError::InvalidField(format!("{} is not valid UTF-8", field)))
}

/// Decodes every record in `content`. Trailing garbage fails the whole read.
pub fn decode_blocks(content: Bytes) -> Result<Vec<Block>, CodecError> {
    let mut buf = content;
    let mut blocks = Vec::new();
    while buf.has_remaining() {
        blocks.push(decode_block(&mut buf)?);
    }
    Ok(blocks)
}

pub fn compress(content: &[u8]) -> Result<Bytes, CodecError> {
    let compressed = zstd::encode_all(content, COMPRESSION_LEVEL)
        .map_err(|e| CodecError::Compression(format!("zstd encode: {}", e)))?;
    Ok(Bytes::from(compressed))
}

pub fn decompress(content: &[u8]) -> Result<Bytes, CodecError> {
    let raw = zstd::decode_all(content)
        .map_err(|e| CodecError::Compression(format!("zstd decode: {}", e)))?;
    Ok(Bytes::from(raw))
}
