//! Binary framing for filesystem-driver log entries
//!
//! Every entry is a fixed header followed by its payload:
//! EntryHeader (16 bytes) + key_len(u16) + value_len(u32) + operation(u8) + padding(u8)
//! + key_bytes + value_bytes
//!
//! Keys are UTF-8, values are JSON-encoded documents.

use std::path::PathBuf;

use crate::error::{BurrowError, BurrowResult};
use crate::value::Document;

/// Magic bytes identifying a Burrow log entry: "BRRW"
pub const MAGIC_ARRAY: [u8; 4] = [0x42, 0x52, 0x52, 0x57];

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Fixed payload prefix: key_len + value_len + operation + padding
const PAYLOAD_PREFIX: usize = 8;

/// Log operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or overwrite a key
    Put = 1,
    /// Delete a key
    Delete = 2,
    /// Forget every earlier entry; starts a compacted snapshot
    Clear = 3,
}

impl Operation {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            3 => Some(Operation::Clear),
            _ => None,
        }
    }
}

/// Layout:
///   [0..4]   magic:    [u8;4] - "BRRW"
///   [4..8]   length:   u32    - payload length in bytes
///   [8..12]  checksum: u32    - CRC32C of payload bytes
///   [12]     op:       u8
///   [13..16] reserved: [u8;3]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
    pub op: u8,
}

impl EntryHeader {
    pub fn new(length: u32, checksum: u32, op: Operation) -> Self {
        Self { magic: MAGIC_ARRAY, length, checksum, op: op as u8 }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.op;
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            op: bytes[12],
        }
    }
}

/// A decoded log entry. `value` is `None` for deletes and clears.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub key: String,
    pub value: Option<Document>,
    pub operation: Operation,
}

/// Size limits enforced before anything is allocated.
#[derive(Debug, Clone, Copy)]
pub struct EntryLimits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

fn corrupted(offset: usize, reason: impl Into<String>) -> BurrowError {
    BurrowError::LogCorrupted {
        path: PathBuf::from("<buffer>"),
        offset: offset as u64,
        reason: reason.into(),
    }
}

/// Encode a put (with `value`) or delete (without) into a framed entry.
pub fn encode_entry(
    key: &str,
    value: Option<&Document>,
    limits: EntryLimits,
) -> BurrowResult<Vec<u8>> {
    if key.len() > limits.max_key_size {
        return Err(BurrowError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: limits.max_key_size as u64,
            component: "key",
        });
    }

    let (op, value_bytes) = match value {
        Some(doc) => (Operation::Put, serde_json::to_vec(doc)?),
        None => (Operation::Delete, Vec::new()),
    };

    if value_bytes.len() > limits.max_value_size {
        return Err(BurrowError::OversizedEntry {
            entry_size: value_bytes.len() as u64,
            max_size: limits.max_value_size as u64,
            component: "value",
        });
    }

    Ok(frame(op, key.as_bytes(), &value_bytes))
}

/// Encode the entry that opens a compacted segment.
pub fn encode_clear() -> Vec<u8> {
    frame(Operation::Clear, &[], &[])
}

fn frame(op: Operation, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PAYLOAD_PREFIX + key.len() + value.len());
    payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
    payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
    payload.push(op as u8);
    payload.push(0);
    payload.extend_from_slice(key);
    payload.extend_from_slice(value);

    let header = EntryHeader::new(payload.len() as u32, crc32c::crc32c(&payload), op);

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(&payload);
    buffer
}

/// Decode one framed entry from the start of `data`.
pub fn decode_entry(data: &[u8]) -> BurrowResult<LogEntry> {
    let Some(header_bytes) = data.get(..HEADER_SIZE) else {
        return Err(corrupted(
            0,
            format!("entry too short: {} bytes, need at least {}", data.len(), HEADER_SIZE),
        ));
    };
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(header_bytes);
    let header = EntryHeader::from_bytes(&raw);

    if header.magic != MAGIC_ARRAY {
        return Err(BurrowError::NoMagicFound {
            path: PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(BurrowError::TornWrite {
            path: PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }
    let payload = &data[HEADER_SIZE..payload_end];

    let actual = crc32c::crc32c(payload);
    if actual != header.checksum {
        return Err(BurrowError::ChecksumMismatch {
            path: PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual,
            offset: HEADER_SIZE as u64,
        });
    }

    if payload.len() < PAYLOAD_PREFIX {
        return Err(corrupted(HEADER_SIZE, "payload too short for length fields"));
    }
    let key_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let value_len = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    let operation = Operation::from_byte(payload[6])
        .ok_or_else(|| {
            corrupted(HEADER_SIZE + 6, format!("invalid operation type: {}", payload[6]))
        })?;

    let key_end = PAYLOAD_PREFIX + key_len;
    let value_end = key_end + value_len;
    if payload.len() < value_end {
        return Err(corrupted(
            HEADER_SIZE,
            format!(
                "payload too short: need {} bytes for key({}) + value({})",
                value_end, key_len, value_len
            ),
        ));
    }

    let key = std::str::from_utf8(&payload[PAYLOAD_PREFIX..key_end])
        .map_err(|e| corrupted(HEADER_SIZE + PAYLOAD_PREFIX, format!("key is not UTF-8: {}", e)))?
        .to_string();

    let value = match operation {
        Operation::Put => Some(serde_json::from_slice::<Document>(&payload[key_end..value_end])?),
        Operation::Delete | Operation::Clear => None,
    };

    Ok(LogEntry { key, value, operation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LIMITS: EntryLimits = EntryLimits { max_key_size: 16, max_value_size: 64 };

    fn doc() -> Document {
        json!({ "blockNumber": 7, "hash": "0xabc" }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_put_roundtrip() {
        let bytes = encode_entry("block-7", Some(&doc()), LIMITS).unwrap();
        let entry = decode_entry(&bytes).unwrap();
        assert_eq!(entry.key, "block-7");
        assert_eq!(entry.value, Some(doc()));
        assert_eq!(entry.operation, Operation::Put);
    }

    #[test]
    fn test_delete_has_no_value() {
        let bytes = encode_entry("gone", None, LIMITS).unwrap();
        let entry = decode_entry(&bytes).unwrap();
        assert_eq!(entry.operation, Operation::Delete);
        assert!(entry.value.is_none());
    }

    #[test]
    fn test_clear_entry_decodes() {
        let entry = decode_entry(&encode_clear()).unwrap();
        assert_eq!(entry.operation, Operation::Clear);
        assert!(entry.key.is_empty());
        assert!(entry.value.is_none());
    }

    #[test]
    fn test_oversized_key_rejected() {
        let key = "k".repeat(17);
        let result = encode_entry(&key, Some(&doc()), LIMITS);
        assert!(matches!(result, Err(BurrowError::OversizedEntry { component: "key", .. })));
    }

    #[test]
    fn test_oversized_value_rejected() {
        let big = json!({ "blob": "x".repeat(100) }).as_object().cloned().unwrap();
        let result = encode_entry("k", Some(&big), LIMITS);
        assert!(matches!(result, Err(BurrowError::OversizedEntry { component: "value", .. })));
    }

    #[test]
    fn test_corrupted_magic_detected() {
        let mut data = encode_entry("key", Some(&doc()), LIMITS).unwrap();
        data[0] = 0xFF;
        assert!(matches!(decode_entry(&data), Err(BurrowError::NoMagicFound { .. })));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut data = encode_entry("key", Some(&doc()), LIMITS).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(decode_entry(&data), Err(BurrowError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_entry_is_torn() {
        let data = encode_entry("key", Some(&doc()), LIMITS).unwrap();
        let cut = &data[..data.len() - 3];
        assert!(matches!(decode_entry(cut), Err(BurrowError::TornWrite { .. })));
    }
}
