//! Deterministic, Ethereum-compatible RLP encoding (spec §4.5).
//!
//! Encoding rules, verbatim from the spec:
//!
//! - A single byte in `[0x00, 0x7f]` encodes as itself.
//! - A byte string of length 0..55 encodes as `0x80 + len || bytes`.
//! - Longer byte strings: `0xb7 + len_of_len_bytes || big-endian length || bytes`.
//! - Lists of total payload length 0..55: `0xc0 + len || payload`.
//! - Longer lists: `0xf7 + len_of_len_bytes || big-endian length || payload`.
//! - Non-negative integers encode as minimal big-endian byte strings (no
//!   leading zeros; zero encodes as the empty string).
//!
//! `decode` is total on well-formed input and errors on truncation or
//! disallowed leading zeros (non-minimal length encodings).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RlpError {
    #[error("unexpected end of input")]
    Truncated,
    #[error("non-minimal length encoding (leading zero byte)")]
    NonMinimalLength,
    #[error("trailing bytes after a complete RLP item")]
    TrailingBytes,
    #[error("length encoding overflows usize")]
    LengthOverflow,
}

pub type Result<T> = std::result::Result<T, RlpError>;

/// An RLP-encodable value: either a byte string or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn list(items: impl Into<Vec<Value>>) -> Self {
        Value::List(items.into())
    }

    /// Encode a non-negative integer as a minimal big-endian byte string;
    /// zero encodes as the empty string.
    pub fn uint(n: u64) -> Self {
        Value::Bytes(encode_length_bytes(n as usize))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            Value::Bytes(_) => None,
        }
    }

    /// Decode a byte-string value encoded via [`Value::uint`].
    pub fn to_uint(&self) -> Option<u64> {
        let bytes = self.as_bytes()?;
        if bytes.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Some(u64::from_be_bytes(buf))
    }
}

/// Encode a value to its canonical RLP byte representation.
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Bytes(data) => encode_bytes(data),
        Value::List(items) => {
            let encoded_items: Vec<Vec<u8>> = items.iter().map(encode).collect();
            encode_list_payload(&encoded_items)
        }
    }
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() < 56 {
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(0x80 + data.len() as u8);
        out.extend_from_slice(data);
        out
    } else {
        let len_bytes = encode_length_bytes(data.len());
        let mut out = Vec::with_capacity(1 + len_bytes.len() + data.len());
        out.push(0xb7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(data);
        out
    }
}

fn encode_list_payload(encoded_items: &[Vec<u8>]) -> Vec<u8> {
    let total_len: usize = encoded_items.iter().map(|e| e.len()).sum();
    let mut out = Vec::with_capacity(total_len + 9);
    if total_len < 56 {
        out.push(0xc0 + total_len as u8);
    } else {
        let len_bytes = encode_length_bytes(total_len);
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
    for item in encoded_items {
        out.extend_from_slice(item);
    }
    out
}

/// Minimal big-endian encoding of `len` with no leading zero byte; zero
/// encodes as the empty byte string.
fn encode_length_bytes(len: usize) -> Vec<u8> {
    if len == 0 {
        return Vec::new();
    }
    let bytes = len.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[start..].to_vec()
}

/// Decode exactly one RLP item, requiring the entire input to be consumed.
pub fn decode(input: &[u8]) -> Result<Value> {
    let (value, consumed) = decode_one(input)?;
    if consumed != input.len() {
        return Err(RlpError::TrailingBytes);
    }
    Ok(value)
}

/// Decode one RLP item from the front of `input`, returning the value and
/// the number of bytes consumed. Allows trailing bytes (used recursively
/// when decoding list payloads).
pub fn decode_one(input: &[u8]) -> Result<(Value, usize)> {
    let tag = *input.first().ok_or(RlpError::Truncated)?;
    match tag {
        0x00..=0x7f => Ok((Value::Bytes(vec![tag]), 1)),
        0x80..=0xb7 => {
            let len = (tag - 0x80) as usize;
            let data = slice_checked(input, 1, len)?;
            Ok((Value::Bytes(data.to_vec()), 1 + len))
        }
        0xb8..=0xbf => {
            let len_of_len = (tag - 0xb7) as usize;
            let len_bytes = slice_checked(input, 1, len_of_len)?;
            let len = decode_length(len_bytes)?;
            let data = slice_checked(input, 1 + len_of_len, len)?;
            Ok((Value::Bytes(data.to_vec()), 1 + len_of_len + len))
        }
        0xc0..=0xf7 => {
            let total_len = (tag - 0xc0) as usize;
            let payload = slice_checked(input, 1, total_len)?;
            let items = decode_list_items(payload)?;
            Ok((Value::List(items), 1 + total_len))
        }
        0xf8..=0xff => {
            let len_of_len = (tag - 0xf7) as usize;
            let len_bytes = slice_checked(input, 1, len_of_len)?;
            let total_len = decode_length(len_bytes)?;
            let payload = slice_checked(input, 1 + len_of_len, total_len)?;
            let items = decode_list_items(payload)?;
            Ok((Value::List(items), 1 + len_of_len + total_len))
        }
    }
}

fn decode_list_items(mut payload: &[u8]) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (value, consumed) = decode_one(payload)?;
        items.push(value);
        payload = &payload[consumed..];
    }
    Ok(items)
}

fn slice_checked(input: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start.checked_add(len).ok_or(RlpError::LengthOverflow)?;
    input.get(start..end).ok_or(RlpError::Truncated)
}

fn decode_length(bytes: &[u8]) -> Result<usize> {
    if bytes.is_empty() {
        return Err(RlpError::Truncated);
    }
    if bytes[0] == 0 {
        return Err(RlpError::NonMinimalLength);
    }
    if bytes.len() > std::mem::size_of::<usize>() {
        return Err(RlpError::LengthOverflow);
    }
    let mut buf = [0u8; std::mem::size_of::<usize>()];
    buf[std::mem::size_of::<usize>() - bytes.len()..].copy_from_slice(bytes);
    Ok(usize::from_be_bytes(buf))
}
