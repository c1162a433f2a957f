use std::str::Utf8Error;

use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    /// The input ended before the value was complete, or a length prefix
    /// exceeded the remaining input.
    #[error("not enough bytes remaining in input")]
    InsufficientBytes,
    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8(#[from] Utf8Error),
    /// A boolean byte that was neither 0 nor 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBoolean(u8),
    /// A length or frame prefix outside the representable or permitted
    /// range.
    #[error("length prefix out of bounds")]
    LengthOverflow,
    /// An enum-like tag byte with no corresponding variant.
    #[error("invalid {kind} tag {tag}")]
    InvalidTag { kind: &'static str, tag: i32 },
    /// A frame was decoded as a packet type with a different ID.
    #[error("packet ID mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: i32, actual: i32 },
    /// A packet body was not fully consumed by decoding.
    #[error("{0} bytes left over after decoding packet body")]
    TrailingBytes(usize),
}
