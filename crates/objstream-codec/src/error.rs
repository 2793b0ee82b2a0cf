use thiserror::Error;

/// Errors produced while decoding primitive values from a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated payload at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("varint overflow at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("invalid boolean byte {value} at offset {offset}")]
    InvalidBool { offset: usize, value: u8 },

    #[error("length {length} at offset {offset} does not fit in memory")]
    LengthOverflow { offset: usize, length: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
