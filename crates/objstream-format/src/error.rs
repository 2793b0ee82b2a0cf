use objstream_codec::CodecError;
use objstream_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid stream magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("truncated stream at offset {offset}: {reason}")]
    Truncated { offset: u64, reason: String },

    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("record at offset {offset} is {size} bytes, limit is {max}")]
    RecordTooLarge { offset: u64, size: u64, max: u64 },

    #[error("CRC32 mismatch for file data at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("record framing does not match stream version: {0}")]
    FramingMismatch(String),

    #[error("stream header has not been read or written yet")]
    HeaderPending,

    #[error("stream header already processed")]
    HeaderRepeated,

    #[error(transparent)]
    Types(#[from] TypeError),

    #[error("codec error at offset {offset}: {source}")]
    Codec {
        offset: u64,
        #[source]
        source: CodecError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FormatResult<T> = Result<T, FormatError>;
