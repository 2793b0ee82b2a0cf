//! Primitive value codec for objstream payloads.
//!
//! The engine never interprets payload bytes itself. Domain types encode
//! their fields with a [`PayloadWriter`] and decode them with a
//! [`PayloadReader`]; both honor the stream's byte order for fixed-width
//! values and the stream's float width for "standard" floats.
//!
//! # Encodings
//!
//! - Fixed-width integers and floats: stream endianness
//! - Varints: unsigned LEB128, at most 10 bytes
//! - Strings and blobs: varint length prefix followed by the bytes
//! - Serde values: bincode, length-prefixed like a blob

pub mod error;
pub mod reader;
pub mod varint;
pub mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::PayloadReader;
pub use varint::{decode_varint, encode_varint, varint_len};
pub use writer::PayloadWriter;

/// Byte order and float width shared by a writer/reader pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    pub endian: objstream_types::Endian,
    pub float_width: objstream_types::FloatWidth,
}

impl Layout {
    pub fn new(endian: objstream_types::Endian, float_width: objstream_types::FloatWidth) -> Self {
        Self {
            endian,
            float_width,
        }
    }
}
