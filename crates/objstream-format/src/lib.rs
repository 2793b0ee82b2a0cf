//! Stream header, record framing, and byte sources/sinks for objstream.
//!
//! A stream is a fixed-size header followed by length-prefixed frames:
//!
//! ```text
//! [Header] [Frame] [Frame] ... [Frame]
//! ```
//!
//! # Architecture
//!
//! - **StreamHeader**: magic, version, endianness, float width, id width
//! - **RecordCodec**: encodes/decodes frame bodies for one header
//! - **StreamSink**: writes a header, records, and out-of-band data blocks
//! - **RecordSource** / **StreamSource**: reads them back from memory or disk
//!
//! This crate knows the shape of records but nothing about what their
//! payloads mean; resolving object references is the engine's job.

pub mod error;
pub mod header;
pub mod record;
pub mod sink;
pub mod source;

pub use error::{FormatError, FormatResult};
pub use header::{StreamHeader, HEADER_LEN, MAGIC};
pub use record::{FileDataRef, Framing, ObjectRecord, Opcode, Record, RecordCodec, TypeRef};
pub use sink::StreamSink;
pub use source::{RecordSource, StreamSource, DEFAULT_MAX_RECORD_LEN};
