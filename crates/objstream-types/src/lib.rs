//! Foundation types for objstream.
//!
//! This crate provides the identity and version types shared by the codec,
//! the record framing layer, and the engine. Every other objstream crate
//! depends on `objstream-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Per-stream object identity as it appears on the wire
//! - [`BufferId`]: Per-stream identity of a shared buffer
//! - [`StreamVersion`]: Major/minor version pair negotiated by the header
//! - [`Endian`], [`FloatWidth`], [`IdWidth`]: Stream-wide encoding flags

pub mod error;
pub mod object;
pub mod version;

pub use error::TypeError;
pub use object::{BufferId, ObjectId};
pub use version::{
    Endian, FloatWidth, IdWidth, StreamVersion, CURRENT_MAJOR, CURRENT_MINOR, FILE_DATA_MINOR,
    MIN_SUPPORTED_MAJOR, NESTED_FRAMING_MINOR,
};
