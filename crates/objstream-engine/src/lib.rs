//! Object-graph persistence for objstream.
//!
//! The engine turns a graph of heterogeneous, possibly cyclic objects into
//! a stream and back, preserving identity: an object referenced from many
//! places is written once and read back as one object.
//!
//! # Architecture
//!
//! - **Graph** / **Handle**: arena of [`Persistable`] objects; references
//!   between objects are handles
//! - **Writer**: assigns stream ids on first reference and writes each
//!   reachable object once
//! - **Reader**: decodes records through a [`TypeRegistry`], patching
//!   references to objects that arrive later
//! - **SharedBuffer**: immutable bytes deduplicated across holders
//! - **AuxChannel**: side data shared by the decoders of one pass
//!
//! ```text
//! Graph --Writer--> [header][records...] --Reader--> Graph
//! ```

pub mod aux_channel;
pub mod config;
pub mod error;
pub mod finalize;
pub mod graph;
pub mod reader;
pub mod registry;
pub mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

use std::io::Cursor;

use bytes::Bytes;
use objstream_format::StreamSource;

pub use aux_channel::AuxChannel;
pub use config::{EngineConfig, IdWidthPolicy, ReaderConfig, WriterConfig};
pub use error::{EngineError, EngineResult, UnresolvedReference};
pub use finalize::FinalizeContext;
pub use graph::{AsAny, FieldSite, Graph, Handle, Persistable, SharedBuffer, StageId};
pub use reader::{PendingSlot, ReadContext, ReadOutcome, Reader, ResolveStatus};
pub use registry::{Decode, DecodeFn, RegistryError, TypeRegistry};
pub use writer::{WriteContext, WriteSummary, Writer};

/// Write `roots` and everything they reach into a new in-memory stream.
pub fn encode_graph(graph: &Graph, roots: &[Handle], config: &WriterConfig) -> EngineResult<Vec<u8>> {
    let mut writer = Writer::new(graph, Vec::new(), config)?;
    writer.write_all(roots)?;
    let (bytes, _) = writer.finish()?;
    Ok(bytes)
}

/// Read a whole in-memory stream.
pub fn decode_graph(
    data: impl Into<Bytes>,
    registry: &TypeRegistry,
    config: &ReaderConfig,
) -> EngineResult<ReadOutcome<StreamSource<Cursor<Bytes>>>> {
    let source = config.source_from_bytes(data);
    Reader::new(source, registry, config.clone()).read_all()
}
