//! Graph-to-stream encoder.
//!
//! Objects receive ids the first time they are referenced and are written
//! breadth-first from a work queue, so every object is written exactly
//! once no matter how many holders point at it or whether the graph is
//! cyclic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use objstream_codec::PayloadWriter;
use objstream_format::{Framing, ObjectRecord, RecordCodec, StreamHeader, StreamSink, TypeRef};
use objstream_types::{BufferId, IdWidth, ObjectId};

use crate::config::WriterConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{Graph, Handle, SharedBuffer};

/// Marker after a buffer id: the content follows.
pub(crate) const BUFFER_CONTENT: u8 = 1;
/// Marker after a buffer id: the content went out with an earlier holder.
pub(crate) const BUFFER_SEEN: u8 = 0;

/// Counters for a completed write pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Object records with a payload.
    pub objects: usize,
    /// Roots emitted as back-references because they were already written.
    pub back_refs: usize,
    /// Distinct types defined in the stream.
    pub types: usize,
    /// Distinct shared buffers written.
    pub buffers: usize,
    pub file_data_blocks: usize,
    /// Total stream length in bytes.
    pub bytes: u64,
}

/// Identity bookkeeping for one write pass.
#[derive(Debug)]
struct WriteState {
    seen: HashMap<Handle, ObjectId>,
    next_id: Option<ObjectId>,
    id_width: IdWidth,
    queue: VecDeque<Handle>,
    written: HashSet<Handle>,
    buffers: HashMap<usize, (BufferId, SharedBuffer)>,
    next_buffer: Option<BufferId>,
    file_data: Vec<Bytes>,
}

impl WriteState {
    fn new(id_width: IdWidth) -> Self {
        Self {
            seen: HashMap::new(),
            next_id: Some(ObjectId::first()),
            id_width,
            queue: VecDeque::new(),
            written: HashSet::new(),
            buffers: HashMap::new(),
            next_buffer: Some(BufferId::first()),
            file_data: Vec::new(),
        }
    }

    /// Id of `handle`, assigning one and queueing the object on first sight.
    fn assign(&mut self, handle: Handle) -> EngineResult<ObjectId> {
        if let Some(id) = self.seen.get(&handle) {
            return Ok(*id);
        }
        let exhausted = EngineError::IdSpaceExhausted {
            width: self.id_width,
        };
        let id = self.next_id.ok_or(exhausted)?;
        if id.check_width(self.id_width).is_err() {
            return Err(EngineError::IdSpaceExhausted {
                width: self.id_width,
            });
        }
        self.next_id = id.next();
        self.seen.insert(handle, id);
        self.queue.push_back(handle);
        trace!(%handle, object = %id, "object id assigned");
        Ok(id)
    }
}

/// Handed to [`Persistable::encode`](crate::Persistable::encode).
pub struct WriteContext<'s> {
    state: &'s mut WriteState,
    graph: &'s Graph,
    codec: &'s RecordCodec,
    type_name: &'static str,
}

impl<'s> WriteContext<'s> {
    pub fn header(&self) -> &StreamHeader {
        self.codec.header()
    }

    /// Write a reference to another object, or the null reference.
    ///
    /// The target is queued for writing if this is its first reference.
    pub fn write_ref(&mut self, out: &mut PayloadWriter, target: Option<Handle>) -> EngineResult<()> {
        let id = match target {
            None => ObjectId::null(),
            Some(handle) => {
                if !self.graph.contains(handle) {
                    return Err(EngineError::InvariantViolation(format!(
                        "{} references {handle}, which is not in the graph",
                        self.type_name
                    )));
                }
                self.state.assign(handle)?
            }
        };
        self.codec.encode_object_id(out, id)?;
        Ok(())
    }

    /// Write a shared buffer, or the null buffer.
    ///
    /// Content goes into the stream only the first time a given allocation
    /// is seen; later holders write its id and an empty content marker.
    pub fn write_buffer(&mut self, out: &mut PayloadWriter, buffer: Option<&SharedBuffer>) -> EngineResult<()> {
        let Some(buffer) = buffer else {
            out.put_varint(0);
            return Ok(());
        };
        if let Some((id, _)) = self.state.buffers.get(&buffer.addr()) {
            out.put_varint(u64::from(id.get()));
            out.put_u8(BUFFER_SEEN);
            return Ok(());
        }
        let id = self
            .state
            .next_buffer
            .ok_or_else(|| EngineError::Unsupported("shared buffer ids exhausted".into()))?;
        self.state.next_buffer = id.next();
        self.state
            .buffers
            .insert(buffer.addr(), (id, buffer.clone()));
        out.put_varint(u64::from(id.get()));
        out.put_u8(BUFFER_CONTENT);
        out.put_blob(buffer.as_slice());
        trace!(buffer = %id, len = buffer.len(), "shared buffer written");
        Ok(())
    }

    /// Queue an out-of-band data block. It is placed in the stream just
    /// before this object's record, and the decoder claims it with
    /// [`ReadContext::read_file_data`](crate::ReadContext::read_file_data).
    pub fn write_file_data(&mut self, data: impl Into<Bytes>) -> EngineResult<()> {
        let version = self.codec.header().version;
        if !version.supports_file_data() {
            return Err(EngineError::Unsupported(format!(
                "{} wants file data, which a version {version} stream cannot carry",
                self.type_name
            )));
        }
        self.state.file_data.push(data.into());
        Ok(())
    }
}

/// Encodes objects of one [`Graph`] into a stream.
///
/// Ids are stable for the writer's lifetime: writing the same root twice
/// produces a back-reference the second time.
pub struct Writer<'g, W: Write> {
    graph: &'g Graph,
    sink: StreamSink<W>,
    codec: RecordCodec,
    state: WriteState,
    types: HashMap<&'static str, u32>,
    summary: WriteSummary,
    failed: Option<String>,
}

impl<'g, W: Write> Writer<'g, W> {
    /// Start a stream: the header is written immediately.
    pub fn new(graph: &'g Graph, inner: W, config: &WriterConfig) -> EngineResult<Self> {
        let header = config.header_for(graph.len())?;
        let mut sink = StreamSink::new(inner);
        sink.write_header(header)?;
        debug!(
            version = %header.version,
            id_width = ?header.id_width,
            objects = graph.len(),
            "write pass started"
        );
        Ok(Self {
            graph,
            sink,
            codec: RecordCodec::new(header),
            state: WriteState::new(header.id_width),
            types: HashMap::new(),
            summary: WriteSummary::default(),
            failed: None,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        self.codec.header()
    }

    /// Id assigned to `handle` so far in this pass.
    pub fn id_of(&self, handle: Handle) -> Option<ObjectId> {
        self.state.seen.get(&handle).copied()
    }

    /// Write `root` and everything reachable from it that has not been
    /// written yet. Returns the root's id.
    pub fn write_object(&mut self, root: Handle) -> EngineResult<ObjectId> {
        if let Some(reason) = &self.failed {
            return Err(EngineError::PassAborted(reason.clone()));
        }
        let result = self.write_root(root);
        if let Err(e) = &result {
            warn!(error = %e, "write pass aborted");
            self.failed = Some(e.to_string());
        }
        result
    }

    /// Write several roots in order.
    pub fn write_all(&mut self, roots: &[Handle]) -> EngineResult<Vec<ObjectId>> {
        roots.iter().map(|&root| self.write_object(root)).collect()
    }

    fn write_root(&mut self, root: Handle) -> EngineResult<ObjectId> {
        if !self.graph.contains(root) {
            return Err(EngineError::InvariantViolation(format!(
                "root {root} is not in the graph"
            )));
        }
        let nested = self.codec.header().version.uses_nested_framing();
        let mut framing = if nested { Framing::Push } else { Framing::Bare };

        if self.state.written.contains(&root) {
            let id = self.id_of(root).ok_or_else(|| {
                EngineError::InvariantViolation(format!("written root {root} has no id"))
            })?;
            self.sink.write_object(framing, &ObjectRecord::back_ref(id))?;
            if nested {
                self.sink.write_pop()?;
            }
            self.summary.back_refs += 1;
            debug!(object = %id, "root already written, emitted back-reference");
            return Ok(id);
        }

        let id = self.state.assign(root)?;
        while let Some(handle) = self.state.queue.pop_front() {
            self.write_body(handle, framing)?;
            if nested {
                framing = Framing::Adjunct;
            }
        }
        if nested {
            self.sink.write_pop()?;
        }
        debug!(object = %id, written = self.summary.objects, "root written");
        Ok(id)
    }

    fn write_body(&mut self, handle: Handle, framing: Framing) -> EngineResult<()> {
        let graph = self.graph;
        let object = graph.get(handle).ok_or_else(|| {
            EngineError::InvariantViolation(format!("queued handle {handle} is not in the graph"))
        })?;
        let id = self.id_of(handle).ok_or_else(|| {
            EngineError::InvariantViolation(format!("queued handle {handle} has no id"))
        })?;
        let type_name = object.type_name();

        let mut out = PayloadWriter::new(self.codec.header().layout());
        let mut ctx = WriteContext {
            state: &mut self.state,
            graph,
            codec: &self.codec,
            type_name,
        };
        object.encode(&mut out, &mut ctx)?;

        for data in std::mem::take(&mut self.state.file_data) {
            let data_ref = self.sink.write_file_data(&data)?;
            self.summary.file_data_blocks += 1;
            trace!(object = %id, offset = data_ref.offset, len = data_ref.len, "file data written");
        }

        let type_ref = match self.types.get(type_name) {
            Some(&index) => TypeRef::Index(index),
            None => {
                let index = self.types.len() as u32 + 1;
                self.types.insert(type_name, index);
                debug!(type_name, index, "type defined");
                TypeRef::Define {
                    index,
                    name: type_name.to_owned(),
                }
            }
        };
        let record = ObjectRecord {
            type_ref,
            object_id: id,
            payload: Bytes::from(out.into_bytes()),
        };
        let offset = self.sink.write_object(framing, &record)?;
        self.state.written.insert(handle);
        self.summary.objects += 1;
        trace!(object = %id, type_name, offset, "object written");
        Ok(())
    }

    /// Flush the stream and return the underlying writer.
    pub fn finish(self) -> EngineResult<(W, WriteSummary)> {
        if let Some(reason) = self.failed {
            return Err(EngineError::PassAborted(reason));
        }
        let summary = WriteSummary {
            types: self.types.len(),
            buffers: self.state.buffers.len(),
            bytes: self.sink.position(),
            ..self.summary
        };
        debug!(
            objects = summary.objects,
            types = summary.types,
            buffers = summary.buffers,
            bytes = summary.bytes,
            "write pass finished"
        );
        Ok((self.sink.into_inner()?, summary))
    }
}

impl<W: Write> std::fmt::Debug for Writer<'_, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("header", self.codec.header())
            .field("assigned", &self.state.seen.len())
            .field("summary", &self.summary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdWidthPolicy;
    use crate::fixtures::{Mesh, Node, Texture};
    use objstream_format::{Record, RecordSource, StreamSource, HEADER_LEN};
    use objstream_types::CURRENT_MINOR;

    fn records(bytes: Vec<u8>) -> Vec<Record> {
        let mut source = StreamSource::from_bytes(bytes);
        source.read_header().unwrap();
        let mut out = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            out.push(record);
        }
        out
    }

    fn object_ids(records: &[Record]) -> Vec<u32> {
        records
            .iter()
            .filter_map(|r| match r {
                Record::Object { object, .. } => Some(object.object_id.get()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_pass_is_header_only() {
        let graph = Graph::new();
        let writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        let (bytes, summary) = writer.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(summary.objects, 0);
        assert_eq!(summary.bytes, HEADER_LEN as u64);
    }

    #[test]
    fn ids_follow_first_reference_order() {
        let mut graph = Graph::new();
        let c = graph.insert(Node::new("c"));
        let b = graph.insert(Node::new("b"));
        let a = graph.insert(Node::with_links("a", vec![Some(b), Some(c), Some(b)]));

        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        assert_eq!(writer.write_object(a).unwrap(), ObjectId::first());
        assert_eq!(writer.id_of(b), Some(ObjectId::from_raw(2)));
        assert_eq!(writer.id_of(c), Some(ObjectId::from_raw(3)));
        let (bytes, summary) = writer.finish().unwrap();
        assert_eq!(summary.objects, 3);
        assert_eq!(summary.types, 1);

        let recs = records(bytes);
        assert_eq!(object_ids(&recs), vec![1, 2, 3]);
        assert!(matches!(recs[0], Record::Object { framing: Framing::Push, .. }));
        assert!(matches!(recs[1], Record::Object { framing: Framing::Adjunct, .. }));
        assert_eq!(recs.last(), Some(&Record::Pop));
    }

    #[test]
    fn type_is_defined_once() {
        let mut graph = Graph::new();
        let b = graph.insert(Node::new("b"));
        let a = graph.insert(Node::with_links("a", vec![Some(b)]));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        writer.write_object(a).unwrap();
        let (bytes, _) = writer.finish().unwrap();
        let recs = records(bytes);
        let type_refs: Vec<_> = recs
            .iter()
            .filter_map(|r| match r {
                Record::Object { object, .. } => Some(object.type_ref.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            type_refs,
            vec![
                TypeRef::Define {
                    index: 1,
                    name: "Node".into()
                },
                TypeRef::Index(1),
            ]
        );
    }

    #[test]
    fn cycle_is_written_once_per_object() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::new("a"));
        let b = graph.insert(Node::with_links("b", vec![Some(a)]));
        graph.downcast_mut::<Node>(a).unwrap().links.push(Some(b));

        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        writer.write_object(a).unwrap();
        let (_, summary) = writer.finish().unwrap();
        assert_eq!(summary.objects, 2);
    }

    #[test]
    fn repeated_root_becomes_back_reference() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::new("a"));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        let first = writer.write_object(a).unwrap();
        let second = writer.write_object(a).unwrap();
        assert_eq!(first, second);
        let (bytes, summary) = writer.finish().unwrap();
        assert_eq!(summary.objects, 1);
        assert_eq!(summary.back_refs, 1);

        let recs = records(bytes);
        assert_eq!(recs.len(), 4);
        assert!(matches!(
            &recs[2],
            Record::Object { object, .. } if object.type_ref == TypeRef::BackRef
        ));
    }

    #[test]
    fn shared_buffer_written_once() {
        let mut graph = Graph::new();
        let shared = SharedBuffer::from(vec![7u8; 64]);
        let m1 = graph.insert(Mesh::new("m1", Some(shared.clone()), None));
        let m2 = graph.insert(Mesh::new("m2", Some(shared.clone()), Some(shared.clone())));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        writer.write_all(&[m1, m2]).unwrap();
        let (bytes, summary) = writer.finish().unwrap();
        assert_eq!(summary.buffers, 1);
        // One copy of the content plus framing, not three.
        assert!(bytes.len() < HEADER_LEN + 2 * 64);
    }

    #[test]
    fn legacy_stream_has_no_opcodes() {
        let mut graph = Graph::new();
        let b = graph.insert(Node::new("b"));
        let a = graph.insert(Node::with_links("a", vec![Some(b)]));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::legacy()).unwrap();
        writer.write_object(a).unwrap();
        let (bytes, _) = writer.finish().unwrap();
        let recs = records(bytes);
        assert_eq!(recs.len(), 2);
        assert!(recs
            .iter()
            .all(|r| matches!(r, Record::Object { framing: Framing::Bare, .. })));
    }

    #[test]
    fn file_data_precedes_its_object() {
        let mut graph = Graph::new();
        let t = graph.insert(Texture::new("t", b"pixels".to_vec()));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        writer.write_object(t).unwrap();
        let (bytes, summary) = writer.finish().unwrap();
        assert_eq!(summary.file_data_blocks, 1);
        let recs = records(bytes);
        assert!(matches!(recs[0], Record::FileData(r) if r.len == 6));
        assert!(matches!(recs[1], Record::Object { .. }));
    }

    #[test]
    fn file_data_needs_a_recent_minor() {
        let mut graph = Graph::new();
        let t = graph.insert(Texture::new("t", b"pixels".to_vec()));
        let config = WriterConfig {
            minor_version: CURRENT_MINOR - 1,
            ..Default::default()
        };
        let mut writer = Writer::new(&graph, Vec::new(), &config).unwrap();
        let err = writer.write_object(t).unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
        assert!(matches!(
            writer.write_object(t),
            Err(EngineError::PassAborted(_))
        ));
        assert!(matches!(writer.finish(), Err(EngineError::PassAborted(_))));
    }

    #[test]
    fn dangling_handle_is_a_bug() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::with_links("a", vec![Some(Handle::from_index(42))]));
        let mut writer = Writer::new(&graph, Vec::new(), &WriterConfig::default()).unwrap();
        assert!(writer.write_object(a).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn short_ids_run_out() {
        let mut state = WriteState::new(IdWidth::Short);
        state.next_id = Some(ObjectId::from_raw(u32::from(u16::MAX)));
        state.assign(Handle::from_index(0)).unwrap();
        let err = state.assign(Handle::from_index(1)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::IdSpaceExhausted {
                width: IdWidth::Short
            }
        ));
    }

    #[test]
    fn forced_long_ids() {
        let mut graph = Graph::new();
        let a = graph.insert(Node::new("a"));
        let config = WriterConfig {
            id_width: IdWidthPolicy::Long,
            ..Default::default()
        };
        let mut writer = Writer::new(&graph, Vec::new(), &config).unwrap();
        assert_eq!(writer.header().id_width, IdWidth::Long);
        writer.write_object(a).unwrap();
        writer.finish().unwrap();
    }
}
