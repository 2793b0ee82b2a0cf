//! Stream-to-graph decoder.
//!
//! Reading happens in one pass over a [`RecordSource`]. Each record is
//! decoded by the routine registered for its type; references to objects
//! not yet decoded are recorded as patch requests and delivered once the
//! target's record arrives. A pass ends in one of three states:
//!
//! - **complete**: every reference resolved, finalization ran;
//! - **partial**: the source ran out with references still waiting, which
//!   [`ReadOutcome::unresolved`] lists;
//! - **aborted**: a fatal error; the reader refuses further work.

mod context;
mod patch;
mod slots;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use objstream_codec::PayloadReader;
use objstream_format::{FileDataRef, ObjectRecord, Record, RecordCodec, RecordSource, StreamHeader, TypeRef};
use objstream_types::{BufferId, ObjectId, CURRENT_MAJOR, CURRENT_MINOR, MIN_SUPPORTED_MAJOR};

use crate::aux_channel::AuxChannel;
use crate::config::ReaderConfig;
use crate::error::{EngineError, EngineResult, UnresolvedReference};
use crate::finalize::{FinalizeContext, FinalizeQueue};
use crate::graph::{Graph, Handle, SharedBuffer};
use crate::registry::TypeRegistry;

pub use context::ReadContext;
pub use slots::PendingSlot;

use patch::PatchTable;
use slots::{Completion, SlotTable};

/// Identity tables and queues of one read pass.
#[derive(Debug)]
pub(crate) struct Pass {
    header: StreamHeader,
    codec: RecordCodec,
    types: HashMap<u32, String>,
    warned: HashSet<String>,
    slots: SlotTable,
    /// Stream id of each decoded object, indexed by handle.
    ids: Vec<ObjectId>,
    patches: PatchTable,
    buffers: HashMap<BufferId, SharedBuffer>,
    /// Buffers whose content was in a skipped record.
    skipped_buffers: HashSet<BufferId>,
    finalize: FinalizeQueue,
    aux: AuxChannel,
    file_data: VecDeque<FileDataRef>,
    unclaimed: Vec<FileDataRef>,
    completion: Completion,
    skipped: Vec<ObjectId>,
}

impl Pass {
    fn new(header: StreamHeader, config: &ReaderConfig) -> Self {
        Self {
            header,
            codec: RecordCodec::new(header),
            types: HashMap::new(),
            warned: HashSet::new(),
            slots: SlotTable::default(),
            ids: Vec::new(),
            patches: PatchTable::default(),
            buffers: HashMap::new(),
            skipped_buffers: HashSet::new(),
            finalize: FinalizeQueue::default(),
            aux: AuxChannel::new(),
            file_data: VecDeque::new(),
            unclaimed: Vec::new(),
            completion: Completion::new(header.version.uses_nested_framing(), config.max_nesting_depth),
            skipped: Vec::new(),
        }
    }
}

/// Result of [`Reader::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveStatus {
    /// No reference is waiting; `finalized` hooks ran in this call.
    Complete { finalized: usize },
    /// References are still waiting for records not yet read.
    Pending { outstanding: usize },
}

/// Everything a finished pass produced.
#[derive(Debug)]
pub struct ReadOutcome<S> {
    pub graph: Graph,
    /// One handle per top-level read, in stream order.
    pub roots: Vec<Handle>,
    /// References whose target never appeared.
    pub unresolved: Vec<UnresolvedReference>,
    /// Ids of records skipped for naming an unknown type.
    pub skipped: Vec<ObjectId>,
    /// Shared buffers whose content was in a skipped record. Their other
    /// holders received `None`.
    pub skipped_buffers: Vec<BufferId>,
    pub header: StreamHeader,
    /// Data blocks no decoder claimed.
    pub unclaimed_file_data: Vec<FileDataRef>,
    source: S,
}

impl<S: RecordSource> ReadOutcome<S> {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// The graph, or an error listing every unresolved reference.
    pub fn into_graph(self) -> EngineResult<Graph> {
        if !self.unresolved.is_empty() {
            return Err(EngineError::UnresolvedReference(self.unresolved));
        }
        Ok(self.graph)
    }

    /// Read an out-of-band block recorded by a decoder.
    pub fn fetch_file_data(&mut self, data: &FileDataRef) -> EngineResult<Bytes> {
        Ok(self.source.fetch(data)?)
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

/// Decodes a stream into a [`Graph`].
///
/// ```text
/// init() -> read_object()* -> resolve()? -> finish()
/// ```
pub struct Reader<'r, S: RecordSource> {
    source: S,
    registry: &'r TypeRegistry,
    config: ReaderConfig,
    pass: Option<Pass>,
    graph: Graph,
    roots: Vec<Handle>,
    poisoned: Option<String>,
}

fn not_initialized() -> EngineError {
    EngineError::InvariantViolation("reader used before init".into())
}

impl<'r, S: RecordSource> Reader<'r, S> {
    pub fn new(source: S, registry: &'r TypeRegistry, config: ReaderConfig) -> Self {
        Self {
            source,
            registry,
            config,
            pass: None,
            graph: Graph::new(),
            roots: Vec::new(),
            poisoned: None,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Header of the stream, once [`init`](Self::init) succeeded.
    pub fn header(&self) -> Option<&StreamHeader> {
        self.pass.as_ref().map(|p| &p.header)
    }

    /// Objects decoded so far. Some may still be waiting on references.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn roots(&self) -> &[Handle] {
        &self.roots
    }

    pub fn aux(&self) -> Option<&AuxChannel> {
        self.pass.as_ref().map(|p| &p.aux)
    }

    pub fn aux_mut(&mut self) -> Option<&mut AuxChannel> {
        self.pass.as_mut().map(|p| &mut p.aux)
    }

    pub fn slot(&self, id: ObjectId) -> Option<PendingSlot> {
        self.pass.as_ref()?.slots.get(id)
    }

    /// Handle of a decoded object by stream id.
    pub fn handle_of(&self, id: ObjectId) -> Option<Handle> {
        self.pass.as_ref()?.slots.handle_of(id)
    }

    /// Whether `handle` is decoded and none of its references are waiting.
    pub fn is_complete(&self, handle: Handle) -> bool {
        match &self.pass {
            Some(pass) => self.graph.contains(handle) && pass.patches.outstanding_for(handle) == 0,
            None => false,
        }
    }

    /// References still waiting for their target.
    pub fn outstanding(&self) -> usize {
        self.pass.as_ref().map_or(0, |p| p.patches.total())
    }

    /// Ids referenced so far whose record has not been read yet.
    pub fn unseen_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = match &self.pass {
            Some(pass) => pass.slots.unseen().collect(),
            None => Vec::new(),
        };
        ids.sort();
        ids
    }

    /// Unknown type names met so far, sorted.
    pub fn unknown_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match &self.pass {
            Some(pass) => pass.warned.iter().map(String::as_str).collect(),
            None => Vec::new(),
        };
        names.sort_unstable();
        names
    }

    fn check_live(&self) -> EngineResult<()> {
        match &self.poisoned {
            Some(reason) => Err(EngineError::PassAborted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Discard all pass state after a fatal error.
    fn poison_on_err<T>(&mut self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(error = %e, "read pass aborted");
                self.poisoned = Some(e.to_string());
                self.pass = None;
                self.graph = Graph::new();
                self.roots.clear();
            }
        }
        result
    }

    /// Read and check the stream header.
    pub fn init(&mut self) -> EngineResult<StreamHeader> {
        self.check_live()?;
        if self.pass.is_some() {
            return Err(EngineError::InvariantViolation("init called twice".into()));
        }
        let result = self.open_pass();
        self.poison_on_err(result)
    }

    fn open_pass(&mut self) -> EngineResult<StreamHeader> {
        let header = self.source.read_header()?;
        if !header.version.is_supported() {
            return Err(EngineError::VersionUnsupported {
                version: header.version,
                min: MIN_SUPPORTED_MAJOR,
                max: CURRENT_MAJOR,
            });
        }
        if header.version.minor > CURRENT_MINOR {
            debug!(version = %header.version, "stream is newer than this build; reading with current rules");
        }
        debug!(
            version = %header.version,
            endian = ?header.endian,
            id_width = ?header.id_width,
            legacy = !header.version.uses_nested_framing(),
            "read pass started"
        );
        self.pass = Some(Pass::new(header, &self.config));
        Ok(header)
    }

    /// Read one top-level object and everything written with it.
    ///
    /// Returns `Ok(None)` at the end of the stream. Roots whose record was
    /// skipped are passed over.
    pub fn read_object(&mut self) -> EngineResult<Option<Handle>> {
        self.check_live()?;
        let result = self.read_next();
        self.poison_on_err(result)
    }

    fn read_next(&mut self) -> EngineResult<Option<Handle>> {
        let Self {
            source,
            registry,
            config,
            pass,
            graph,
            roots,
            ..
        } = self;
        let pass = pass.as_mut().ok_or_else(not_initialized)?;

        let mut started = false;
        let mut root = None;
        loop {
            let Some(record) = source.next_record()? else {
                if !started {
                    trace!("end of stream");
                    return Ok(None);
                }
                return Err(EngineError::StreamCorruption(format!(
                    "stream ended inside a top-level object ({:?})",
                    pass.completion
                )));
            };
            match record {
                Record::FileData(data) => {
                    trace!(offset = data.offset, len = data.len, "file data queued");
                    pass.file_data.push_back(data);
                    continue;
                }
                Record::Pop => pass.completion.on_pop()?,
                Record::Object { framing, object } => {
                    pass.completion.on_object(framing, !started)?;
                    let handle = decode_record(pass, graph, registry, config, object)?;
                    if !started {
                        root = handle;
                        started = true;
                    }
                }
            }
            if started && pass.completion.is_settled() {
                if root.is_some() {
                    break;
                }
                debug!("top-level object skipped");
                started = false;
            }
        }
        let handle = root.ok_or_else(|| EngineError::InvariantViolation("read ended without a root".into()))?;
        roots.push(handle);
        Ok(Some(handle))
    }

    /// Run finalization if no reference is waiting.
    ///
    /// Safe to call after every [`read_object`](Self::read_object); each
    /// object is finalized at most once per pass.
    pub fn resolve(&mut self) -> EngineResult<ResolveStatus> {
        self.check_live()?;
        let result = self.try_resolve();
        self.poison_on_err(result)
    }

    fn try_resolve(&mut self) -> EngineResult<ResolveStatus> {
        let Self { pass, graph, .. } = self;
        let pass = pass.as_mut().ok_or_else(not_initialized)?;
        if !pass.patches.is_empty() {
            let outstanding = pass.patches.total();
            debug!(outstanding, "references pending, finalization deferred");
            return Ok(ResolveStatus::Pending { outstanding });
        }
        let mut finalized = 0;
        for handle in pass.finalize.pending() {
            if finalize_one(pass, graph, handle)? {
                finalized += 1;
            }
        }
        if finalized > 0 {
            debug!(finalized, "objects finalized");
        }
        Ok(ResolveStatus::Complete { finalized })
    }

    /// Finalize one object now, even if references are still waiting.
    ///
    /// Returns `false` if the object never asked for finalization or was
    /// already finalized.
    pub fn finalize_now(&mut self, handle: Handle) -> EngineResult<bool> {
        self.check_live()?;
        let Self { pass, graph, .. } = self;
        let pass = pass.as_mut().ok_or_else(not_initialized)?;
        if !pass.finalize.is_registered(handle) || pass.finalize.is_finalized(handle) {
            return Ok(false);
        }
        let result = finalize_one(pass, graph, handle);
        self.poison_on_err(result)
    }

    /// Make stream id `id` stand for `replacement` from now on.
    ///
    /// Used to swap a freshly decoded object for an equivalent one already
    /// in the graph. Later references and back-references to `id` receive
    /// `replacement`; references delivered before the call keep the old
    /// handle. Returns the handle `id` resolved to before.
    pub fn change_pointer(&mut self, id: ObjectId, replacement: Handle) -> EngineResult<Handle> {
        self.check_live()?;
        let Self { pass, graph, .. } = self;
        let pass = pass.as_mut().ok_or_else(not_initialized)?;
        if !graph.contains(replacement) {
            return Err(EngineError::InvariantViolation(format!(
                "replacement {replacement} for {id} is not in the graph"
            )));
        }
        let old = pass.slots.repoint(id, replacement)?;
        debug!(object = %id, %old, new = %replacement, "pointer changed");
        Ok(old)
    }

    /// End the pass: resolve once more and hand over the graph.
    pub fn finish(mut self) -> EngineResult<ReadOutcome<S>> {
        let status = self.resolve()?;
        let mut pass = self.pass.take().ok_or_else(not_initialized)?;
        pass.unclaimed.extend(pass.file_data.drain(..));
        let unresolved = pass.patches.unresolved();
        let mut skipped_buffers: Vec<BufferId> = pass.skipped_buffers.into_iter().collect();
        skipped_buffers.sort();
        if let Some(first) = unresolved.first() {
            warn!(count = unresolved.len(), %first, "pass finished with unresolved references");
        }
        debug!(
            objects = self.graph.len(),
            roots = self.roots.len(),
            skipped = pass.skipped.len(),
            finalized = pass.finalize.finalized_count(),
            ?status,
            "read pass finished"
        );
        Ok(ReadOutcome {
            graph: self.graph,
            roots: self.roots,
            unresolved,
            skipped: pass.skipped,
            skipped_buffers,
            header: pass.header,
            unclaimed_file_data: pass.unclaimed,
            source: self.source,
        })
    }

    /// Initialize if needed, read to the end, and finish.
    pub fn read_all(mut self) -> EngineResult<ReadOutcome<S>> {
        if self.pass.is_none() {
            self.init()?;
        }
        while self.read_object()?.is_some() {}
        self.finish()
    }
}

impl<S: RecordSource> std::fmt::Debug for Reader<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("header", &self.header())
            .field("objects", &self.graph.len())
            .field("outstanding", &self.outstanding())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

fn decode_record(
    pass: &mut Pass,
    graph: &mut Graph,
    registry: &TypeRegistry,
    config: &ReaderConfig,
    object: ObjectRecord,
) -> EngineResult<Option<Handle>> {
    let id = object.object_id;
    if id.is_null() {
        return Err(EngineError::StreamCorruption(
            "record defines the null object id".into(),
        ));
    }

    let name = match object.type_ref {
        TypeRef::BackRef => {
            return match pass.slots.get(id) {
                Some(PendingSlot::Resolved(handle)) => Ok(Some(handle)),
                Some(PendingSlot::Skipped) => Ok(None),
                other => Err(EngineError::StreamCorruption(format!(
                    "back-reference to {id}, whose slot is {other:?}"
                ))),
            };
        }
        TypeRef::Index(index) => pass.types.get(&index).cloned().ok_or_else(|| {
            EngineError::StreamCorruption(format!("type index {index} used before it was defined"))
        })?,
        TypeRef::Define { index, name } => {
            if pass.types.contains_key(&index) {
                return Err(EngineError::StreamCorruption(format!(
                    "type index {index} defined twice"
                )));
            }
            trace!(index, type_name = %name, "type bound");
            pass.types.insert(index, name.clone());
            name
        }
    };

    let Some((type_name, decode)) = registry.lookup(&name) else {
        if pass.warned.insert(name.clone()) {
            warn!(type_name = %name, object = %id, "unknown type in stream");
        }
        // Legacy streams find object boundaries by counting references
        // inside payloads, so an undecoded payload cannot be skipped.
        if config.skip_unknown_types && !pass.completion.is_legacy() {
            pass.slots.skip(id)?;
            let dropped = pass.patches.take(id);
            debug!(object = %id, type_name = %name, dropped = dropped.len(), "object skipped");
            pass.skipped.push(id);
            pass.unclaimed.extend(pass.file_data.drain(..));
            return Ok(None);
        }
        return Err(EngineError::UnknownType { name, object_id: id });
    };

    let handle = graph.next_handle();
    pass.slots.begin(id, handle)?;
    let mut payload = PayloadReader::new(&object.payload, pass.header.layout());
    let built = {
        let mut ctx = ReadContext::new(pass, handle, id, type_name);
        decode(&mut payload, &mut ctx)?
    };
    if !pass.file_data.is_empty() {
        // Blocks directly precede their owner, so leftovers are this
        // object's and must not reach the next decoder.
        debug!(type_name, object = %id, unclaimed = pass.file_data.len(), "file data left unclaimed");
        pass.unclaimed.extend(pass.file_data.drain(..));
    }
    if !payload.is_empty() {
        if config.strict_payload_length {
            return Err(EngineError::StreamCorruption(format!(
                "{type_name} {id} left {} payload bytes unread",
                payload.remaining()
            )));
        }
        warn!(type_name, object = %id, unread = payload.remaining(), "decoder left payload bytes unread");
    }
    let inserted = graph.insert_boxed(built);
    if inserted != handle {
        return Err(EngineError::InvariantViolation(format!(
            "{id} decoded into {inserted}, expected {handle}"
        )));
    }
    pass.ids.push(id);
    pass.slots.resolve(id, handle)?;

    for request in pass.patches.take(id) {
        let holder = graph.get_mut(request.holder).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "patch holder {} is not in the graph",
                request.holder
            ))
        })?;
        holder.complete_pointer(request.site, handle)?;
        trace!(holder = %request.holder_id, site = %request.site, target = %id, "reference patched");
    }
    trace!(object = %id, type_name, %handle, "object decoded");
    Ok(Some(handle))
}

/// Returns `false` if `handle` was already finalized.
fn finalize_one(pass: &mut Pass, graph: &mut Graph, handle: Handle) -> EngineResult<bool> {
    if !pass.finalize.mark_done(handle) {
        return Ok(false);
    }
    let object = graph.get_mut(handle).ok_or_else(|| {
        EngineError::InvariantViolation(format!("finalize target {handle} is not in the graph"))
    })?;
    let ctx = FinalizeContext {
        aux: &pass.aux,
        header: &pass.header,
        object_id: pass.ids.get(handle.index()).copied(),
    };
    object.finalize(&ctx)?;
    trace!(%handle, "object finalized");
    Ok(true)
}
