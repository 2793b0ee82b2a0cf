use std::any::Any;
use std::collections::HashMap;

use tracing::{debug, trace};

use objstream_codec::PayloadReader;
use objstream_format::{FileDataRef, StreamHeader};
use objstream_types::{BufferId, ObjectId};

use super::patch::PatchRequest;
use super::slots::PendingSlot;
use super::Pass;
use crate::aux_channel::AuxChannel;
use crate::error::{EngineError, EngineResult};
use crate::graph::{FieldSite, Handle, SharedBuffer, StageId};
use crate::writer::{BUFFER_CONTENT, BUFFER_SEEN};

/// Handed to a decode routine while its object's record is being read.
///
/// References come back as `Some(handle)` when the target already exists.
/// Otherwise the reader returns `None` and later delivers the handle
/// through [`Persistable::complete_pointer`](crate::Persistable::complete_pointer)
/// with the [`FieldSite`] it was read at.
pub struct ReadContext<'p> {
    pass: &'p mut Pass,
    holder: Handle,
    holder_id: ObjectId,
    type_name: &'p str,
    stage: Option<StageId>,
    sites: HashMap<Option<StageId>, u32>,
}

impl<'p> ReadContext<'p> {
    pub(crate) fn new(pass: &'p mut Pass, holder: Handle, holder_id: ObjectId, type_name: &'p str) -> Self {
        Self {
            pass,
            holder,
            holder_id,
            type_name,
            stage: None,
            sites: HashMap::new(),
        }
    }

    pub fn header(&self) -> &StreamHeader {
        &self.pass.header
    }

    /// Stream id of the object being decoded.
    pub fn object_id(&self) -> ObjectId {
        self.holder_id
    }

    /// Handle the object will occupy once decoded.
    pub fn handle(&self) -> Handle {
        self.holder
    }

    pub fn type_name(&self) -> &str {
        self.type_name
    }

    /// Stage currently open through [`read_stage`](Self::read_stage).
    pub fn stage(&self) -> Option<StageId> {
        self.stage
    }

    fn next_site(&mut self) -> FieldSite {
        let counter = self.sites.entry(self.stage).or_insert(0);
        let site = FieldSite {
            stage: self.stage,
            index: *counter,
        };
        *counter += 1;
        site
    }

    /// Note an id as referenced. New ids are owed a record in legacy streams.
    fn mention(&mut self, target: ObjectId) {
        if self.pass.slots.mention(target) {
            self.pass.completion.owe();
        }
    }

    /// Read one object reference.
    pub fn read_ref(&mut self, r: &mut PayloadReader<'_>) -> EngineResult<Option<Handle>> {
        let target = self.pass.codec.decode_object_id(r)?;
        let site = self.next_site();
        if target.is_null() {
            return Ok(None);
        }
        match self.pass.slots.get(target) {
            Some(PendingSlot::Resolved(handle)) => Ok(Some(handle)),
            Some(PendingSlot::Skipped) => {
                trace!(holder = %self.holder_id, %site, %target, "reference to skipped object dropped");
                Ok(None)
            }
            state => {
                if state.is_none() {
                    self.mention(target);
                }
                self.pass.patches.record(PatchRequest {
                    holder: self.holder,
                    holder_id: self.holder_id,
                    site,
                    target,
                });
                trace!(holder = %self.holder_id, %site, %target, "reference deferred");
                Ok(None)
            }
        }
    }

    /// Read `count` consecutive references.
    pub fn read_refs(&mut self, r: &mut PayloadReader<'_>, count: usize) -> EngineResult<Vec<Option<Handle>>> {
        (0..count).map(|_| self.read_ref(r)).collect()
    }

    /// Consume a reference the object does not keep.
    ///
    /// No site is numbered and nothing is patched, but the target still
    /// counts as referenced.
    pub fn skip_ref(&mut self, r: &mut PayloadReader<'_>) -> EngineResult<()> {
        let target = self.pass.codec.decode_object_id(r)?;
        if !target.is_null() {
            self.mention(target);
        }
        Ok(())
    }

    /// Read a shared buffer written by
    /// [`WriteContext::write_buffer`](crate::WriteContext::write_buffer).
    ///
    /// Every holder of one buffer in the stream receives the same allocation.
    /// If the buffer's content went out with a record that was skipped, the
    /// holder receives `None`.
    pub fn read_buffer(&mut self, r: &mut PayloadReader<'_>) -> EngineResult<Option<SharedBuffer>> {
        let raw = r.get_varint()?;
        if raw == 0 {
            return Ok(None);
        }
        let id = u32::try_from(raw)
            .map(BufferId::from_raw)
            .map_err(|_| EngineError::StreamCorruption(format!("buffer id {raw} out of range")))?;
        match r.get_u8()? {
            BUFFER_SEEN => {
                if let Some(buffer) = self.pass.buffers.get(&id) {
                    return Ok(Some(buffer.clone()));
                }
                if self.pass.skipped.is_empty() {
                    return Err(EngineError::StreamCorruption(format!(
                        "{} {} uses buffer {id} before its content",
                        self.type_name, self.holder_id
                    )));
                }
                if self.pass.skipped_buffers.insert(id) {
                    debug!(buffer = %id, holder = %self.holder_id, "buffer content was in a skipped record");
                }
                Ok(None)
            }
            BUFFER_CONTENT => {
                if self.pass.buffers.contains_key(&id) || self.pass.skipped_buffers.contains(&id) {
                    return Err(EngineError::StreamCorruption(format!(
                        "buffer {id} carries content twice"
                    )));
                }
                let buffer = SharedBuffer::from(r.get_blob()?);
                self.pass.buffers.insert(id, buffer.clone());
                trace!(buffer = %id, len = buffer.len(), "shared buffer read");
                Ok(Some(buffer))
            }
            marker => Err(EngineError::StreamCorruption(format!(
                "buffer {id} has unknown content marker {marker}"
            ))),
        }
    }

    /// Run `read` with references numbered under `stage`.
    ///
    /// Objects that decode into several alternative representations use one
    /// stage per representation, so late references land in the right one.
    pub fn read_stage<T>(
        &mut self,
        stage: StageId,
        read: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        if let Some(open) = self.stage {
            return Err(EngineError::InvariantViolation(format!(
                "{} opened stage {} inside stage {}",
                self.type_name, stage.0, open.0
            )));
        }
        self.stage = Some(stage);
        let result = read(&mut *self);
        self.stage = None;
        result
    }

    /// Claim the oldest out-of-band data block not yet claimed.
    ///
    /// Blocks precede the record of the object that wrote them, so an
    /// object claims its own blocks in the order it wrote them.
    pub fn read_file_data(&mut self) -> EngineResult<FileDataRef> {
        self.pass.file_data.pop_front().ok_or_else(|| {
            EngineError::StreamCorruption(format!(
                "{} {} expects file data but none precedes it",
                self.type_name, self.holder_id
            ))
        })
    }

    /// Ask for [`Persistable::finalize`](crate::Persistable::finalize) to
    /// run once the pass resolves. Asking twice has no further effect.
    pub fn register_finalize(&mut self) {
        if self.pass.finalize.register(self.holder) {
            trace!(object = %self.holder_id, "finalize registered");
        }
    }

    pub fn aux(&self) -> &AuxChannel {
        &self.pass.aux
    }

    pub fn aux_mut(&mut self) -> &mut AuxChannel {
        &mut self.pass.aux
    }

    /// Attach data to the object being decoded.
    pub fn set_aux_data<T: Any>(&mut self, name: &str, value: T) {
        self.pass.aux.set_aux_data(self.holder_id, name, value);
    }

    pub fn get_aux_data<T: Any>(&self, object: ObjectId, name: &str) -> Option<&T> {
        self.pass.aux.get_aux_data(object, name)
    }

    pub fn set_int_tag(&mut self, name: &str, value: i64) {
        self.pass.aux.set_int_tag(name, value);
    }

    pub fn get_int_tag(&self, name: &str) -> Option<i64> {
        self.pass.aux.get_int_tag(name)
    }

    pub fn set_aux_tag<T: Any>(&mut self, name: &str, value: T) {
        self.pass.aux.set_aux_tag(name, value);
    }

    pub fn get_aux_tag<T: Any>(&self, name: &str) -> Option<&T> {
        self.pass.aux.get_aux_tag(name)
    }

    /// A decode failure attributed to the object being decoded.
    pub fn error(&self, reason: impl Into<String>) -> EngineError {
        EngineError::decode(self.type_name, reason)
    }
}

impl std::fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("object", &self.holder_id)
            .field("type_name", &self.type_name)
            .field("stage", &self.stage)
            .finish()
    }
}
