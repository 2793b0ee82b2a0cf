use std::collections::HashMap;

use objstream_format::Framing;
use objstream_types::ObjectId;

use crate::error::{EngineError, EngineResult};
use crate::graph::Handle;

/// What the reader knows about one stream id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingSlot {
    /// Referenced, but its record has not arrived.
    Unseen,
    /// Its record is being decoded right now.
    UnderConstruction(Handle),
    Resolved(Handle),
    /// Its record named an unknown type and was skipped.
    Skipped,
}

/// Per-pass id table. An id moves `Unseen -> UnderConstruction ->
/// Resolved` (or to `Skipped`) and never back.
#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    slots: HashMap<ObjectId, PendingSlot>,
}

impl SlotTable {
    pub fn get(&self, id: ObjectId) -> Option<PendingSlot> {
        self.slots.get(&id).copied()
    }

    /// Note a reference to `id`. Returns `true` if the id was new.
    pub fn mention(&mut self, id: ObjectId) -> bool {
        if self.slots.contains_key(&id) {
            return false;
        }
        self.slots.insert(id, PendingSlot::Unseen);
        true
    }

    fn claim(&mut self, id: ObjectId, next: PendingSlot) -> EngineResult<()> {
        match self.get(id) {
            None | Some(PendingSlot::Unseen) => {
                self.slots.insert(id, next);
                Ok(())
            }
            Some(_) => Err(EngineError::StreamCorruption(format!(
                "object {id} is defined more than once"
            ))),
        }
    }

    pub fn begin(&mut self, id: ObjectId, handle: Handle) -> EngineResult<()> {
        self.claim(id, PendingSlot::UnderConstruction(handle))
    }

    pub fn skip(&mut self, id: ObjectId) -> EngineResult<()> {
        self.claim(id, PendingSlot::Skipped)
    }

    pub fn resolve(&mut self, id: ObjectId, handle: Handle) -> EngineResult<()> {
        match self.get(id) {
            Some(PendingSlot::UnderConstruction(h)) if h == handle => {
                self.slots.insert(id, PendingSlot::Resolved(handle));
                Ok(())
            }
            other => Err(EngineError::InvariantViolation(format!(
                "resolving {id} as {handle} but its slot is {other:?}"
            ))),
        }
    }

    /// Point a resolved id at another handle. Returns the previous one.
    pub fn repoint(&mut self, id: ObjectId, handle: Handle) -> EngineResult<Handle> {
        match self.get(id) {
            Some(PendingSlot::Resolved(old)) => {
                self.slots.insert(id, PendingSlot::Resolved(handle));
                Ok(old)
            }
            other => Err(EngineError::InvariantViolation(format!(
                "cannot repoint {id} while its slot is {other:?}"
            ))),
        }
    }

    pub fn handle_of(&self, id: ObjectId) -> Option<Handle> {
        match self.get(id) {
            Some(PendingSlot::Resolved(h)) => Some(h),
            _ => None,
        }
    }

    /// Ids that were referenced but never defined.
    pub fn unseen(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots
            .iter()
            .filter(|(_, slot)| **slot == PendingSlot::Unseen)
            .map(|(id, _)| *id)
    }
}

/// How the reader decides that one top-level read is complete.
///
/// Legacy streams carry no nesting markers, so the reader counts objects
/// that were referenced before being seen and keeps reading until none are
/// owed. Current streams bracket each top-level object with push and pop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    Owed { owed: u64 },
    Nested { level: u32, max: u32 },
}

impl Completion {
    pub fn new(nested: bool, max_nesting_depth: u32) -> Self {
        if nested {
            Self::Nested {
                level: 0,
                max: max_nesting_depth,
            }
        } else {
            Self::Owed { owed: 0 }
        }
    }

    /// Account for an object record. `first` is set for the record that
    /// starts a top-level read.
    pub fn on_object(&mut self, framing: Framing, first: bool) -> EngineResult<()> {
        match (self, framing) {
            (Self::Owed { owed }, Framing::Bare) => {
                if !first {
                    // Records beyond the owed ones are still accepted; the
                    // count only decides where a read stops.
                    *owed = owed.saturating_sub(1);
                }
                Ok(())
            }
            (Self::Nested { level, max }, Framing::Push) => {
                if *level >= *max {
                    return Err(EngineError::StreamCorruption(format!(
                        "push nesting exceeds {max} levels"
                    )));
                }
                *level += 1;
                Ok(())
            }
            (Self::Nested { level, .. }, Framing::Adjunct) if *level > 0 => Ok(()),
            (this, framing) => Err(EngineError::StreamCorruption(format!(
                "{framing:?} record not allowed here ({this:?})"
            ))),
        }
    }

    pub fn on_pop(&mut self) -> EngineResult<()> {
        match self {
            Self::Nested { level, .. } if *level > 0 => {
                *level -= 1;
                Ok(())
            }
            this => Err(EngineError::StreamCorruption(format!(
                "pop record without a matching push ({this:?})"
            ))),
        }
    }

    /// A reference to an id not yet in the slot table.
    pub fn owe(&mut self) {
        if let Self::Owed { owed } = self {
            *owed += 1;
        }
    }

    pub fn is_settled(&self) -> bool {
        match self {
            Self::Owed { owed } => *owed == 0,
            Self::Nested { level, .. } => *level == 0,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Owed { .. })
    }
}
