use std::any::Any;
use std::collections::HashSet;

use objstream_format::StreamHeader;
use objstream_types::ObjectId;

use crate::aux_channel::AuxChannel;
use crate::graph::Handle;

/// Objects that asked to be finalized, in the order they first asked.
///
/// Registering twice is harmless; finalizing is recorded so that no
/// object's hook runs more than once per pass.
#[derive(Debug, Default)]
pub(crate) struct FinalizeQueue {
    order: Vec<Handle>,
    registered: HashSet<Handle>,
    done: HashSet<Handle>,
}

impl FinalizeQueue {
    /// Returns `false` if `handle` was already registered.
    pub fn register(&mut self, handle: Handle) -> bool {
        if !self.registered.insert(handle) {
            return false;
        }
        self.order.push(handle);
        true
    }

    pub fn is_registered(&self, handle: Handle) -> bool {
        self.registered.contains(&handle)
    }

    pub fn is_finalized(&self, handle: Handle) -> bool {
        self.done.contains(&handle)
    }

    /// Registered but not yet finalized, in registration order.
    pub fn pending(&self) -> Vec<Handle> {
        self.order
            .iter()
            .copied()
            .filter(|h| !self.done.contains(h))
            .collect()
    }

    /// Returns `false` if `handle` was already finalized.
    pub fn mark_done(&mut self, handle: Handle) -> bool {
        self.done.insert(handle)
    }

    pub fn finalized_count(&self) -> usize {
        self.done.len()
    }
}

/// What a finalize hook may look at.
pub struct FinalizeContext<'a> {
    pub(crate) aux: &'a AuxChannel,
    pub(crate) header: &'a StreamHeader,
    pub(crate) object_id: Option<ObjectId>,
}

impl<'a> FinalizeContext<'a> {
    pub fn header(&self) -> &StreamHeader {
        self.header
    }

    /// Stream id of the object being finalized.
    pub fn object_id(&self) -> Option<ObjectId> {
        self.object_id
    }

    pub fn get_aux_data<T: Any>(&self, name: &str) -> Option<&T> {
        self.aux.get_aux_data(self.object_id?, name)
    }

    pub fn get_int_tag(&self, name: &str) -> Option<i64> {
        self.aux.get_int_tag(name)
    }

    pub fn get_aux_tag<T: Any>(&self, name: &str) -> Option<&T> {
        self.aux.get_aux_tag(name)
    }
}
