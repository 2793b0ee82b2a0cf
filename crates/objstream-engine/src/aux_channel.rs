use std::any::Any;
use std::collections::HashMap;

use objstream_types::ObjectId;

/// Side channel shared by the decode routines of one pass.
///
/// Holds per-object attachments keyed by `(object, name)` and pass-wide
/// tags keyed by name. Everything is dropped with the pass.
#[derive(Default)]
pub struct AuxChannel {
    data: HashMap<(ObjectId, String), Box<dyn Any>>,
    int_tags: HashMap<String, i64>,
    aux_tags: HashMap<String, Box<dyn Any>>,
}

impl AuxChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `value` to `object` under `name`, replacing any earlier value.
    pub fn set_aux_data<T: Any>(&mut self, object: ObjectId, name: &str, value: T) {
        self.data.insert((object, name.to_owned()), Box::new(value));
    }

    /// `None` if nothing is attached or the attachment is not a `T`.
    pub fn get_aux_data<T: Any>(&self, object: ObjectId, name: &str) -> Option<&T> {
        self.data
            .get(&(object, name.to_owned()))
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_aux_data(&mut self, object: ObjectId, name: &str) -> Option<Box<dyn Any>> {
        self.data.remove(&(object, name.to_owned()))
    }

    pub fn set_int_tag(&mut self, name: &str, value: i64) {
        self.int_tags.insert(name.to_owned(), value);
    }

    pub fn get_int_tag(&self, name: &str) -> Option<i64> {
        self.int_tags.get(name).copied()
    }

    pub fn set_aux_tag<T: Any>(&mut self, name: &str, value: T) {
        self.aux_tags.insert(name.to_owned(), Box::new(value));
    }

    pub fn get_aux_tag<T: Any>(&self, name: &str) -> Option<&T> {
        self.aux_tags.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_aux_tag_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.aux_tags.get_mut(name).and_then(|v| v.downcast_mut::<T>())
    }

    /// Total number of entries across attachments and tags.
    pub fn len(&self) -> usize {
        self.data.len() + self.int_tags.len() + self.aux_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.int_tags.clear();
        self.aux_tags.clear();
    }
}

impl std::fmt::Debug for AuxChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuxChannel")
            .field("data", &self.data.len())
            .field("int_tags", &self.int_tags)
            .field("aux_tags", &self.aux_tags.len())
            .finish()
    }
}
