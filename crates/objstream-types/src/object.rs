use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::version::IdWidth;

/// Identity of an object within one stream pass.
///
/// Ids are assigned by the writer in first-reference order, starting at 1.
/// The value 0 is reserved for the null reference and never names an
/// object. An id means nothing outside the stream that carries it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The null reference.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Wrap a raw wire value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The first id a writer hands out.
    pub const fn first() -> Self {
        Self(1)
    }

    /// Returns `true` if this is the null reference.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw wire value.
    pub fn get(&self) -> u32 {
        self.0
    }

    /// The id that follows this one, or `None` on overflow.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Check that this id is representable in the given wire width.
    pub fn check_width(&self, width: IdWidth) -> Result<(), TypeError> {
        if u64::from(self.0) > width.max_value() {
            return Err(TypeError::IdOutOfRange {
                value: u64::from(self.0),
                width,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Identity of a shared buffer within one stream pass.
///
/// Like [`ObjectId`], 0 is the null buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(u32);

impl BufferId {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn first() -> Self {
        Self(1)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}
