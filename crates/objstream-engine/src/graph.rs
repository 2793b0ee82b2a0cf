//! The in-memory object graph.
//!
//! Objects live in an arena and refer to each other by [`Handle`]. Cycles
//! are ordinary: a handle is just an index, so two objects naming each
//! other need no shared ownership.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use objstream_codec::PayloadWriter;

use crate::error::{EngineError, EngineResult};
use crate::finalize::FinalizeContext;
use crate::writer::WriteContext;

/// Index of an object in a [`Graph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the alternative decode paths of a multi-stage object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u8);

/// Where a reference was read inside its holder.
///
/// Sites are numbered in read order, separately for each stage, so a
/// holder can route a late-arriving target to the right field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldSite {
    pub stage: Option<StageId>,
    pub index: u32,
}

impl FieldSite {
    pub const fn new(index: u32) -> Self {
        Self { stage: None, index }
    }

    pub const fn in_stage(stage: StageId, index: u32) -> Self {
        Self {
            stage: Some(stage),
            index,
        }
    }
}

impl fmt::Display for FieldSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "[stage {}:{}]", stage.0, self.index),
            None => write!(f, "[{}]", self.index),
        }
    }
}

/// Upcast helper so trait objects can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A type whose instances can be written to and read from a stream.
///
/// Decoding is not part of this trait: the reader looks decode routines up
/// by type name in a [`TypeRegistry`](crate::TypeRegistry), since no
/// instance exists yet when a record arrives.
pub trait Persistable: AsAny + fmt::Debug + Send {
    /// Stable name written into the stream. Must match the registry entry.
    fn type_name(&self) -> &'static str;

    /// Write this object's payload. References go through
    /// [`WriteContext::write_ref`] so the writer can assign ids.
    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()>;

    /// Deliver a reference that was not yet available when this object was
    /// decoded. Called once per recorded site.
    fn complete_pointer(&mut self, site: FieldSite, target: Handle) -> EngineResult<()> {
        Err(EngineError::InvariantViolation(format!(
            "{} received a late reference at {site} -> {target} but does not accept any",
            self.type_name()
        )))
    }

    /// Post-load hook, run once for objects that asked for it during decode.
    fn finalize(&mut self, _ctx: &FinalizeContext<'_>) -> EngineResult<()> {
        Ok(())
    }
}

/// Arena of persistable objects.
#[derive(Debug, Default)]
pub struct Graph {
    objects: Vec<Box<dyn Persistable>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn insert<T: Persistable>(&mut self, object: T) -> Handle {
        self.insert_boxed(Box::new(object))
    }

    pub fn insert_boxed(&mut self, object: Box<dyn Persistable>) -> Handle {
        let handle = self.next_handle();
        self.objects.push(object);
        handle
    }

    /// Handle the next insertion will receive.
    pub fn next_handle(&self) -> Handle {
        Handle(self.objects.len() as u32)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        handle.index() < self.objects.len()
    }

    pub fn get(&self, handle: Handle) -> Option<&(dyn Persistable + 'static)> {
        self.objects.get(handle.index()).map(|o| &**o)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut (dyn Persistable + 'static)> {
        self.objects.get_mut(handle.index()).map(|o| &mut **o)
    }

    pub fn downcast_ref<T: Persistable>(&self, handle: Handle) -> Option<&T> {
        self.get(handle)?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Persistable>(&mut self, handle: Handle) -> Option<&mut T> {
        self.get_mut(handle)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        (0..self.objects.len() as u32).map(Handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &(dyn Persistable + 'static))> + '_ {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (Handle(i as u32), &**o))
    }
}

/// Immutable bytes shared by several objects.
///
/// The writer recognizes two holders of the same buffer by pointer and
/// writes the content once; the reader hands every holder a clone of one
/// allocation.
#[derive(Clone)]
pub struct SharedBuffer(Arc<[u8]>);

impl SharedBuffer {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self(data.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether both values share one allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live holders of this allocation.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into())
    }
}

impl From<&[u8]> for SharedBuffer {
    fn from(data: &[u8]) -> Self {
        Self(data.into())
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SharedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SharedBuffer {}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.0.len())
            .field("holders", &self.holders())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain(u8);

    impl Persistable for Plain {
        fn type_name(&self) -> &'static str {
            "Plain"
        }

        fn encode(&self, out: &mut PayloadWriter, _ctx: &mut WriteContext<'_>) -> EngineResult<()> {
            out.put_u8(self.0);
            Ok(())
        }
    }

    #[test]
    fn handles_are_dense() {
        let mut g = Graph::new();
        assert_eq!(g.next_handle(), Handle::from_index(0));
        let a = g.insert(Plain(1));
        let b = g.insert(Plain(2));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(g.len(), 2);
        assert!(g.contains(b));
        assert!(!g.contains(Handle::from_index(2)));
        assert_eq!(g.handles().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn downcast_finds_concrete_type() {
        let mut g = Graph::new();
        let h = g.insert(Plain(7));
        assert_eq!(g.downcast_ref::<Plain>(h).map(|p| p.0), Some(7));
        g.downcast_mut::<Plain>(h).unwrap().0 = 9;
        assert_eq!(g.get(h).unwrap().type_name(), "Plain");
        assert_eq!(g.downcast_ref::<Plain>(h).unwrap().0, 9);
    }

    #[test]
    fn default_complete_pointer_is_a_bug() {
        let mut p = Plain(0);
        let err = p
            .complete_pointer(FieldSite::new(0), Handle::from_index(3))
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn shared_buffer_identity() {
        let a = SharedBuffer::from(vec![1, 2, 3]);
        let b = a.clone();
        let c = SharedBuffer::from(vec![1, 2, 3]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a, c);
        assert_eq!(a.holders(), 2);
        assert_eq!(a.addr(), b.addr());
    }

    #[test]
    fn site_display() {
        assert_eq!(FieldSite::new(4).to_string(), "[4]");
        assert_eq!(FieldSite::in_stage(StageId(1), 0).to_string(), "[stage 1:0]");
    }
}
