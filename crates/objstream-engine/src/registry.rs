use std::collections::HashMap;

use objstream_codec::PayloadReader;

use crate::error::EngineResult;
use crate::graph::Persistable;
use crate::reader::ReadContext;

/// Decode routine: builds an object from its payload.
pub type DecodeFn = Box<
    dyn Fn(&mut PayloadReader<'_>, &mut ReadContext<'_>) -> EngineResult<Box<dyn Persistable>>
        + Send
        + Sync,
>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type {0:?} is already registered")]
    DuplicateType(String),

    #[error("type names must not be empty")]
    EmptyName,
}

/// A persistable type that knows how to rebuild itself.
pub trait Decode: Persistable + Sized {
    const TYPE_NAME: &'static str;

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self>;
}

/// Maps type names found in a stream to decode routines.
///
/// Populated before a pass and only read during it.
#[derive(Default)]
pub struct TypeRegistry {
    entries: HashMap<String, DecodeFn>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, decode: F) -> Result<(), RegistryError>
    where
        F: Fn(&mut PayloadReader<'_>, &mut ReadContext<'_>) -> EngineResult<Box<dyn Persistable>>
            + Send
            + Sync
            + 'static,
    {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateType(name.to_owned()));
        }
        self.entries.insert(name.to_owned(), Box::new(decode));
        Ok(())
    }

    /// Register `T` under [`Decode::TYPE_NAME`].
    pub fn register_type<T: Decode>(&mut self) -> Result<(), RegistryError> {
        self.register(T::TYPE_NAME, |r, ctx| {
            T::decode(r, ctx).map(|obj| Box::new(obj) as Box<dyn Persistable>)
        })
    }

    /// The decode routine and the registry's own copy of the name.
    pub fn lookup(&self, name: &str) -> Option<(&str, &DecodeFn)> {
        self.entries
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Node;

    #[test]
    fn register_and_lookup() {
        let mut reg = TypeRegistry::new();
        assert!(reg.is_empty());
        reg.register_type::<Node>().unwrap();
        assert!(reg.contains("Node"));
        assert_eq!(reg.len(), 1);
        let (name, _) = reg.lookup("Node").unwrap();
        assert_eq!(name, "Node");
        assert!(reg.lookup("Mesh").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = TypeRegistry::new();
        reg.register_type::<Node>().unwrap();
        let err = reg.register_type::<Node>().unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateType(name) if name == "Node"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut reg = TypeRegistry::new();
        let err = reg
            .register("", |r, ctx| {
                Node::decode(r, ctx).map(|n| Box::new(n) as Box<dyn Persistable>)
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyName));
    }

    #[test]
    fn names_are_sorted() {
        let reg = crate::fixtures::registry();
        let names = reg.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(names.contains(&"Mesh"));
    }
}
