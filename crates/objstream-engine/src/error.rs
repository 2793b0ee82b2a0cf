//! Error taxonomy of the engine.
//!
//! Lower layers report their own error types ([`CodecError`],
//! [`FormatError`], [`TypeError`]); the engine folds them into the
//! categories a caller acts on:
//!
//! - **StreamCorruption**: the bytes are malformed. Abort the pass.
//! - **UnresolvedReference**: the pass completed but some references never
//!   found their target. The caller decides whether a partial graph is
//!   acceptable.
//! - **UnknownType**: a record names a type nobody registered.
//! - **VersionUnsupported**: the header's major version is out of range.
//! - **InvariantViolation**: a bug in the engine or in a collaborator's
//!   encode/decode routine, never bad input.

use std::fmt;

use objstream_codec::CodecError;
use objstream_format::FormatError;
use objstream_types::{IdWidth, ObjectId, StreamVersion, TypeError};

use crate::graph::{FieldSite, Handle};
use crate::registry::RegistryError;

/// A reference that was still waiting for its target when the pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnresolvedReference {
    /// Stream id of the object holding the reference.
    pub holder: ObjectId,
    /// Arena handle of that object.
    pub holder_handle: Handle,
    /// Where in the holder the reference was read.
    pub site: FieldSite,
    /// The id that never materialized.
    pub target: ObjectId,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.holder, self.site, self.target)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("stream corruption: {0}")]
    StreamCorruption(String),

    #[error("{} unresolved reference(s), first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    UnresolvedReference(Vec<UnresolvedReference>),

    #[error("unknown type {name:?} for object {object_id}")]
    UnknownType { name: String, object_id: ObjectId },

    #[error("unsupported stream version {version}: major must be within {min}..={max}")]
    VersionUnsupported {
        version: StreamVersion,
        min: u16,
        max: u16,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("decode failed for {type_name}: {reason}")]
    Decode { type_name: String, reason: String },

    #[error("encode failed for {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("object id space exhausted for {width:?} ids")]
    IdSpaceExhausted { width: IdWidth },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pass aborted by an earlier error: {0}")]
    PassAborted(String),
}

impl EngineError {
    /// A collaborator's decode routine rejecting its payload.
    pub fn decode(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// A collaborator's encode routine failing.
    pub fn encode(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encode {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that indicate a bug rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Returns `true` if the pass cannot continue after this error.
    ///
    /// Only an unresolved-reference report leaves a usable (partial) graph.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnresolvedReference(_))
    }
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        Self::StreamCorruption(err.to_string())
    }
}

impl From<TypeError> for EngineError {
    fn from(err: TypeError) -> Self {
        Self::StreamCorruption(err.to_string())
    }
}

impl From<FormatError> for EngineError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(e) => Self::Io(e),
            FormatError::FramingMismatch(_) | FormatError::HeaderPending | FormatError::HeaderRepeated => {
                Self::InvariantViolation(err.to_string())
            }
            other => Self::StreamCorruption(other.to_string()),
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_are_corruption() {
        let err: EngineError = CodecError::VarintOverflow { offset: 3 }.into();
        assert!(matches!(err, EngineError::StreamCorruption(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn framing_mismatch_is_a_bug() {
        let err: EngineError = FormatError::FramingMismatch("pop in legacy".into()).into();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn io_passes_through() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: EngineError = FormatError::Io(io).into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn unresolved_is_not_fatal() {
        let err = EngineError::UnresolvedReference(vec![UnresolvedReference {
            holder: ObjectId::from_raw(1),
            holder_handle: Handle::from_index(0),
            site: FieldSite::new(0),
            target: ObjectId::from_raw(9),
        }]);
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "1 unresolved reference(s), first: @1 [0] -> @9"
        );
    }
}
