use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("object id {value} does not fit the {width:?} id form")]
    IdOutOfRange { value: u64, width: crate::IdWidth },

    #[error("invalid {field} flag: {value}")]
    InvalidFlag { field: &'static str, value: u8 },
}
