//! Stream version and stream-wide encoding flags.
//!
//! A stream fixes all of these once, in its header. Nothing here changes
//! mid-stream.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Oldest major version a reader accepts.
pub const MIN_SUPPORTED_MAJOR: u16 = 1;
/// Major version written by default.
pub const CURRENT_MAJOR: u16 = 1;
/// Minor version written by default.
pub const CURRENT_MINOR: u16 = 2;
/// First minor version whose records carry push/adjunct/pop opcodes.
/// Older streams are read by counting owed objects instead.
pub const NESTED_FRAMING_MINOR: u16 = 1;
/// First minor version that may carry out-of-band file-data records.
pub const FILE_DATA_MINOR: u16 = 2;

/// Major/minor version pair of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamVersion {
    pub major: u16,
    pub minor: u16,
}

impl StreamVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// The version this build writes by default.
    pub const fn current() -> Self {
        Self::new(CURRENT_MAJOR, CURRENT_MINOR)
    }

    /// Returns `true` if the major version is within the supported range.
    ///
    /// Minor versions newer than [`CURRENT_MINOR`] are accepted: a minor bump
    /// never changes the framing of records this build understands.
    pub fn is_supported(&self) -> bool {
        (MIN_SUPPORTED_MAJOR..=CURRENT_MAJOR).contains(&self.major)
    }

    /// Whether records are framed with push/adjunct/pop opcodes.
    pub fn uses_nested_framing(&self) -> bool {
        self.minor >= NESTED_FRAMING_MINOR
    }

    /// Whether the stream may carry file-data records.
    pub fn supports_file_data(&self) -> bool {
        self.minor >= FILE_DATA_MINOR
    }
}

impl Default for StreamVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Byte order of fixed-width values in the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn flag(&self) -> u8 {
        match self {
            Self::Little => 0,
            Self::Big => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self, TypeError> {
        match flag {
            0 => Ok(Self::Little),
            1 => Ok(Self::Big),
            value => Err(TypeError::InvalidFlag {
                field: "endian",
                value,
            }),
        }
    }
}

/// Width of the stream's standard float ("stdfloat").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatWidth {
    #[default]
    Single,
    Double,
}

impl FloatWidth {
    pub fn flag(&self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Double => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self, TypeError> {
        match flag {
            0 => Ok(Self::Single),
            1 => Ok(Self::Double),
            value => Err(TypeError::InvalidFlag {
                field: "float width",
                value,
            }),
        }
    }
}

/// Wire width of object ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdWidth {
    /// 16-bit ids.
    #[default]
    Short,
    /// 32-bit ids.
    Long,
}

impl IdWidth {
    /// Largest id representable in this width.
    pub fn max_value(&self) -> u64 {
        match self {
            Self::Short => u64::from(u16::MAX),
            Self::Long => u64::from(u32::MAX),
        }
    }

    /// Encoded size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Short => 2,
            Self::Long => 4,
        }
    }

    pub fn flag(&self) -> u8 {
        match self {
            Self::Short => 0,
            Self::Long => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self, TypeError> {
        match flag {
            0 => Ok(Self::Short),
            1 => Ok(Self::Long),
            value => Err(TypeError::InvalidFlag {
                field: "id width",
                value,
            }),
        }
    }

    /// Smallest width able to number `count` objects.
    pub fn for_object_count(count: usize) -> Self {
        if (count as u64) < Self::Short.max_value() {
            Self::Short
        } else {
            Self::Long
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_supported() {
        assert!(StreamVersion::current().is_supported());
        assert!(StreamVersion::current().uses_nested_framing());
        assert!(StreamVersion::current().supports_file_data());
    }

    #[test]
    fn major_outside_range_is_unsupported() {
        assert!(!StreamVersion::new(MIN_SUPPORTED_MAJOR - 1, 5).is_supported());
        assert!(!StreamVersion::new(CURRENT_MAJOR + 1, 0).is_supported());
    }

    #[test]
    fn legacy_minor_has_no_nested_framing() {
        let legacy = StreamVersion::new(CURRENT_MAJOR, 0);
        assert!(legacy.is_supported());
        assert!(!legacy.uses_nested_framing());
        assert!(!legacy.supports_file_data());
    }

    #[test]
    fn flags_reject_unknown_values() {
        assert_eq!(Endian::from_flag(1), Ok(Endian::Big));
        assert!(Endian::from_flag(2).is_err());
        assert_eq!(FloatWidth::from_flag(1), Ok(FloatWidth::Double));
        assert!(FloatWidth::from_flag(9).is_err());
        assert_eq!(IdWidth::from_flag(0), Ok(IdWidth::Short));
        assert!(IdWidth::from_flag(3).is_err());
    }

    #[test]
    fn id_width_for_count() {
        assert_eq!(IdWidth::for_object_count(0), IdWidth::Short);
        assert_eq!(IdWidth::for_object_count(1_000), IdWidth::Short);
        assert_eq!(IdWidth::for_object_count(65_535), IdWidth::Long);
        assert_eq!(IdWidth::for_object_count(1_000_000), IdWidth::Long);
    }

    #[test]
    fn version_display() {
        assert_eq!(StreamVersion::new(1, 2).to_string(), "1.2");
    }
}
