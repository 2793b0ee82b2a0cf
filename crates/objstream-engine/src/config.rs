use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use objstream_format::{StreamHeader, StreamSource, DEFAULT_MAX_RECORD_LEN};
use objstream_types::{Endian, FloatWidth, IdWidth, StreamVersion, CURRENT_MAJOR, CURRENT_MINOR};

use crate::error::{EngineError, EngineResult};

/// Reader behavior for one decode pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Skip records whose type is not registered instead of failing the
    /// pass. References to a skipped object resolve to nothing.
    pub skip_unknown_types: bool,
    /// Deepest push nesting accepted before the stream is treated as corrupt.
    pub max_nesting_depth: u32,
    /// Largest frame body accepted, in bytes.
    pub max_record_len: u64,
    /// Fail the pass when a decode routine leaves payload bytes unread.
    /// When `false` the leftover is only logged.
    pub strict_payload_length: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            skip_unknown_types: false,
            max_nesting_depth: 64,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            strict_payload_length: false,
        }
    }
}

impl ReaderConfig {
    /// Tolerate unknown types; useful for tools that inspect streams
    /// produced by newer builds.
    pub fn permissive() -> Self {
        Self {
            skip_unknown_types: true,
            ..Default::default()
        }
    }

    /// In-memory source honoring this configuration's frame limit.
    pub fn source_from_bytes(&self, data: impl Into<Bytes>) -> StreamSource<Cursor<Bytes>> {
        StreamSource::from_bytes(data).with_max_record_len(self.max_record_len)
    }

    /// File-backed source honoring this configuration's frame limit.
    pub fn open_source(&self, path: &Path) -> EngineResult<StreamSource<std::io::BufReader<std::fs::File>>> {
        Ok(StreamSource::open(path)?.with_max_record_len(self.max_record_len))
    }
}

/// How the writer picks the wire width of object ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdWidthPolicy {
    /// Short ids unless the graph is too large to number with them.
    #[default]
    Auto,
    Short,
    Long,
}

/// Writer behavior for one encode pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Minor version to emit. Older minors select legacy framing.
    pub minor_version: u16,
    pub endian: Endian,
    pub float_width: FloatWidth,
    pub id_width: IdWidthPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            minor_version: CURRENT_MINOR,
            endian: Endian::Little,
            float_width: FloatWidth::Single,
            id_width: IdWidthPolicy::Auto,
        }
    }
}

impl WriterConfig {
    /// A writer configuration producing streams older readers understand.
    pub fn legacy() -> Self {
        Self {
            minor_version: 0,
            ..Default::default()
        }
    }

    /// Header for a graph of `object_count` objects.
    pub fn header_for(&self, object_count: usize) -> EngineResult<StreamHeader> {
        if self.minor_version > CURRENT_MINOR {
            return Err(EngineError::Unsupported(format!(
                "cannot write minor version {}; newest known is {CURRENT_MINOR}",
                self.minor_version
            )));
        }
        let id_width = match self.id_width {
            IdWidthPolicy::Auto => IdWidth::for_object_count(object_count),
            IdWidthPolicy::Short => IdWidth::Short,
            IdWidthPolicy::Long => IdWidth::Long,
        };
        Ok(StreamHeader {
            version: StreamVersion::new(CURRENT_MAJOR, self.minor_version),
            endian: self.endian,
            float_width: self.float_width,
            id_width,
        })
    }
}

/// Combined engine configuration, as loaded from a settings file.
///
/// ```toml
/// [reader]
/// skip_unknown_types = true
///
/// [writer]
/// endian = "big"
/// id_width = "long"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> EngineResult<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }
}
