use objstream_codec::Layout;
use objstream_types::{Endian, FloatWidth, IdWidth, StreamVersion};

use crate::error::{FormatError, FormatResult};

/// Magic bytes at the start of every stream.
pub const MAGIC: &[u8; 4] = b"OBJS";

/// Encoded header size: magic + endian + major + minor + float width + id width.
pub const HEADER_LEN: usize = 4 + 1 + 2 + 2 + 1 + 1;

/// The stream-wide parameters fixed before the first record.
///
/// On-disk format:
/// ```text
/// [4 bytes: magic "OBJS"]
/// [1 byte:  endian flag]
/// [2 bytes: major version (stream endianness)]
/// [2 bytes: minor version (stream endianness)]
/// [1 byte:  float width flag]
/// [1 byte:  object id width flag]
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: StreamVersion,
    pub endian: Endian,
    pub float_width: FloatWidth,
    pub id_width: IdWidth,
}

impl StreamHeader {
    /// Payload layout implied by this header.
    pub fn layout(&self) -> Layout {
        Layout::new(self.endian, self.float_width)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = self.endian.flag();
        let (major, minor) = match self.endian {
            Endian::Little => (
                self.version.major.to_le_bytes(),
                self.version.minor.to_le_bytes(),
            ),
            Endian::Big => (
                self.version.major.to_be_bytes(),
                self.version.minor.to_be_bytes(),
            ),
        };
        out[5..7].copy_from_slice(&major);
        out[7..9].copy_from_slice(&minor);
        out[9] = self.float_width.flag();
        out[10] = self.id_width.flag();
        out
    }

    /// Parse a header. Version support is not judged here; that is the
    /// reader's gate.
    pub fn decode(data: &[u8]) -> FormatResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::Truncated {
                offset: 0,
                reason: format!("header needs {HEADER_LEN} bytes, got {}", data.len()),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let endian = Endian::from_flag(data[4])?;
        let major = [data[5], data[6]];
        let minor = [data[7], data[8]];
        let version = match endian {
            Endian::Little => StreamVersion::new(u16::from_le_bytes(major), u16::from_le_bytes(minor)),
            Endian::Big => StreamVersion::new(u16::from_be_bytes(major), u16::from_be_bytes(minor)),
        };
        Ok(Self {
            version,
            endian,
            float_width: FloatWidth::from_flag(data[9])?,
            id_width: IdWidth::from_flag(data[10])?,
        })
    }
}
