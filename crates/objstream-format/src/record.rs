//! Record bodies and their encoding.
//!
//! A record travels in a frame `[len: u32][body]`. Current-format bodies
//! start with an [`Opcode`]; legacy bodies are a bare object record.
//!
//! Object record layout:
//! ```text
//! [varint: type index]            0 = back-reference to an existing object
//! [u8: name marker]               1 when a type name follows, else 0;
//!                                 absent for back-references
//! [varint len + utf8: type name]  only the first time an index appears
//! [u16 | u32: object id]          width from the stream header
//! [varint len + bytes: payload]   absent for back-references
//! ```

use bytes::Bytes;

use objstream_codec::{CodecError, PayloadReader, PayloadWriter};
use objstream_types::{IdWidth, ObjectId};

use crate::error::{FormatError, FormatResult};
use crate::header::StreamHeader;

/// Leading byte of a current-format record body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// An object record that opens one nesting level.
    Push = 1,
    /// An object record at the current nesting level.
    Adjunct = 2,
    /// Closes one nesting level.
    Pop = 3,
    /// Announces an out-of-band data block following the frame.
    FileData = 4,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Push),
            2 => Some(Self::Adjunct),
            3 => Some(Self::Pop),
            4 => Some(Self::FileData),
            _ => None,
        }
    }
}

/// How an object record is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Push,
    Adjunct,
    /// Legacy streams: no opcode at all.
    Bare,
}

/// The type part of an object record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    /// Refers to an object defined by an earlier record.
    BackRef,
    /// A type index already bound to a name earlier in the stream.
    Index(u32),
    /// First use of a type index; binds it to `name`.
    Define { index: u32, name: String },
}

impl TypeRef {
    pub fn index(&self) -> u32 {
        match self {
            Self::BackRef => 0,
            Self::Index(index) | Self::Define { index, .. } => *index,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub type_ref: TypeRef,
    pub object_id: ObjectId,
    pub payload: Bytes,
}

impl ObjectRecord {
    pub fn back_ref(object_id: ObjectId) -> Self {
        Self {
            type_ref: TypeRef::BackRef,
            object_id,
            payload: Bytes::new(),
        }
    }
}

/// Location of an out-of-band data block in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileDataRef {
    /// Absolute offset of the first data byte.
    pub offset: u64,
    pub len: u64,
    pub crc32: u32,
}

/// A decoded record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Object {
        framing: Framing,
        object: ObjectRecord,
    },
    Pop,
    FileData(FileDataRef),
}

/// Body of a file-data frame, before the source has located the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileDataHeader {
    pub crc32: u32,
    pub len: u64,
}

pub(crate) enum Body {
    Object {
        framing: Framing,
        object: ObjectRecord,
    },
    Pop,
    FileData(FileDataHeader),
}

/// Encodes and decodes record bodies for one stream header.
#[derive(Clone, Copy, Debug)]
pub struct RecordCodec {
    header: StreamHeader,
}

impl RecordCodec {
    pub fn new(header: StreamHeader) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    fn writer(&self) -> PayloadWriter {
        PayloadWriter::new(self.header.layout())
    }

    fn put_object_id(&self, w: &mut PayloadWriter, id: ObjectId) -> FormatResult<()> {
        id.check_width(self.header.id_width)?;
        match self.header.id_width {
            IdWidth::Short => w.put_u16(id.get() as u16),
            IdWidth::Long => w.put_u32(id.get()),
        }
        Ok(())
    }

    /// Encode an object id as it appears inside payloads and records.
    pub fn encode_object_id(&self, w: &mut PayloadWriter, id: ObjectId) -> FormatResult<()> {
        self.put_object_id(w, id)
    }

    /// Decode an object id written by [`encode_object_id`](Self::encode_object_id).
    pub fn decode_object_id(&self, r: &mut PayloadReader<'_>) -> Result<ObjectId, CodecError> {
        let raw = match self.header.id_width {
            IdWidth::Short => u32::from(r.get_u16()?),
            IdWidth::Long => r.get_u32()?,
        };
        Ok(ObjectId::from_raw(raw))
    }

    pub fn encode_object(&self, framing: Framing, object: &ObjectRecord) -> FormatResult<Vec<u8>> {
        let nested = self.header.version.uses_nested_framing();
        let mut w = self.writer();
        match (framing, nested) {
            (Framing::Push, true) => w.put_u8(Opcode::Push as u8),
            (Framing::Adjunct, true) => w.put_u8(Opcode::Adjunct as u8),
            (Framing::Bare, false) => {}
            (framing, _) => {
                return Err(FormatError::FramingMismatch(format!(
                    "{framing:?} record in a version {} stream",
                    self.header.version
                )))
            }
        }
        w.put_varint(u64::from(object.type_ref.index()));
        match &object.type_ref {
            TypeRef::BackRef => {}
            TypeRef::Index(_) => w.put_u8(0),
            TypeRef::Define { name, .. } => {
                w.put_u8(1);
                w.put_str(name);
            }
        }
        self.put_object_id(&mut w, object.object_id)?;
        if object.type_ref != TypeRef::BackRef {
            w.put_blob(&object.payload);
        }
        Ok(w.into_bytes())
    }

    pub fn encode_pop(&self) -> FormatResult<Vec<u8>> {
        if !self.header.version.uses_nested_framing() {
            return Err(FormatError::FramingMismatch(format!(
                "pop record in a version {} stream",
                self.header.version
            )));
        }
        Ok(vec![Opcode::Pop as u8])
    }

    pub(crate) fn encode_file_data(&self, crc32: u32, len: u64) -> FormatResult<Vec<u8>> {
        if !self.header.version.supports_file_data() {
            return Err(FormatError::FramingMismatch(format!(
                "file data record in a version {} stream",
                self.header.version
            )));
        }
        let mut w = self.writer();
        w.put_u8(Opcode::FileData as u8);
        w.put_u32(crc32);
        w.put_u64(len);
        Ok(w.into_bytes())
    }

    /// Decode a frame body. `offset` is the frame's absolute position and is
    /// used only for error reporting; type names are not validated here.
    pub(crate) fn decode(&self, offset: u64, body: Bytes) -> FormatResult<Body> {
        let codec_err = |source: CodecError| FormatError::Codec { offset, source };
        let mut r = PayloadReader::new(&body, self.header.layout());

        let framing = if self.header.version.uses_nested_framing() {
            let byte = r.get_u8().map_err(codec_err)?;
            match Opcode::from_byte(byte) {
                Some(Opcode::Push) => Framing::Push,
                Some(Opcode::Adjunct) => Framing::Adjunct,
                Some(Opcode::Pop) => {
                    expect_consumed(offset, &r)?;
                    return Ok(Body::Pop);
                }
                Some(Opcode::FileData) => {
                    if !self.header.version.supports_file_data() {
                        return Err(FormatError::CorruptRecord {
                            offset,
                            reason: format!(
                                "file data record in a version {} stream",
                                self.header.version
                            ),
                        });
                    }
                    let crc32 = r.get_u32().map_err(codec_err)?;
                    let len = r.get_u64().map_err(codec_err)?;
                    expect_consumed(offset, &r)?;
                    return Ok(Body::FileData(FileDataHeader { crc32, len }));
                }
                None => {
                    return Err(FormatError::CorruptRecord {
                        offset,
                        reason: format!("unknown opcode {byte}"),
                    })
                }
            }
        } else {
            Framing::Bare
        };

        let index = r.get_varint().map_err(codec_err)?;
        let index = u32::try_from(index).map_err(|_| FormatError::CorruptRecord {
            offset,
            reason: format!("type index {index} out of range"),
        })?;
        let type_ref = if index == 0 {
            TypeRef::BackRef
        } else {
            match r.get_u8().map_err(codec_err)? {
                0 => TypeRef::Index(index),
                1 => TypeRef::Define {
                    index,
                    name: r.get_str().map_err(codec_err)?.to_owned(),
                },
                other => {
                    return Err(FormatError::CorruptRecord {
                        offset,
                        reason: format!("invalid type name marker {other}"),
                    })
                }
            }
        };
        let object_id = self.decode_object_id(&mut r).map_err(codec_err)?;
        let payload = if type_ref == TypeRef::BackRef {
            Bytes::new()
        } else {
            let len = r.get_blob().map_err(codec_err)?.len();
            let end = r.position();
            body.slice(end - len..end)
        };
        expect_consumed(offset, &r)?;
        Ok(Body::Object {
            framing,
            object: ObjectRecord {
                type_ref,
                object_id,
                payload,
            },
        })
    }
}

fn expect_consumed(offset: u64, r: &PayloadReader<'_>) -> FormatResult<()> {
    if !r.is_empty() {
        return Err(FormatError::CorruptRecord {
            offset,
            reason: format!("{} trailing bytes in record", r.remaining()),
        });
    }
    Ok(())
}
