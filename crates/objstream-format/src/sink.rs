use std::io::Write;

use objstream_types::Endian;
use tracing::debug;

use crate::error::{FormatError, FormatResult};
use crate::header::StreamHeader;
use crate::record::{FileDataRef, Framing, ObjectRecord, RecordCodec};

/// Largest frame body a sink will emit.
pub const MAX_FRAME_LEN: u64 = u32::MAX as u64;

/// Append-only writer of a record stream.
///
/// The header is written exactly once, before any record; every record is
/// framed as `[len: u32][body]` in the stream's byte order.
pub struct StreamSink<W: Write> {
    inner: W,
    pos: u64,
    codec: Option<RecordCodec>,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pos: 0,
            codec: None,
        }
    }

    /// Bytes written so far, header included.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Codec bound by the header, if it has been written.
    pub fn codec(&self) -> Option<&RecordCodec> {
        self.codec.as_ref()
    }

    pub fn write_header(&mut self, header: StreamHeader) -> FormatResult<()> {
        if self.codec.is_some() {
            return Err(FormatError::HeaderRepeated);
        }
        let bytes = header.encode();
        self.inner.write_all(&bytes)?;
        self.pos += bytes.len() as u64;
        self.codec = Some(RecordCodec::new(header));
        debug!(version = %header.version, endian = ?header.endian, "stream header written");
        Ok(())
    }

    fn bound_codec(&self) -> FormatResult<RecordCodec> {
        self.codec.ok_or(FormatError::HeaderPending)
    }

    fn write_frame(&mut self, body: &[u8], endian: Endian) -> FormatResult<u64> {
        let offset = self.pos;
        let len = u32::try_from(body.len()).map_err(|_| FormatError::RecordTooLarge {
            offset,
            size: body.len() as u64,
            max: MAX_FRAME_LEN,
        })?;
        let prefix = match endian {
            Endian::Little => len.to_le_bytes(),
            Endian::Big => len.to_be_bytes(),
        };
        self.inner.write_all(&prefix)?;
        self.inner.write_all(body)?;
        self.pos += 4 + body.len() as u64;
        Ok(offset)
    }

    /// Append an object record. Returns the frame's offset.
    pub fn write_object(&mut self, framing: Framing, object: &ObjectRecord) -> FormatResult<u64> {
        let codec = self.bound_codec()?;
        let body = codec.encode_object(framing, object)?;
        self.write_frame(&body, codec.header().endian)
    }

    pub fn write_pop(&mut self) -> FormatResult<u64> {
        let codec = self.bound_codec()?;
        let body = codec.encode_pop()?;
        self.write_frame(&body, codec.header().endian)
    }

    /// Append an out-of-band data block: a file-data frame followed by the
    /// raw bytes, outside any frame.
    pub fn write_file_data(&mut self, data: &[u8]) -> FormatResult<FileDataRef> {
        let codec = self.bound_codec()?;
        let crc32 = crc32fast::hash(data);
        let body = codec.encode_file_data(crc32, data.len() as u64)?;
        self.write_frame(&body, codec.header().endian)?;
        let offset = self.pos;
        self.inner.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(FileDataRef {
            offset,
            len: data.len() as u64,
            crc32,
        })
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(mut self) -> FormatResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> std::fmt::Debug for StreamSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("pos", &self.pos)
            .field("codec", &self.codec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_LEN;
    use crate::record::TypeRef;
    use bytes::Bytes;
    use objstream_types::{ObjectId, StreamVersion};

    #[test]
    fn record_before_header_is_rejected() {
        let mut sink = StreamSink::new(Vec::new());
        let err = sink.write_pop().unwrap_err();
        assert!(matches!(err, FormatError::HeaderPending));
    }

    #[test]
    fn header_written_once() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_header(StreamHeader::default()).unwrap();
        assert_eq!(sink.position(), HEADER_LEN as u64);
        let err = sink.write_header(StreamHeader::default()).unwrap_err();
        assert!(matches!(err, FormatError::HeaderRepeated));
    }

    #[test]
    fn legacy_stream_rejects_opcodes() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_header(StreamHeader {
            version: StreamVersion::new(1, 0),
            ..Default::default()
        })
        .unwrap();
        let object = ObjectRecord {
            type_ref: TypeRef::Define {
                index: 1,
                name: "Leaf".into(),
            },
            object_id: ObjectId::first(),
            payload: Bytes::from_static(b"x"),
        };
        assert!(matches!(
            sink.write_object(Framing::Push, &object),
            Err(FormatError::FramingMismatch(_))
        ));
        assert!(matches!(sink.write_pop(), Err(FormatError::FramingMismatch(_))));
        assert!(matches!(
            sink.write_file_data(b"blob"),
            Err(FormatError::FramingMismatch(_))
        ));
        sink.write_object(Framing::Bare, &object).unwrap();
    }

    #[test]
    fn file_data_follows_its_frame() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_header(StreamHeader::default()).unwrap();
        let data_ref = sink.write_file_data(b"payload").unwrap();
        let bytes = sink.into_inner().unwrap();
        let start = data_ref.offset as usize;
        assert_eq!(&bytes[start..start + 7], b"payload");
        assert_eq!(data_ref.crc32, crc32fast::hash(b"payload"));
    }
}
