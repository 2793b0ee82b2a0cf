use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use objstream_types::Endian;
use tracing::{debug, trace};

use crate::error::{FormatError, FormatResult};
use crate::header::{StreamHeader, HEADER_LEN};
use crate::record::{Body, FileDataRef, Record, RecordCodec};

/// Default upper bound on a single frame body (64 MiB).
pub const DEFAULT_MAX_RECORD_LEN: u64 = 64 * 1024 * 1024;

/// A linear source of records.
///
/// Implementations must satisfy these invariants:
/// - The header is read exactly once, before any record.
/// - `next_record` returns `Ok(None)` only at a frame boundary; a stream that
///   ends inside a frame is an error.
/// - File-data bytes are skipped by `next_record` and only materialized by
///   `fetch`, which must not disturb the record position.
pub trait RecordSource {
    fn read_header(&mut self) -> FormatResult<StreamHeader>;

    fn next_record(&mut self) -> FormatResult<Option<Record>>;

    /// Read and verify an out-of-band data block.
    fn fetch(&mut self, data: &FileDataRef) -> FormatResult<Bytes>;

    /// Absolute offset of the next unread byte.
    fn position(&self) -> u64;
}

/// [`RecordSource`] over any seekable byte stream.
pub struct StreamSource<R> {
    inner: R,
    pos: u64,
    len: u64,
    codec: Option<RecordCodec>,
    max_record_len: u64,
}

impl StreamSource<Cursor<Bytes>> {
    /// In-memory source. Payloads are zero-copy slices of `data`.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let len = data.len() as u64;
        Self::with_len(Cursor::new(data), len)
    }
}

impl StreamSource<BufReader<File>> {
    /// File-backed source.
    pub fn open(path: &Path) -> FormatResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "opened stream file");
        Ok(Self::with_len(BufReader::new(file), len))
    }
}

impl<R: Read + Seek> StreamSource<R> {
    /// Wrap a reader positioned at the start of a stream.
    pub fn new(mut inner: R) -> FormatResult<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self::with_len(inner, len))
    }

    fn with_len(inner: R, len: u64) -> Self {
        Self {
            inner,
            pos: 0,
            len,
            codec: None,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Override the frame size limit.
    pub fn with_max_record_len(mut self, max: u64) -> Self {
        self.max_record_len = max;
        self
    }

    /// Total stream length in bytes.
    pub fn stream_len(&self) -> u64 {
        self.len
    }

    fn read_exact_at_pos(&mut self, buf: &mut [u8], what: &str) -> FormatResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FormatError::Truncated {
                offset: self.pos,
                reason: format!("stream ends inside {what}"),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read + Seek> RecordSource for StreamSource<R> {
    fn read_header(&mut self) -> FormatResult<StreamHeader> {
        if self.codec.is_some() {
            return Err(FormatError::HeaderRepeated);
        }
        let mut buf = [0u8; HEADER_LEN];
        self.read_exact_at_pos(&mut buf, "header")?;
        let header = StreamHeader::decode(&buf)?;
        self.codec = Some(RecordCodec::new(header));
        debug!(version = %header.version, endian = ?header.endian, "stream header read");
        Ok(header)
    }

    fn next_record(&mut self) -> FormatResult<Option<Record>> {
        let codec = self.codec.ok_or(FormatError::HeaderPending)?;
        if self.pos == self.len {
            return Ok(None);
        }

        let offset = self.pos;
        let mut prefix = [0u8; 4];
        self.read_exact_at_pos(&mut prefix, "frame length")?;
        let len = match codec.header().endian {
            Endian::Little => u32::from_le_bytes(prefix),
            Endian::Big => u32::from_be_bytes(prefix),
        } as u64;
        if len > self.max_record_len {
            return Err(FormatError::RecordTooLarge {
                offset,
                size: len,
                max: self.max_record_len,
            });
        }
        if self.pos + len > self.len {
            return Err(FormatError::Truncated {
                offset,
                reason: format!("frame of {len} bytes extends past end of stream"),
            });
        }
        let mut body = vec![0u8; len as usize];
        self.read_exact_at_pos(&mut body, "frame body")?;

        let record = match codec.decode(offset, Bytes::from(body))? {
            Body::Object { framing, object } => Record::Object { framing, object },
            Body::Pop => Record::Pop,
            Body::FileData(data) => {
                let data_offset = self.pos;
                let data_end = data_offset
                    .checked_add(data.len)
                    .filter(|end| *end <= self.len)
                    .ok_or_else(|| FormatError::Truncated {
                        offset,
                        reason: format!("file data of {} bytes extends past end of stream", data.len),
                    })?;
                self.inner.seek(SeekFrom::Start(data_end))?;
                self.pos = data_end;
                Record::FileData(FileDataRef {
                    offset: data_offset,
                    len: data.len,
                    crc32: data.crc32,
                })
            }
        };
        trace!(offset, len, "record read");
        Ok(Some(record))
    }

    fn fetch(&mut self, data: &FileDataRef) -> FormatResult<Bytes> {
        let in_bounds = data
            .offset
            .checked_add(data.len)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(FormatError::Truncated {
                offset: data.offset,
                reason: "file data reference past end of stream".into(),
            });
        }
        let resume = self.pos;
        self.inner.seek(SeekFrom::Start(data.offset))?;
        let mut buf = vec![0u8; data.len as usize];
        let read = self.inner.read_exact(&mut buf);
        self.inner.seek(SeekFrom::Start(resume))?;
        read?;

        let actual = crc32fast::hash(&buf);
        if actual != data.crc32 {
            return Err(FormatError::ChecksumMismatch {
                offset: data.offset,
                expected: data.crc32,
                actual,
            });
        }
        Ok(Bytes::from(buf))
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

impl<R> std::fmt::Debug for StreamSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("pos", &self.pos)
            .field("len", &self.len)
            .field("codec", &self.codec)
            .finish()
    }
}
