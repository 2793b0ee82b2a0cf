use serde::Serialize;

use objstream_types::{Endian, FloatWidth};

use crate::error::{CodecError, CodecResult};
use crate::varint::encode_varint;
use crate::Layout;

macro_rules! put_fixed {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            match self.layout.endian {
                Endian::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
                Endian::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
            }
        }
    };
}

/// Append-only encoder for one record payload.
#[derive(Clone, Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
    layout: Layout,
}

impl PayloadWriter {
    pub fn new(layout: Layout) -> Self {
        Self {
            buf: Vec::new(),
            layout,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    put_fixed!(put_u16, u16);
    put_fixed!(put_u32, u32);
    put_fixed!(put_u64, u64);
    put_fixed!(put_i16, i16);
    put_fixed!(put_i32, i32);
    put_fixed!(put_i64, i64);
    put_fixed!(put_f32, f32);
    put_fixed!(put_f64, f64);

    /// Write a float in the stream's standard width. Narrowing to single
    /// precision is lossy by design of the stream flag.
    pub fn put_float(&mut self, value: f64) {
        match self.layout.float_width {
            FloatWidth::Single => self.put_f32(value as f32),
            FloatWidth::Double => self.put_f64(value),
        }
    }

    pub fn put_varint(&mut self, value: u64) {
        encode_varint(&mut self.buf, value);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) {
        self.put_blob(value.as_bytes());
    }

    /// Length-prefixed byte blob.
    pub fn put_blob(&mut self, value: &[u8]) {
        self.put_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// Raw bytes with no length prefix.
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    /// Bincode-encoded serde value, length-prefixed.
    pub fn put_serde<T: Serialize>(&mut self, value: &T) -> CodecResult<()> {
        let encoded =
            bincode::serialize(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
        self.put_blob(&encoded);
        Ok(())
    }
}
