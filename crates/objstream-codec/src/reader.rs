use serde::de::DeserializeOwned;

use objstream_types::{Endian, FloatWidth};

use crate::error::{CodecError, CodecResult};
use crate::varint::decode_varint;
use crate::Layout;

macro_rules! get_fixed {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> CodecResult<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes: [u8; N] = self.take_array()?;
            Ok(match self.layout.endian {
                Endian::Little => <$ty>::from_le_bytes(bytes),
                Endian::Big => <$ty>::from_be_bytes(bytes),
            })
        }
    };
}

/// Cursor over one record payload.
///
/// Every getter either consumes exactly the bytes of its value or fails
/// without moving the cursor.
#[derive(Clone, Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
    layout: Layout,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8], layout: Layout) -> Self {
        Self {
            data,
            pos: 0,
            layout,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Current offset from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_i8(&mut self) -> CodecResult<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_bool(&mut self) -> CodecResult<bool> {
        let offset = self.pos;
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => {
                self.pos = offset;
                Err(CodecError::InvalidBool { offset, value })
            }
        }
    }

    get_fixed!(get_u16, u16);
    get_fixed!(get_u32, u32);
    get_fixed!(get_u64, u64);
    get_fixed!(get_i16, i16);
    get_fixed!(get_i32, i32);
    get_fixed!(get_i64, i64);
    get_fixed!(get_f32, f32);
    get_fixed!(get_f64, f64);

    /// Read a float in the stream's standard width.
    pub fn get_float(&mut self) -> CodecResult<f64> {
        match self.layout.float_width {
            FloatWidth::Single => Ok(f64::from(self.get_f32()?)),
            FloatWidth::Double => self.get_f64(),
        }
    }

    pub fn get_varint(&mut self) -> CodecResult<u64> {
        let (value, consumed) = decode_varint(&self.data[self.pos..], self.pos)?;
        self.pos += consumed;
        Ok(value)
    }

    /// Varint length prefix, checked against the remaining bytes.
    fn get_len(&mut self) -> CodecResult<usize> {
        let offset = self.pos;
        let length = self.get_varint()?;
        let len = usize::try_from(length).map_err(|_| CodecError::LengthOverflow { offset, length })?;
        if len > self.remaining() {
            let remaining = self.remaining();
            self.pos = offset;
            return Err(CodecError::Truncated {
                offset,
                needed: len,
                remaining,
            });
        }
        Ok(len)
    }

    pub fn get_blob(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.get_len()?;
        self.take(len)
    }

    pub fn get_str(&mut self) -> CodecResult<&'a str> {
        let offset = self.pos;
        let bytes = self.get_blob()?;
        std::str::from_utf8(bytes).map_err(|_| {
            self.pos = offset;
            CodecError::InvalidUtf8 { offset }
        })
    }

    /// Raw bytes with no length prefix.
    pub fn get_raw(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        self.take(n)
    }

    pub fn get_serde<T: DeserializeOwned>(&mut self) -> CodecResult<T> {
        let bytes = self.get_blob()?;
        bincode::deserialize(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// The unread tail of the payload, consuming it.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}
