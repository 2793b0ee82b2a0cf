use crate::error::{CodecError, CodecResult};

/// Encode a u64 as a variable-length integer.
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `encode_varint` produces for `value`.
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
///
/// `base` is only used to report where in the enclosing payload the varint
/// started.
pub fn decode_varint(data: &[u8], base: usize) -> CodecResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        if shift == 63 && byte > 1 {
            return Err(CodecError::VarintOverflow { offset: base });
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(CodecError::VarintOverflow { offset: base });
        }
    }
    Err(CodecError::Truncated {
        offset: base,
        needed: data.len() + 1,
        remaining: data.len(),
    })
}
