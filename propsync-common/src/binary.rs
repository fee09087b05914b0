//! Compact value encoding used by the local-radio characteristics.
//!
//! - Integer: 4 bytes, little-endian two's complement.
//! - Float: 24-bit little-endian signed mantissa followed by a signed 8-bit
//!   base-10 exponent, `value = mantissa * 10^exponent`.
//! - Text: raw UTF-8 bytes, no terminator, at most [`TEXT_CAPACITY`] bytes.

use alloc::{string::String, vec::Vec};

use bytes::{Buf, BufMut};

use crate::{PropText, TEXT_CAPACITY, Value, ValueKind};

/// Largest mantissa magnitude produced for finite values.
pub const MANTISSA_MAX: i32 = 0x7F_FFFD;
pub const MANTISSA_NAN: i32 = 0x7F_FFFF;
pub const MANTISSA_POS_INF: i32 = 0x7F_FFFE;
pub const MANTISSA_NEG_INF: i32 = -0x7F_FFFE;
const MANTISSA_NRES: i32 = -0x80_0000;
const MANTISSA_RESERVED: i32 = -0x7F_FFFF;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{kind} value needs {expected} bytes, got {found}")]
    MalformedLength { kind: ValueKind, expected: usize, found: usize },
}

/// Minimum number of bytes a write must carry for `kind`.
pub const fn min_len(kind: ValueKind) -> usize {
    match kind {
        ValueKind::Integer | ValueKind::Float => 4,
        ValueKind::Text => 0,
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.kind().slot_len());
    encode_into(value, &mut out);
    out
}

pub fn encode_into(value: &Value, out: &mut impl BufMut) {
    match value {
        Value::Integer(v) => out.put_i32_le(*v),
        Value::Float(v) => out.put_slice(&encode_float(*v)),
        Value::Text(v) => {
            let bytes = v.as_bytes();
            out.put_slice(&bytes[..bytes.len().min(TEXT_CAPACITY)]);
        }
    }
}

pub fn decode(kind: ValueKind, mut data: &[u8]) -> Result<Value, CodecError> {
    let expected = min_len(kind);
    if data.len() < expected {
        return Err(CodecError::MalformedLength { kind, expected, found: data.len() });
    }

    Ok(match kind {
        ValueKind::Integer => Value::Integer(data.get_i32_le()),
        ValueKind::Float => {
            let mut raw = [0; 4];
            data.copy_to_slice(&mut raw);
            Value::Float(decode_float(raw))
        }
        ValueKind::Text => {
            let data = match data.iter().position(|b| *b == 0) {
                Some(nul) => &data[..nul],
                None => data,
            };
            let data = &data[..data.len().min(TEXT_CAPACITY)];
            Value::Text(PropText::new(&String::from_utf8_lossy(data)))
        }
    })
}

pub fn encode_float(value: f32) -> [u8; 4] {
    let (mantissa, exponent) = if value.is_nan() {
        (MANTISSA_NAN, 0)
    } else if value.is_infinite() {
        (if value > 0.0 { MANTISSA_POS_INF } else { MANTISSA_NEG_INF }, 0)
    } else if value == 0.0 {
        (0, 0)
    } else {
        normalize(value as f64)
    };

    let m = mantissa.to_le_bytes();
    [m[0], m[1], m[2], exponent as u8]
}

pub fn decode_float(raw: [u8; 4]) -> f32 {
    // sign-extend the 24-bit mantissa
    let mantissa = i32::from_le_bytes([raw[0], raw[1], raw[2], 0]) << 8 >> 8;
    let mut exponent = raw[3] as i8;

    if exponent == 0 {
        match mantissa {
            MANTISSA_NAN | MANTISSA_NRES | MANTISSA_RESERVED => return f32::NAN,
            MANTISSA_POS_INF => return f32::INFINITY,
            MANTISSA_NEG_INF => return f32::NEG_INFINITY,
            _ => {}
        }
    }

    let mut value = mantissa as f64;
    while exponent > 0 {
        value *= 10.0;
        exponent -= 1;
    }
    while exponent < 0 {
        value /= 10.0;
        exponent += 1;
    }
    value as f32
}

fn normalize(mut x: f64) -> (i32, i8) {
    let limit = MANTISSA_MAX as f64;
    let mut exponent: i32 = 0;

    while abs(x) > limit && exponent < i8::MAX as i32 {
        x /= 10.0;
        exponent += 1;
    }

    while abs(x) * 10.0 <= limit && exponent > i8::MIN as i32 && !is_integral(x) {
        x *= 10.0;
        exponent -= 1;
    }

    let rounded = if x < 0.0 { x - 0.5 } else { x + 0.5 };
    let mut mantissa = (rounded as i64).clamp(-(MANTISSA_MAX as i64), MANTISSA_MAX as i64) as i32;

    while mantissa != 0 && mantissa % 10 == 0 && exponent < i8::MAX as i32 {
        mantissa /= 10;
        exponent += 1;
    }

    (mantissa, exponent as i8)
}

fn abs(x: f64) -> f64 {
    if x < 0.0 { -x } else { x }
}

fn is_integral(x: f64) -> bool {
    x == (x as i64) as f64
}
