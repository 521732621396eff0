//! Byte-level encode/decode helpers shared by variables and drivers.
//!
//! All integer helpers work on 1..=8 byte fields in an explicit byte order,
//! independent of the host's endianness.

use super::{Endian, Padding};

pub const MAX_INT_WIDTH: usize = 8;

/// Unsigned value of a 1..=8 byte field.
pub fn decode_uint(bytes: &[u8], order: Endian) -> u64 {
    let push = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    match order {
        Endian::Little => bytes.iter().rev().fold(0, push),
        _ => bytes.iter().fold(0, push),
    }
}

/// Sign-extended value of a 1..=8 byte two's complement field.
pub fn decode_int(bytes: &[u8], order: Endian) -> i64 {
    let width = bytes.len();
    if width == 0 {
        return 0;
    }
    let raw = decode_uint(bytes, order);
    let shift = 64 - 8 * width as u32;
    ((raw << shift) as i64) >> shift
}

/// `value` as a `width` byte field, or `None` when it does not fit.
pub fn encode_uint(value: u64, width: usize, order: Endian) -> Option<Vec<u8>> {
    if width == 0 || width > MAX_INT_WIDTH {
        return None;
    }
    if width < MAX_INT_WIDTH && value >> (8 * width) != 0 {
        return None;
    }
    let be = value.to_be_bytes();
    let mut out = be[MAX_INT_WIDTH - width..].to_vec();
    if order == Endian::Little {
        out.reverse();
    }
    Some(out)
}

/// `value` as a `width` byte two's complement field, or `None` when out of range.
pub fn encode_int(value: i64, width: usize, order: Endian) -> Option<Vec<u8>> {
    if width == 0 || width > MAX_INT_WIDTH {
        return None;
    }
    if width < MAX_INT_WIDTH {
        let bits = 8 * width as u32;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value < min || value > max {
            return None;
        }
    }
    let be = value.to_be_bytes();
    let mut out = be[MAX_INT_WIDTH - width..].to_vec();
    if order == Endian::Little {
        out.reverse();
    }
    Some(out)
}

pub fn scale_factor(decimals: u8) -> f64 {
    10f64.powi(decimals as i32)
}

/// Fixed-point field: signed raw integer divided by `10^decimals`.
pub fn decode_fixed(bytes: &[u8], order: Endian, decimals: u8) -> f64 {
    decode_int(bytes, order) as f64 / scale_factor(decimals)
}

pub fn encode_fixed(value: f64, width: usize, order: Endian, decimals: u8) -> Option<Vec<u8>> {
    if !value.is_finite() {
        return None;
    }
    let raw = (value * scale_factor(decimals)).round();
    if raw < i64::MIN as f64 || raw > i64::MAX as f64 {
        return None;
    }
    encode_int(raw as i64, width, order)
}

/// ASCII text with trailing padding removed.
pub fn decode_text(bytes: &[u8], padding: Padding) -> Option<String> {
    let end = match padding.byte() {
        Some(pad) => bytes
            .iter()
            .rposition(|&b| b != pad)
            .map(|p| p + 1)
            .unwrap_or(0),
        None => bytes.len(),
    };
    let trimmed = &bytes[..end];
    // Null padding also ends the string at the first NUL.
    let trimmed = match padding {
        Padding::Null => trimmed.split(|&b| b == 0).next().unwrap_or(&[]),
        _ => trimmed,
    };
    if !trimmed.is_ascii() {
        return None;
    }
    Some(trimmed.iter().map(|&b| b as char).collect())
}

/// ASCII text padded to `width`; `None` if too long or not ASCII.
pub fn encode_text(text: &str, width: usize, padding: Padding) -> Option<Vec<u8>> {
    if !text.is_ascii() || text.len() > width {
        return None;
    }
    let mut out = text.as_bytes().to_vec();
    if out.len() < width {
        out.resize(width, padding.byte()?);
    }
    Some(out)
}
