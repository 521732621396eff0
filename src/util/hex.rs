//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for wire-traffic dumps, script literals and the CLI
//! `probe` command.
//!
//! ## Usage
//!
//! ```rust
//! use meterlink::util::hex::{decode_hex, format_hex_compact, pretty_hex};
//!
//! let request = decode_hex("01 03 00 00 00 0A").unwrap();
//! assert_eq!(format_hex_compact(&request), "01 03 00 00 00 0a");
//!
//! // Trace-level dump with an ASCII column
//! println!("{}", pretty_hex(b"<msg><ch1>", 16));
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Parse hex string that may contain spaces or other separators
///
/// More lenient than decode_hex, strips all non-hex characters, so
/// `"01-03:00 00"` and `"0x01 0x03"` style input from a terminal both work.
pub fn parse_hex_lenient(input: &str) -> Result<Vec<u8>, HexError> {
    let without_prefixes = input.replace("0x", " ").replace("0X", " ");
    let hex_chars: String = without_prefixes
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();

    if hex_chars.is_empty() {
        return Err(HexError::EmptyString);
    }

    if hex_chars.len() % 2 != 0 {
        return Err(HexError::OddLength(hex_chars.len()));
    }

    hex::decode(&hex_chars).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "01 03 14" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex dump with offsets and an ASCII column, one line per `bytes_per_line`.
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let bytes_per_line = bytes_per_line.max(1);
    let mut lines = Vec::with_capacity(data.len() / bytes_per_line + 1);

    for (i, chunk) in data.chunks(bytes_per_line).enumerate() {
        let hex_part = format_hex_compact(chunk);
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        lines.push(format!(
            "{:04x}: {:<width$} |{}|",
            i * bytes_per_line,
            hex_part,
            ascii,
            width = bytes_per_line * 3 - 1
        ));
    }

    lines.join("\n")
}
