//! # Utility Modules
//!
//! Common helpers used throughout the meterlink crate: the growable buffer
//! behind the byte source, hex encoding/decoding and logging helpers.

pub mod hex;
pub mod iobuffer;
pub mod logging;

pub use hex::{decode_hex, encode_hex, format_hex_compact, parse_hex_lenient, pretty_hex};
pub use iobuffer::{IoBuffer, IoBufferError, IoBufferStats};
pub use logging::{log_frame_dump, log_frame_hex, LogThrottle};
