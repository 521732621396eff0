//! # Logging Utilities
//!
//! Rate limiting for repetitive transport errors and hex dumps of wire traffic.
//!
//! ```rust
//! use meterlink::util::logging::{LogThrottle, log_frame_hex};
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::warn!("read failed, resetting port");
//! }
//!
//! log_frame_hex("TX", &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
//! ```

use log::{log_enabled, Level};
use std::time::Instant;

/// Throttling structure for rate-limiting log messages
///
/// A port that stays unplugged for hours would otherwise log one error
/// per read attempt.
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages dropped since the last allowed one
    suppressed: u32,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed = self.suppressed.saturating_add(1);
        }
        allowed
    }

    /// Number of messages dropped since the last call, resetting the counter
    pub fn take_suppressed(&mut self) -> u32 {
        std::mem::take(&mut self.suppressed)
    }

    /// Get current throttle statistics
    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            window_ms: self.window_ms,
            cap: self.cap,
            count: self.count,
            suppressed: self.suppressed,
        }
    }

    /// Reset the throttle (start new window immediately)
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
    }
}

/// Statistics about a log throttle instance
#[derive(Debug, Clone, Copy)]
pub struct ThrottleStats {
    pub window_ms: u64,
    pub cap: u32,
    pub count: u32,
    pub suppressed: u32,
}

/// Log frame data in hex format for debugging
///
/// Output is capped to keep a stuck device from flooding the log.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 64;

    if !log_enabled!(target: "meterlink::wire", Level::Debug) {
        return;
    }

    let display_data = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(display_data);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::debug!(target: "meterlink::wire", "{prefix}: {hex_str}{suffix}");
}

/// Full hex + ASCII dump at trace level
pub fn log_frame_dump(prefix: &str, data: &[u8]) {
    if log_enabled!(target: "meterlink::wire", Level::Trace) {
        log::trace!(
            target: "meterlink::wire",
            "{prefix} ({} bytes):\n{}",
            data.len(),
            crate::util::hex::pretty_hex(data, 16)
        );
    }
}
