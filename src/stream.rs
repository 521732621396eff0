//! # Buffered Byte Source
//!
//! Turns a [`Port`] that may deliver partial reads, time out or fail into a
//! byte source with two bounded operations:
//!
//! - [`BufferedSource::read_exact`] - a fixed number of bytes, optionally
//!   accepting a shorter minimum, optionally without consuming them (peek).
//! - [`BufferedSource::find_pattern`] - scan for a literal byte sequence,
//!   tolerating a bounded amount of noise before it.
//!
//! Both always return a [`MatchInfo`]; neither returns an error. Bytes that
//! are pulled from the port but not consumed stay buffered for the next call,
//! so a caller may probe for one response shape and fall back to another.
//!
//! When a port read fails the source enters the device-error state and asks
//! the port to reset. Reset attempts are spaced by a cool-down window; inside
//! that window reads sleep in short slices instead of hammering a dead port.

use crate::constants::{
    STREAM_COOLDOWN_SLEEP, STREAM_ERROR_LOG_BURST, STREAM_ERROR_LOG_WINDOW_MS,
    STREAM_INITIAL_CAPACITY, STREAM_MAX_CAPACITY, STREAM_POLL_SLICE, STREAM_READ_CHUNK,
    STREAM_RESET_COOLDOWN,
};
use crate::transport::Port;
use crate::util::iobuffer::{IoBuffer, IoBufferStats};
use crate::util::logging::{log_frame_hex, LogThrottle};
use log::{debug, error, info, warn};
use std::io;
use std::time::{Duration, Instant};

/// Outcome of one buffered read or search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchInfo {
    /// The operation found what it was asked for.
    pub matched: bool,
    /// Bytes removed from the buffer by this call.
    pub bytes_consumed: usize,
    /// Noise bytes passed over before a pattern (or rejected as pattern starts).
    pub bytes_skipped: usize,
    /// Bytes pulled from the port during this call.
    pub bytes_read: usize,
    /// The deadline passed before the operation completed.
    pub timed_out: bool,
}

/// Tuning knobs of a [`BufferedSource`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub initial_capacity: usize,
    pub max_capacity: usize,
    /// Minimum spacing between two reset attempts.
    pub reset_cooldown: Duration,
    /// Sleep slice while waiting out the cool-down.
    pub cooldown_sleep: Duration,
    /// Upper bound of one blocking port read.
    pub poll_slice: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_capacity: STREAM_INITIAL_CAPACITY,
            max_capacity: STREAM_MAX_CAPACITY,
            reset_cooldown: STREAM_RESET_COOLDOWN,
            cooldown_sleep: STREAM_COOLDOWN_SLEEP,
            poll_slice: STREAM_POLL_SLICE,
        }
    }
}

/// A port plus the buffer that accumulates its input.
pub struct BufferedSource<P: Port> {
    port: P,
    buffer: IoBuffer,
    config: StreamConfig,
    device_error: bool,
    last_reset_attempt: Option<Instant>,
    reset_count: u64,
    error_log: LogThrottle,
}

impl<P: Port> BufferedSource<P> {
    pub fn new(port: P) -> Self {
        Self::with_config(port, StreamConfig::default())
    }

    pub fn with_config(port: P, config: StreamConfig) -> Self {
        Self {
            buffer: IoBuffer::with_capacity(config.initial_capacity, config.max_capacity),
            port,
            config,
            device_error: false,
            last_reset_attempt: None,
            reset_count: 0,
            error_log: LogThrottle::new(STREAM_ERROR_LOG_WINDOW_MS, STREAM_ERROR_LOG_BURST),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Bytes already buffered and not yet consumed.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_stats(&self) -> IoBufferStats {
        self.buffer.stats()
    }

    pub fn device_error(&self) -> bool {
        self.device_error
    }

    pub fn mark_device_error(&mut self) {
        self.device_error = true;
    }

    /// Number of reset attempts made since creation.
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// Drop buffered input and ask the port to discard its own queues.
    pub fn purge(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.port.purge()
    }

    /// Reset the port now, regardless of the cool-down.
    ///
    /// Buffered bytes are discarded: anything received before a reset is
    /// not trusted to line up with what follows.
    pub fn reset(&mut self) -> bool {
        self.last_reset_attempt = Some(Instant::now());
        self.reset_count += 1;
        self.buffer.clear();

        match self.port.reset() {
            Ok(()) => {
                info!("{}: port reset succeeded", self.port.name());
                self.device_error = false;
                self.error_log.reset();
                true
            }
            Err(e) => {
                warn!("{}: port reset failed: {e}", self.port.name());
                self.device_error = true;
                false
            }
        }
    }

    /// Read `length` bytes, waiting up to `timeout`.
    ///
    /// Succeeds with the full `length` bytes, or on timeout with whatever is
    /// buffered if that is at least `min_length` (`matched` and `timed_out`
    /// both set). Below `min_length` the call fails, returns no bytes and
    /// leaves the buffer untouched. With `consume == false` the returned
    /// bytes stay buffered.
    pub fn read_exact(
        &mut self,
        length: usize,
        min_length: usize,
        timeout: Duration,
        consume: bool,
    ) -> (Vec<u8>, MatchInfo) {
        let min_length = min_length.min(length);
        let deadline = Instant::now() + timeout;
        let bytes_read = self.fill_until(length, deadline);
        let available = self.buffer.len();

        let mut info = MatchInfo {
            bytes_read,
            ..MatchInfo::default()
        };

        let take = if available >= length {
            info.matched = true;
            length
        } else {
            info.timed_out = Instant::now() >= deadline;
            if available >= min_length {
                info.matched = true;
                available
            } else {
                debug!(
                    "{}: read_exact wanted {length} (min {min_length}), got {available}",
                    self.port.name()
                );
                return (Vec::new(), info);
            }
        };

        let bytes = self.buffer.peek(take).to_vec();
        if consume {
            info.bytes_consumed = self.buffer.discard(take);
        }
        (bytes, info)
    }

    /// Scan for `pattern`, allowing fewer than `max_skip` noise bytes before it.
    ///
    /// Candidate starts are tried one byte at a time; a mismatch part-way into
    /// the pattern restarts the comparison at the byte after the candidate
    /// start, so a pattern overlapping a false start (`AAB` in `AAAB`) is
    /// still found. A zero budget is treated as one: the pattern may sit at
    /// the current position.
    ///
    /// With `consume`, success removes the skipped noise and the pattern and
    /// failure removes the rejected candidates (never more than the budget).
    /// With `extract_skipped`, the noise bytes are returned alongside.
    pub fn find_pattern(
        &mut self,
        pattern: &[u8],
        max_skip: usize,
        timeout: Duration,
        consume: bool,
        extract_skipped: bool,
    ) -> (MatchInfo, Option<Vec<u8>>) {
        let mut info = MatchInfo::default();
        if pattern.is_empty() {
            info.matched = true;
            return (info, extract_skipped.then(Vec::new));
        }

        let max_skip = max_skip.max(1);
        let deadline = Instant::now() + timeout;
        let mut skip = 0usize;

        'candidates: while skip < max_skip {
            for (i, &expected) in pattern.iter().enumerate() {
                let idx = skip + i;
                if idx >= self.buffer.len() {
                    info.bytes_read += self.fill_until(idx + 1, deadline);
                    if idx >= self.buffer.len() {
                        info.timed_out = Instant::now() >= deadline;
                        break 'candidates;
                    }
                }
                if self.buffer.get(idx) != Some(expected) {
                    skip += 1;
                    continue 'candidates;
                }
            }

            info.matched = true;
            break;
        }

        info.bytes_skipped = skip;
        let skipped = extract_skipped.then(|| self.buffer.peek(skip).to_vec());

        if consume {
            let count = if info.matched {
                skip + pattern.len()
            } else {
                skip
            };
            info.bytes_consumed = self.buffer.discard(count);
        }

        if !info.matched {
            debug!(
                "{}: pattern {:02x?} not found (skipped {skip}, timed out {})",
                self.port.name(),
                pattern,
                info.timed_out
            );
        }

        (info, skipped)
    }

    /// Pull from the port until `want` bytes are buffered or `deadline` passes.
    fn fill_until(&mut self, want: usize, deadline: Instant) -> usize {
        let mut total = 0;

        while self.buffer.len() < want {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;

            if self.device_error && !self.recover(remaining) {
                continue;
            }

            let needed = want - self.buffer.len();
            let headroom = self.buffer.max_capacity() - self.buffer.len();
            if needed > headroom {
                error!(
                    "{}: cannot buffer {want} bytes (limit {})",
                    self.port.name(),
                    self.buffer.max_capacity()
                );
                break;
            }
            let chunk = STREAM_READ_CHUNK.max(needed).min(headroom);
            let slot = match self.buffer.spare_mut(chunk) {
                Ok(slot) => slot,
                Err(e) => {
                    error!("{}: cannot buffer {want} bytes: {e}", self.port.name());
                    break;
                }
            };

            match self.port.read(slot, remaining.min(self.config.poll_slice)) {
                Ok(0) => {}
                Ok(n) => {
                    if let Err(e) = self.buffer.commit(n) {
                        error!("{}: buffer bookkeeping: {e}", self.port.name());
                        break;
                    }
                    total += n;
                    let start = self.buffer.len() - n;
                    log_frame_hex("RX", self.buffer.peek_range(start, n));
                }
                Err(e) => self.on_read_error(e),
            }
        }

        total
    }

    /// Called while in device-error state; returns whether reading may resume.
    fn recover(&mut self, remaining: Duration) -> bool {
        match self.last_reset_attempt {
            Some(at) if at.elapsed() < self.config.reset_cooldown => {
                std::thread::sleep(remaining.min(self.config.cooldown_sleep));
                false
            }
            _ => self.reset(),
        }
    }

    fn on_read_error(&mut self, e: io::Error) {
        self.device_error = true;
        if self.error_log.allow() {
            let suppressed = self.error_log.take_suppressed();
            error!(
                "{}: read failed: {e} ({suppressed} similar errors suppressed)",
                self.port.name()
            );
        }
    }
}
