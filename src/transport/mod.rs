//! # Transports
//!
//! A [`DeviceStream`] gives the conversation engine one lifecycle surface
//! (open, write, purge, reset, close) over any [`Port`], and owns the
//! [`BufferedSource`] that serves reads from that port.
//!
//! A stream is used by exactly one driver loop at a time; nothing in here
//! locks.

pub mod mock;
pub mod port;
pub mod serial;
pub mod tcp;

pub use mock::{MockHandle, MockPort};
pub use port::Port;
pub use serial::{SerialPortTransport, SerialSettings};
pub use tcp::{TcpPort, TcpSettings};

use crate::error::MeterLinkError;
use crate::stream::{BufferedSource, MatchInfo, StreamConfig};
use crate::util::logging::{log_frame_dump, log_frame_hex};
use log::{error, info, warn};
use std::time::Duration;

/// A port, its input buffer and the device-error state shared by both.
pub struct DeviceStream<P: Port> {
    source: BufferedSource<P>,
}

impl<P: Port> DeviceStream<P> {
    pub fn new(port: P) -> Self {
        Self {
            source: BufferedSource::new(port),
        }
    }

    pub fn with_config(port: P, config: StreamConfig) -> Self {
        Self {
            source: BufferedSource::with_config(port, config),
        }
    }

    pub fn name(&self) -> &str {
        self.source.port().name()
    }

    pub fn open(&mut self) -> Result<(), MeterLinkError> {
        if self.source.port().is_open() {
            return Ok(());
        }
        self.source.port_mut().open()?;
        info!("{}: opened", self.name());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.source.port().is_open()
    }

    pub fn close(&mut self) {
        if self.source.port().is_open() {
            self.source.port_mut().close();
            info!("{}: closed", self.name());
        }
    }

    /// The buffered byte source reading from this transport.
    pub fn source(&mut self) -> &mut BufferedSource<P> {
        &mut self.source
    }

    pub fn port(&self) -> &P {
        self.source.port()
    }

    pub fn device_error(&self) -> bool {
        self.source.device_error()
    }

    /// Write all of `data`.
    ///
    /// Never fails loudly: an I/O error flips the device-error state and
    /// yields `false`. A write issued while already in device-error state
    /// first resets the port and gives up if that reset fails.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.source.device_error() && !self.source.reset() {
            return false;
        }

        log_frame_hex("TX", data);
        log_frame_dump("TX", data);

        match self.source.port_mut().write_all(data) {
            Ok(()) => true,
            Err(e) => {
                error!("{}: write of {} bytes failed: {e}", self.name(), data.len());
                self.source.mark_device_error();
                false
            }
        }
    }

    /// Discard buffered and pending input and output.
    pub fn purge_buffers(&mut self) -> bool {
        match self.source.purge() {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: purge failed: {e}", self.name());
                self.source.mark_device_error();
                false
            }
        }
    }

    pub fn reset(&mut self) -> bool {
        self.source.reset()
    }

    pub fn read_exact(
        &mut self,
        length: usize,
        min_length: usize,
        timeout: Duration,
        consume: bool,
    ) -> (Vec<u8>, MatchInfo) {
        self.source.read_exact(length, min_length, timeout, consume)
    }

    pub fn find_pattern(
        &mut self,
        pattern: &[u8],
        max_skip: usize,
        timeout: Duration,
        consume: bool,
        extract_skipped: bool,
    ) -> (MatchInfo, Option<Vec<u8>>) {
        self.source
            .find_pattern(pattern, max_skip, timeout, consume, extract_skipped)
    }
}

impl<P: Port> Drop for DeviceStream<P> {
    fn drop(&mut self) {
        self.close();
    }
}
