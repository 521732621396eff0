//! The carrier-facing side of a transport.

use crate::error::MeterLinkError;
use std::io;
use std::time::Duration;

/// A raw duplex byte carrier (serial line, TCP socket, test double).
///
/// Implementations block for at most the timeout handed to [`Port::read`]
/// and report "nothing arrived" as `Ok(0)` rather than as an error, so that
/// the buffered byte source can tell a quiet line from a broken one.
pub trait Port: Send {
    /// Human readable identifier used in log lines.
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), MeterLinkError>;

    fn is_open(&self) -> bool;

    fn close(&mut self);

    /// Read whatever is available into `buf`, waiting up to `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard anything pending in the carrier's own input/output queues.
    fn purge(&mut self) -> io::Result<()>;

    /// Dispose of the underlying handle and open a fresh one.
    fn reset(&mut self) -> Result<(), MeterLinkError>;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        (**self).open()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn purge(&mut self) -> io::Result<()> {
        (**self).purge()
    }

    fn reset(&mut self) -> Result<(), MeterLinkError> {
        (**self).reset()
    }
}

/// Map the "no data yet" flavours of `io::Error` to an empty read.
pub(crate) fn quiet_read(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        other => other,
    }
}
