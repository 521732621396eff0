//! TCP carrier, for serial-to-Ethernet gateways and networked meters.

use crate::error::MeterLinkError;
use crate::transport::port::{quiet_read, Port};
use log::info;
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    /// `host:port`
    pub address: String,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for TcpSettings {
    fn default() -> Self {
        TcpSettings {
            address: String::new(),
            connect_timeout_ms: 3000,
            write_timeout_ms: 1000,
        }
    }
}

pub struct TcpPort {
    settings: TcpSettings,
    stream: Option<TcpStream>,
}

impl TcpPort {
    pub fn new(settings: TcpSettings) -> Result<Self, MeterLinkError> {
        if settings.address.is_empty() {
            return Err(MeterLinkError::ConfigError("tcp address is empty".into()));
        }
        Ok(TcpPort {
            settings,
            stream: None,
        })
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "tcp stream not open"))
    }
}

impl Port for TcpPort {
    fn name(&self) -> &str {
        &self.settings.address
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        let addr = self
            .settings
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                MeterLinkError::ConfigError(format!("cannot resolve {}", self.settings.address))
            })?;

        let stream = TcpStream::connect_timeout(
            &addr,
            Duration::from_millis(self.settings.connect_timeout_ms),
        )?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(Duration::from_millis(
            self.settings.write_timeout_ms.max(1),
        )))?;

        info!("{}: tcp connected", self.settings.address);
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match quiet_read(stream.read(buf)) {
            // A zero-length read on a blocking socket is EOF, not silence.
            Ok(0) if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer closed the connection",
            )),
            other => other,
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(data)?;
        stream.flush()
    }

    fn purge(&mut self) -> io::Result<()> {
        // Drain whatever is already queued on the socket.
        let stream = self.stream()?;
        stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let result = loop {
            match stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        stream.set_nonblocking(false)?;
        result
    }

    fn reset(&mut self) -> Result<(), MeterLinkError> {
        self.close();
        self.open()
    }
}
