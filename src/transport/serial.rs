//! # Serial Transport
//!
//! Blocking serial line built on the synchronous API re-exported by
//! `tokio_serial`. Driver loops own their thread, so blocking reads bounded by
//! the per-call timeout are exactly what the byte source wants.

use crate::constants::{
    SERIAL_DEFAULT_READ_TIMEOUT_MS, SERIAL_DEFAULT_WRITE_TIMEOUT_MS, SERIAL_RESET_SETTLE,
    STANDARD_BAUD_RATES,
};
use crate::error::MeterLinkError;
use crate::transport::port::{quiet_read, Port};
use log::{debug, info};
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio_serial::ClearBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlSetting {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line parameters, fixed for the life of the transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: ParitySetting,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub flow_control: FlowControlSetting,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub reset_settle_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            port_name: String::new(),
            baud_rate: 9600,
            parity: ParitySetting::None,
            data_bits: 8,
            stop_bits: 1,
            flow_control: FlowControlSetting::None,
            read_timeout_ms: SERIAL_DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: SERIAL_DEFAULT_WRITE_TIMEOUT_MS,
            reset_settle_ms: SERIAL_RESET_SETTLE.as_millis() as u64,
        }
    }
}

impl SerialSettings {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        SerialSettings {
            port_name: port_name.to_string(),
            baud_rate,
            ..SerialSettings::default()
        }
    }

    pub fn validate(&self) -> Result<(), MeterLinkError> {
        if self.port_name.is_empty() {
            return Err(MeterLinkError::ConfigError("serial port name is empty".into()));
        }
        if !STANDARD_BAUD_RATES.contains(&self.baud_rate) {
            return Err(MeterLinkError::ConfigError(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(MeterLinkError::ConfigError(format!(
                "unsupported data bits {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(MeterLinkError::ConfigError(format!(
                "unsupported stop bits {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity {
            ParitySetting::None => tokio_serial::Parity::None,
            ParitySetting::Odd => tokio_serial::Parity::Odd,
            ParitySetting::Even => tokio_serial::Parity::Even,
        }
    }

    fn flow_control(&self) -> tokio_serial::FlowControl {
        match self.flow_control {
            FlowControlSetting::None => tokio_serial::FlowControl::None,
            FlowControlSetting::Software => tokio_serial::FlowControl::Software,
            FlowControlSetting::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// A serial port opened on demand and recreated by [`Port::reset`].
pub struct SerialPortTransport {
    settings: SerialSettings,
    port: Option<Box<dyn tokio_serial::SerialPort>>,
    current_timeout: Option<Duration>,
}

impl SerialPortTransport {
    pub fn new(settings: SerialSettings) -> Result<Self, MeterLinkError> {
        settings.validate()?;
        Ok(SerialPortTransport {
            settings,
            port: None,
            current_timeout: None,
        })
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn handle(&mut self) -> io::Result<&mut Box<dyn tokio_serial::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        if self.current_timeout == Some(timeout) {
            return Ok(());
        }
        self.handle()?
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.current_timeout = Some(timeout);
        Ok(())
    }
}

impl Port for SerialPortTransport {
    fn name(&self) -> &str {
        &self.settings.port_name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        let read_timeout = Duration::from_millis(self.settings.read_timeout_ms);
        let port = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits())
            .stop_bits(self.settings.stop_bits())
            .parity(self.settings.parity())
            .flow_control(self.settings.flow_control())
            .timeout(read_timeout)
            .open()
            .map_err(|e| {
                MeterLinkError::SerialPortError(format!("{}: {e}", self.settings.port_name))
            })?;

        info!(
            "{}: serial open at {} baud",
            self.settings.port_name, self.settings.baud_rate
        );
        self.port = Some(port);
        self.current_timeout = Some(read_timeout);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        self.port = None;
        self.current_timeout = None;
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.set_timeout(timeout.max(Duration::from_millis(1)))?;
        let result = Read::read(self.handle()?, buf);
        quiet_read(result)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.set_timeout(Duration::from_millis(self.settings.write_timeout_ms))?;
        let port = self.handle()?;
        Write::write_all(port, data)?;
        Write::flush(port)
    }

    fn purge(&mut self) -> io::Result<()> {
        self.handle()?
            .clear(ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn reset(&mut self) -> Result<(), MeterLinkError> {
        debug!("{}: disposing serial handle", self.settings.port_name);
        self.close();
        std::thread::sleep(Duration::from_millis(self.settings.reset_settle_ms));
        self.open()
    }
}

/// Names of the serial ports present on this machine.
pub fn available_port_names() -> Result<Vec<String>, MeterLinkError> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| MeterLinkError::SerialPortError(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validation() {
        assert!(SerialSettings::new("/dev/ttyUSB0", 9600).validate().is_ok());
        assert!(SerialSettings::new("/dev/ttyUSB0", 12345).validate().is_err());
        assert!(SerialSettings::new("", 9600).validate().is_err());

        let mut settings = SerialSettings::new("COM3", 2400);
        settings.data_bits = 9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: SerialSettings = serde_json::from_str(
            r#"{ "port_name": "/dev/ttyS1", "baud_rate": 2400, "parity": "even" }"#,
        )
        .unwrap();
        assert_eq!(settings.parity, ParitySetting::Even);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.read_timeout_ms, SERIAL_DEFAULT_READ_TIMEOUT_MS);
        assert_eq!(settings.reset_settle_ms, 3000);
    }

    #[test]
    fn test_transport_starts_closed() {
        let transport = SerialPortTransport::new(SerialSettings::new("/dev/null-port", 9600)).unwrap();
        assert!(!transport.is_open());
        assert_eq!(transport.name(), "/dev/null-port");
    }
}
