//! # Configuration
//!
//! JSON description of the devices a manager runs: transport, driver,
//! polling interval and an optional lock group.
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "house",
//!       "transport": { "type": "serial", "port_name": "/dev/ttyUSB0", "baud_rate": 57600 },
//!       "driver": { "type": "cc128" } },
//!     { "name": "meter-1",
//!       "transport": { "type": "tcp", "address": "10.0.0.5:502" },
//!       "driver": { "type": "modbus", "unit_id": 1,
//!                   "registers": [ { "offset": 0, "scale": 0.1, "quantity": "voltage" } ] },
//!       "poll_interval_ms": 5000, "lock_group": "rs485" }
//!   ]
//! }
//! ```

use crate::constants::DEFAULT_POLL_INTERVAL_MS;
use crate::device_manager::{DeviceManager, PortLock, WorkerOptions};
use crate::devices::{
    Cc128Meter, Cc128Settings, DeviceDriver, ModbusMeter, ModbusSettings, XantrexInverter,
    XantrexSettings,
};
use crate::error::MeterLinkError;
use crate::transport::{DeviceStream, Port, SerialPortTransport, SerialSettings, TcpPort, TcpSettings};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

impl TransportConfig {
    pub fn build(&self) -> Result<Box<dyn Port>, MeterLinkError> {
        let port: Box<dyn Port> = match self {
            TransportConfig::Serial(settings) => Box::new(SerialPortTransport::new(settings.clone())?),
            TransportConfig::Tcp(settings) => Box::new(TcpPort::new(settings.clone())?),
        };
        Ok(port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriverConfig {
    Modbus(ModbusSettings),
    Cc128(Cc128Settings),
    Xantrex(XantrexSettings),
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub driver: DriverConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Devices naming the same group never poll at the same time.
    #[serde(default)]
    pub lock_group: Option<String>,
}

impl DeviceConfig {
    /// Build the transport and driver; nothing is opened until the worker starts.
    pub fn build_driver(&self) -> Result<Box<dyn DeviceDriver>, MeterLinkError> {
        let stream = DeviceStream::new(self.transport.build()?);
        let driver: Box<dyn DeviceDriver> = match &self.driver {
            DriverConfig::Modbus(settings) => {
                Box::new(ModbusMeter::new(&self.name, stream, settings.clone())?)
            }
            DriverConfig::Cc128(settings) => {
                Box::new(Cc128Meter::new(&self.name, stream, settings.clone())?)
            }
            DriverConfig::Xantrex(settings) => {
                Box::new(XantrexInverter::new(&self.name, stream, settings.clone())?)
            }
        };
        Ok(driver)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManagerConfig {
    pub devices: Vec<DeviceConfig>,
}

impl ManagerConfig {
    pub fn from_json(json: &str) -> Result<Self, MeterLinkError> {
        let config: ManagerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MeterLinkError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MeterLinkError::ConfigError(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), MeterLinkError> {
        if self.devices.is_empty() {
            return Err(MeterLinkError::ConfigError("no devices configured".into()));
        }
        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(MeterLinkError::ConfigError("device with empty name".into()));
            }
            if !names.insert(device.name.as_str()) {
                return Err(MeterLinkError::ConfigError(format!(
                    "device '{}' configured twice",
                    device.name
                )));
            }
            if device.poll_interval_ms == 0 {
                return Err(MeterLinkError::ConfigError(format!(
                    "device '{}': poll interval must be positive",
                    device.name
                )));
            }
            match &device.transport {
                TransportConfig::Serial(settings) => settings.validate()?,
                TransportConfig::Tcp(settings) if settings.address.is_empty() => {
                    return Err(MeterLinkError::ConfigError(format!(
                        "device '{}': tcp address is empty",
                        device.name
                    )))
                }
                TransportConfig::Tcp(_) => {}
            }
            if let DriverConfig::Modbus(settings) = &device.driver {
                settings.validate()?;
            }
        }
        Ok(())
    }

    /// Build every driver and start it on `manager`.
    pub fn start(&self, manager: &mut DeviceManager) -> Result<(), MeterLinkError> {
        let mut locks: HashMap<&str, PortLock> = HashMap::new();
        for device in &self.devices {
            let lock = device
                .lock_group
                .as_deref()
                .map(|group| locks.entry(group).or_default().clone());
            let options = WorkerOptions {
                poll_interval: Duration::from_millis(device.poll_interval_ms),
                lock,
                ..WorkerOptions::default()
            };
            manager.spawn(device.build_driver()?, options)?;
        }
        Ok(())
    }
}
