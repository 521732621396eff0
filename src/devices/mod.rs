//! # Device Drivers
//!
//! Each device family decides which conversations to run, in which order,
//! and how the decoded session variables become [`Reading`]s. Drivers are
//! polled by a worker in [`crate::device_manager`] through the
//! [`DeviceDriver`] trait.

pub mod cc128;
pub mod modbus;
pub mod xantrex;

pub use cc128::{Cc128Meter, Cc128Settings};
pub use modbus::{ModbusMeter, ModbusSettings, RegisterDef, RegisterKind};
pub use xantrex::{XantrexInverter, XantrexSettings};

use crate::error::MeterLinkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical quantity of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Voltage,
    Current,
    Power,
    Energy,
    Frequency,
    Temperature,
}

impl Quantity {
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
            Quantity::Power => "W",
            Quantity::Energy => "kWh",
            Quantity::Frequency => "Hz",
            Quantity::Temperature => "°C",
        }
    }
}

/// One decoded value from one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub device: String,
    pub channel: String,
    pub quantity: Quantity,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(device: &str, channel: &str, quantity: Quantity, value: f64) -> Self {
        Reading {
            device: device.to_string(),
            channel: channel.to_string(),
            quantity,
            value,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} = {} {}",
            self.device,
            self.channel,
            self.quantity,
            self.value,
            self.quantity.unit()
        )
    }
}

/// The "run one polling cycle" contract every device family implements.
pub trait DeviceDriver: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), MeterLinkError>;

    /// Run one polling cycle.
    ///
    /// `Ok` with no readings means the device had nothing to say this cycle.
    /// Errors for which [`MeterLinkError::is_fatal`] holds end the worker;
    /// others make it back off and try again.
    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError>;

    fn close(&mut self);
}
