//! # Modbus RTU Register Meter
//!
//! Reads a block of holding registers (function 0x03) and maps them to
//! readings through a configurable register map.
//!
//! The response is decoded in two conversations. `read_request` sends the
//! request and finds the reply header (unit id, function code). The function
//! code then selects the next one: `read_body` for a normal reply (byte
//! count, resized data, CRC) or `read_exception` for a `0x83` exception.
//! The CRC covers bytes from both conversations.

use super::{DeviceDriver, Quantity, Reading};
use crate::constants::{MODBUS_EXCEPTION_FLAG, MODBUS_FN_READ_HOLDING};
use crate::conversation::{ConversationEngine, Script};
use crate::error::MeterLinkError;
use crate::strategy::Crc16Modbus;
use crate::transport::{DeviceStream, Port};
use crate::variable::{codec, Endian, VarId};
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;

const SCRIPT: &str = r#"{
    "name": "modbus-rtu",
    "variables": [
        { "name": "unit", "width": 1, "encoding": "uint" },
        { "name": "function", "width": 1, "encoding": "uint" },
        { "name": "start", "width": 2, "encoding": "uint" },
        { "name": "count", "width": 2, "encoding": "uint" },
        { "name": "byte_count", "width": 1, "encoding": "uint" },
        { "name": "data", "width": 0, "max_width": 250 },
        { "name": "exception", "width": 1, "encoding": "uint" },
        { "name": "crc", "width": 2, "encoding": "checksum" }
    ],
    "conversations": [
        { "name": "read_request", "steps": [
            { "step": "send", "purge_before": true,
              "elements": [ { "var": "unit" }, { "hex": "03" }, { "var": "start" }, { "var": "count" }, { "var": "crc" } ],
              "checksum": { "var": "crc" } },
            { "step": "receive", "pattern": { "max_skip": 32 },
              "elements": [ { "var": "unit" }, { "var": "function" } ] }
        ] },
        { "name": "read_body", "steps": [
            { "step": "receive", "elements": [ { "var": "byte_count" } ] },
            { "step": "resize", "target": "data", "length_from": "byte_count" },
            { "step": "receive", "elements": [ { "var": "data" }, { "var": "crc" } ] },
            { "step": "validate", "checksum": { "var": "crc" } }
        ] },
        { "name": "read_exception", "steps": [
            { "step": "receive", "elements": [ { "var": "exception" }, { "var": "crc" } ] },
            { "step": "validate", "checksum": { "var": "crc" } }
        ] }
    ]
}"#;

/// Largest register block a single 0x03 request may ask for.
const MAX_REGISTERS: u32 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    #[default]
    U16,
    I16,
    U32,
    I32,
}

impl RegisterKind {
    fn registers(self) -> u16 {
        match self {
            RegisterKind::U16 | RegisterKind::I16 => 1,
            RegisterKind::U32 | RegisterKind::I32 => 2,
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// One value in the register block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterDef {
    /// Register index relative to `start_register`.
    pub offset: u16,
    #[serde(default)]
    pub kind: RegisterKind,
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub quantity: Quantity,
    #[serde(default)]
    pub channel: String,
}

fn default_unit_id() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModbusSettings {
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default)]
    pub start_register: u16,
    pub registers: Vec<RegisterDef>,
}

impl ModbusSettings {
    /// Number of registers the request must cover.
    pub fn register_count(&self) -> u32 {
        self.registers
            .iter()
            .map(|r| u32::from(r.offset) + u32::from(r.kind.registers()))
            .max()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), MeterLinkError> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(MeterLinkError::ConfigError(format!(
                "modbus unit id {} out of range 1..=247",
                self.unit_id
            )));
        }
        if self.registers.is_empty() {
            return Err(MeterLinkError::ConfigError("modbus register map is empty".into()));
        }
        let count = self.register_count();
        if count > MAX_REGISTERS {
            return Err(MeterLinkError::ConfigError(format!(
                "modbus register map spans {count} registers, limit is {MAX_REGISTERS}"
            )));
        }
        Ok(())
    }
}

/// Script variables the driver touches, resolved once.
struct Vars {
    unit: VarId,
    function: VarId,
    start: VarId,
    count: VarId,
    data: VarId,
    exception: VarId,
}

pub struct ModbusMeter<P: Port> {
    name: String,
    settings: ModbusSettings,
    engine: ConversationEngine<P>,
    vars: Vars,
}

impl<P: Port> ModbusMeter<P> {
    pub fn new(
        name: &str,
        stream: DeviceStream<P>,
        settings: ModbusSettings,
    ) -> Result<Self, MeterLinkError> {
        settings.validate()?;
        let script = Arc::new(Script::from_json(SCRIPT)?);
        let engine = ConversationEngine::new(stream, Arc::new(Crc16Modbus), script);
        let vars = Vars {
            unit: engine.var_id("unit")?,
            function: engine.var_id("function")?,
            start: engine.var_id("start")?,
            count: engine.var_id("count")?,
            data: engine.var_id("data")?,
            exception: engine.var_id("exception")?,
        };
        Ok(ModbusMeter {
            name: name.to_string(),
            settings,
            engine,
            vars,
        })
    }

    pub fn engine(&self) -> &ConversationEngine<P> {
        &self.engine
    }

    fn prepare_request(&mut self) -> Result<(), MeterLinkError> {
        let count = self.settings.register_count();
        self.engine
            .var_mut(self.vars.unit)
            .set_uint(self.settings.unit_id as u64)?;
        self.engine
            .var_mut(self.vars.start)
            .set_uint(self.settings.start_register as u64)?;
        self.engine.var_mut(self.vars.count).set_uint(count as u64)?;
        Ok(())
    }

    /// Raw register block of the last successful read.
    fn read_block(&mut self) -> Result<Vec<u8>, MeterLinkError> {
        self.prepare_request()?;

        if !self.engine.run("read_request")? {
            return Err(MeterLinkError::DeviceError(format!(
                "unit {} did not answer ({:?})",
                self.settings.unit_id,
                self.engine.state()
            )));
        }

        let function = self.engine.var(self.vars.function).get_byte()?;
        if function == MODBUS_FN_READ_HOLDING {
            if !self.engine.run("read_body")? {
                return Err(MeterLinkError::DeviceError(format!(
                    "unit {} sent a bad reply ({:?})",
                    self.settings.unit_id,
                    self.engine.state()
                )));
            }
            let data = self.engine.var(self.vars.data).get_bytes();
            let expected = self.settings.register_count() as usize * 2;
            if data.len() != expected {
                return Err(MeterLinkError::DeviceError(format!(
                    "unit {} returned {} bytes, expected {expected}",
                    self.settings.unit_id,
                    data.len()
                )));
            }
            return Ok(data);
        }

        if function == (MODBUS_FN_READ_HOLDING | MODBUS_EXCEPTION_FLAG)
            && self.engine.run("read_exception")?
        {
            let code = self.engine.var(self.vars.exception).get_byte()?;
            return Err(MeterLinkError::DeviceError(format!(
                "unit {} exception 0x{code:02X}",
                self.settings.unit_id
            )));
        }

        warn!(
            "{}: unexpected function code 0x{function:02X}, discarding input",
            self.name
        );
        self.engine.stream().purge_buffers();
        Err(MeterLinkError::DeviceError(format!(
            "unit {} sent function 0x{function:02X}",
            self.settings.unit_id
        )))
    }
}

/// Decode the register map out of a raw block.
pub fn decode_registers(device: &str, block: &[u8], registers: &[RegisterDef]) -> Vec<Reading> {
    registers
        .iter()
        .filter_map(|reg| {
            let start = reg.offset as usize * 2;
            let end = start + reg.kind.registers() as usize * 2;
            let bytes = block.get(start..end)?;
            let raw = match reg.kind {
                RegisterKind::U16 | RegisterKind::U32 => codec::decode_uint(bytes, Endian::Big) as f64,
                RegisterKind::I16 | RegisterKind::I32 => codec::decode_int(bytes, Endian::Big) as f64,
            };
            Some(Reading::new(device, &reg.channel, reg.quantity, raw * reg.scale))
        })
        .collect()
}

impl<P: Port> DeviceDriver for ModbusMeter<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        self.engine.open()
    }

    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError> {
        let block = self.read_block()?;
        let readings = decode_registers(&self.name, &block, &self.settings.registers);
        debug!("{}: {} readings", self.name, readings.len());
        Ok(readings)
    }

    fn close(&mut self) {
        self.engine.close()
    }
}
