//! # meterlink - Conversation Engine for Serial and Networked Energy Meters
//!
//! The meterlink crate talks to meters, inverters and energy monitors that
//! answer request/response byte protocols over a serial line or a TCP gateway.
//!
//! ## Features
//!
//! - Buffered byte source with exact-length reads and bounded pattern search
//!   over ports that deliver partial reads, time out or fail
//! - Serial, TCP and mock transports behind one `Port` trait, with
//!   device-error tracking and reset/cool-down handling
//! - Typed session variables (integers, fixed point, ASCII, checksums) with
//!   per-field byte order
//! - Declarative conversation scripts (send, receive, validate, resize) loaded
//!   from JSON and run by a synchronous state machine
//! - Pluggable checksum strategies: 8/16-bit sums, XOR, CRC-16/MODBUS
//! - Drivers for Modbus RTU register meters, CurrentCost CC128 and Xantrex GT
//! - A device manager running each driver on its own blocking worker
//!
//! ## Usage
//!
//! ```rust
//! use meterlink::{ConversationEngine, DeviceStream, MockPort, Script, Sum8};
//! use std::sync::Arc;
//!
//! let script = Script::from_json(r#"{
//!     "name": "demo",
//!     "variables": [ { "name": "value", "width": 2, "encoding": "uint", "endian": "big" } ],
//!     "conversations": [ { "name": "read", "steps": [
//!         { "step": "send", "elements": [ { "hex": "10 01" } ] },
//!         { "step": "receive", "pattern": { "max_skip": 8 },
//!           "elements": [ { "hex": "90" }, { "var": "value" } ] } ] } ]
//! }"#).unwrap();
//!
//! let (port, device) = MockPort::new("demo");
//! device.set_responder(|_| vec![vec![0x90, 0x01, 0x2C]]);
//!
//! let mut engine = ConversationEngine::new(DeviceStream::new(port), Arc::new(Sum8), Arc::new(script));
//! engine.open().unwrap();
//! assert!(engine.do_conversation("read"));
//! assert_eq!(engine.variable("value").unwrap().get_u16().unwrap(), 300);
//! ```

pub mod config;
pub mod constants;
pub mod conversation;
pub mod device_manager;
pub mod devices;
pub mod error;
pub mod logging;
pub mod script;
pub mod strategy;
pub mod stream;
pub mod transport;
pub mod util;
pub mod variable;

pub use crate::error::MeterLinkError;
pub use crate::logging::{init_logger, init_logger_with_default, log_info};

pub use config::{DeviceConfig, DriverConfig, ManagerConfig, TransportConfig};
pub use conversation::{
    Conversation, ConversationEngine, ConversationState, Element, FailureKind, Script, Step,
};
pub use device_manager::{DeviceManager, PortLock, WorkerExit, WorkerOptions};
pub use devices::{DeviceDriver, Quantity, Reading};
pub use script::ScriptDef;
pub use strategy::{CalculationStrategy, Crc16Modbus, NoChecksum, StrategyKind, Sum16, Sum8, Xor8};
pub use stream::{BufferedSource, MatchInfo, StreamConfig};
pub use transport::{
    DeviceStream, MockHandle, MockPort, Port, SerialPortTransport, SerialSettings, TcpPort,
    TcpSettings,
};
pub use variable::{Encoding, Endian, Padding, Session, SymbolTable, VarId, Variable, VariableSpec};
