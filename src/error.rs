//! # MeterLink Error Handling
//!
//! This module defines the MeterLinkError enum, which represents the different error
//! types that can occur in the meterlink crate.
//!
//! Byte-stream reads and conversations do not use this type on their hot path:
//! they report success or failure through `MatchInfo` and a boolean. Errors are
//! reserved for setup (scripts, configuration, opening ports) and for typed
//! variable access that disagrees with the declared encoding.

use crate::util::hex::HexError;
use thiserror::Error;

/// Represents the different error types that can occur in the meterlink crate.
#[derive(Debug, Error)]
pub enum MeterLinkError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Low-level I/O failure on a transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A conversation script could not be resolved.
    #[error("Script error: {0}")]
    ScriptError(String),

    /// No conversation with this name exists in the loaded script.
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    /// No session variable with this name exists in the loaded script.
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// A typed accessor does not agree with the variable's encoding or width.
    #[error("Variable '{name}': {reason}")]
    VariableError { name: String, reason: String },

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string: {0}")]
    Hex(#[from] HexError),

    /// Script or configuration JSON could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A device answered with something its driver cannot use.
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The driver loop cannot continue and must be abandoned.
    #[error("Fatal driver error: {0}")]
    Fatal(String),
}

impl MeterLinkError {
    /// Shorthand used by the variable accessors.
    pub fn variable(name: &str, reason: impl Into<String>) -> Self {
        MeterLinkError::VariableError {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a driver loop hitting this error must stop instead of backing off.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeterLinkError::Fatal(_)
                | MeterLinkError::ScriptError(_)
                | MeterLinkError::UnknownConversation(_)
                | MeterLinkError::UnknownVariable(_)
                | MeterLinkError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MeterLinkError::Fatal("x".into()).is_fatal());
        assert!(MeterLinkError::UnknownConversation("x".into()).is_fatal());
        assert!(!MeterLinkError::DeviceError("x".into()).is_fatal());
        assert!(!MeterLinkError::SerialPortError("x".into()).is_fatal());
    }

    #[test]
    fn test_variable_error_display() {
        let err = MeterLinkError::variable("voltage", "width 3 is not a valid integer width");
        assert_eq!(
            err.to_string(),
            "Variable 'voltage': width 3 is not a valid integer width"
        );
    }
}
