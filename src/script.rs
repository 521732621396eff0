//! # Script Loader
//!
//! JSON form of a device script and its resolution into a
//! [`Script`]. Variable names are resolved to `VarId`s here, once, so the
//! engine never looks a name up while polling.
//!
//! ```json
//! {
//!   "name": "modbus-meter",
//!   "variables": [
//!     { "name": "unit", "width": 1, "encoding": "uint" },
//!     { "name": "crc",  "width": 2, "encoding": "checksum" }
//!   ],
//!   "conversations": [
//!     { "name": "ping", "steps": [
//!       { "step": "send", "elements": [ { "var": "unit" }, { "hex": "08 00 00" }, { "var": "crc" } ],
//!         "checksum": { "var": "crc" } },
//!       { "step": "receive", "pattern": { "max_skip": 16 }, "timeout_ms": 500,
//!         "elements": [ { "var": "unit" }, { "hex": "08" } ] }
//!     ] }
//!   ]
//! }
//! ```

use crate::conversation::{
    ChecksumRule, Conversation, Element, ReceiveMode, ReceiveStep, ResizeStep, Script, SendStep,
    Step, ValidateRule,
};
use crate::constants::DEFAULT_RECEIVE_TIMEOUT_MS;
use crate::error::MeterLinkError;
use crate::util::hex::decode_hex;
use crate::variable::{SymbolTable, VariableSpec};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptDef {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    pub conversations: Vec<ConversationDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDef {
    pub name: String,
    pub steps: Vec<StepDef>,
}

/// Fixed bytes, written as hex or as ASCII text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LiteralDef {
    Hex { hex: String },
    Ascii { ascii: String },
}

impl LiteralDef {
    fn bytes(&self) -> Result<Vec<u8>, MeterLinkError> {
        match self {
            LiteralDef::Hex { hex } => Ok(decode_hex(hex)?),
            LiteralDef::Ascii { ascii } if ascii.is_ascii() => Ok(ascii.as_bytes().to_vec()),
            LiteralDef::Ascii { ascii } => Err(MeterLinkError::ScriptError(format!(
                "literal {ascii:?} is not ASCII"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ElementDef {
    Literal(LiteralDef),
    Until {
        until: String,
        terminator: LiteralDef,
        max_len: usize,
    },
    Var {
        var: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChecksumDef {
    pub var: String,
    #[serde(default)]
    pub skip_leading: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatternDef {
    pub max_skip: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EqualsDef {
    pub var: String,
    pub value: LiteralDef,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_multiplier() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepDef {
    Send {
        elements: Vec<ElementDef>,
        #[serde(default)]
        checksum: Option<ChecksumDef>,
        #[serde(default)]
        purge_before: bool,
    },
    Receive {
        elements: Vec<ElementDef>,
        #[serde(default)]
        pattern: Option<PatternDef>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default)]
        min_length: Option<usize>,
    },
    Validate {
        #[serde(default)]
        checksum: Option<ChecksumDef>,
        #[serde(default)]
        equals: Option<EqualsDef>,
    },
    Resize {
        target: String,
        length_from: String,
        #[serde(default = "default_multiplier")]
        multiplier: usize,
        #[serde(default)]
        adjust: i64,
    },
}

impl ScriptDef {
    pub fn from_json(json: &str) -> Result<Self, MeterLinkError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Declare the variables and resolve every conversation against them.
    pub fn resolve(&self) -> Result<Script, MeterLinkError> {
        let mut symbols = SymbolTable::new();
        for spec in &self.variables {
            symbols.declare(spec.clone())?;
        }

        let conversations = self
            .conversations
            .iter()
            .map(|conv| {
                let steps = conv
                    .steps
                    .iter()
                    .map(|step| resolve_step(&symbols, step))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| match e {
                        MeterLinkError::UnknownVariable(name) => MeterLinkError::ScriptError(
                            format!("conversation '{}': unknown variable '{name}'", conv.name),
                        ),
                        other => other,
                    })?;
                Ok(Conversation {
                    name: conv.name.clone(),
                    steps,
                })
            })
            .collect::<Result<Vec<_>, MeterLinkError>>()?;

        Script::new(&self.name, symbols, conversations)
    }
}

fn resolve_element(symbols: &SymbolTable, def: &ElementDef) -> Result<Element, MeterLinkError> {
    Ok(match def {
        ElementDef::Literal(literal) => Element::Literal(literal.bytes()?),
        ElementDef::Var { var } => Element::Var(symbols.resolve(var)?),
        ElementDef::Until {
            until,
            terminator,
            max_len,
        } => Element::Until {
            var: symbols.resolve(until)?,
            terminator: terminator.bytes()?,
            max_len: *max_len,
        },
    })
}

fn resolve_elements(
    symbols: &SymbolTable,
    defs: &[ElementDef],
) -> Result<Vec<Element>, MeterLinkError> {
    defs.iter().map(|d| resolve_element(symbols, d)).collect()
}

fn resolve_checksum(symbols: &SymbolTable, def: &ChecksumDef) -> Result<ChecksumRule, MeterLinkError> {
    Ok(ChecksumRule {
        var: symbols.resolve(&def.var)?,
        skip_leading: def.skip_leading,
    })
}

fn resolve_step(symbols: &SymbolTable, def: &StepDef) -> Result<Step, MeterLinkError> {
    Ok(match def {
        StepDef::Send {
            elements,
            checksum,
            purge_before,
        } => Step::Send(SendStep {
            elements: resolve_elements(symbols, elements)?,
            checksum: checksum
                .as_ref()
                .map(|c| resolve_checksum(symbols, c))
                .transpose()?,
            purge_before: *purge_before,
        }),
        StepDef::Receive {
            elements,
            pattern,
            timeout_ms,
            min_length,
        } => Step::Receive(ReceiveStep {
            elements: resolve_elements(symbols, elements)?,
            mode: match pattern {
                Some(p) => ReceiveMode::Pattern {
                    max_skip: p.max_skip,
                },
                None => ReceiveMode::Exact,
            },
            timeout: Duration::from_millis(*timeout_ms),
            min_length: *min_length,
        }),
        StepDef::Validate { checksum, equals } => match (checksum, equals) {
            (Some(c), None) => Step::Validate(ValidateRule::Checksum(resolve_checksum(symbols, c)?)),
            (None, Some(e)) => Step::Validate(ValidateRule::Equals {
                var: symbols.resolve(&e.var)?,
                expected: e.value.bytes()?,
            }),
            _ => {
                return Err(MeterLinkError::ScriptError(
                    "validate step needs exactly one of 'checksum' or 'equals'".into(),
                ))
            }
        },
        StepDef::Resize {
            target,
            length_from,
            multiplier,
            adjust,
        } => Step::Resize(ResizeStep {
            target: symbols.resolve(target)?,
            length_from: symbols.resolve(length_from)?,
            multiplier: *multiplier,
            adjust: *adjust,
        }),
    })
}

impl Script {
    /// Parse and resolve a JSON script.
    pub fn from_json(json: &str) -> Result<Script, MeterLinkError> {
        ScriptDef::from_json(json)?.resolve()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Script, MeterLinkError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Script::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"{
        "name": "demo",
        "variables": [
            { "name": "unit", "width": 1, "encoding": "uint" },
            { "name": "len", "width": 1, "encoding": "uint" },
            { "name": "body", "width": 0, "max_width": 8 },
            { "name": "crc", "width": 2, "encoding": "checksum" }
        ],
        "conversations": [
            { "name": "ping", "steps": [
                { "step": "send", "purge_before": true,
                  "elements": [ { "var": "unit" }, { "hex": "08" }, { "ascii": "OK" }, { "var": "crc" } ],
                  "checksum": { "var": "crc" } },
                { "step": "receive", "pattern": { "max_skip": 4 }, "timeout_ms": 250,
                  "elements": [ { "var": "unit" }, { "var": "len" } ] },
                { "step": "resize", "target": "body", "length_from": "len" },
                { "step": "receive", "elements": [ { "var": "body" }, { "var": "crc" } ] },
                { "step": "validate", "checksum": { "var": "crc" } },
                { "step": "validate", "equals": { "var": "unit", "value": { "hex": "01" } } }
            ] }
        ]
    }"#;

    #[test]
    fn test_resolve_full_script() {
        let script = Script::from_json(PING).unwrap();
        let conv = script.conversation("ping").unwrap();
        assert_eq!(conv.steps.len(), 6);

        let crc = script.symbols().resolve("crc").unwrap();
        match &conv.steps[0] {
            Step::Send(send) => {
                assert!(send.purge_before);
                assert_eq!(send.elements[1], Element::Literal(vec![0x08]));
                assert_eq!(send.elements[2], Element::Literal(b"OK".to_vec()));
                assert_eq!(send.checksum.map(|c| c.var), Some(crc));
            }
            other => panic!("unexpected step {other:?}"),
        }
        match &conv.steps[1] {
            Step::Receive(receive) => {
                assert_eq!(receive.mode, ReceiveMode::Pattern { max_skip: 4 });
                assert_eq!(receive.timeout, Duration::from_millis(250));
            }
            other => panic!("unexpected step {other:?}"),
        }
        match &conv.steps[3] {
            Step::Receive(receive) => {
                assert_eq!(receive.mode, ReceiveMode::Exact);
                assert_eq!(
                    receive.timeout,
                    Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS)
                );
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_unknown_variable_names_conversation() {
        let json = r#"{ "name": "x", "variables": [],
            "conversations": [ { "name": "c", "steps": [
                { "step": "send", "elements": [ { "var": "nope" } ] } ] } ] }"#;
        let err = Script::from_json(json).unwrap_err();
        assert!(err.to_string().contains("unknown variable 'nope'"));
    }

    #[test]
    fn test_validate_needs_one_rule() {
        let json = r#"{ "name": "x", "variables": [],
            "conversations": [ { "name": "c", "steps": [ { "step": "validate" } ] } ] }"#;
        assert!(matches!(
            Script::from_json(json),
            Err(MeterLinkError::ScriptError(_))
        ));
    }

    #[test]
    fn test_bad_hex_literal() {
        let json = r#"{ "name": "x", "variables": [],
            "conversations": [ { "name": "c", "steps": [
                { "step": "send", "elements": [ { "hex": "0" } ] } ] } ] }"#;
        assert!(matches!(Script::from_json(json), Err(MeterLinkError::Hex(_))));
    }

    #[test]
    fn test_until_element() {
        let json = r#"{ "name": "x",
            "variables": [ { "name": "line", "width": 0, "max_width": 64, "encoding": { "text": {} } } ],
            "conversations": [ { "name": "c", "steps": [
                { "step": "receive", "elements": [
                    { "until": "line", "terminator": { "ascii": "\r" }, "max_len": 64 } ] } ] } ] }"#;
        let script = Script::from_json(json).unwrap();
        match &script.conversation("c").unwrap().steps[0] {
            Step::Receive(r) => assert!(matches!(
                &r.elements[0],
                Element::Until { terminator, max_len: 64, .. } if terminator == b"\r"
            )),
            other => panic!("unexpected step {other:?}"),
        }
    }
}
