//! # Conversations
//!
//! This module defines the resolved, in-memory form of a device script: named
//! [`Conversation`]s made of send, receive, validate and resize steps, whose
//! elements refer to session variables by [`VarId`]. The
//! [`ConversationEngine`] executes them against a transport.
//!
//! Scripts are usually produced by [`crate::script`] from JSON, but anything
//! that builds these types and passes [`Script::new`] validation works.

pub mod engine;

pub use engine::{ConversationEngine, EngineStats};

use crate::error::MeterLinkError;
use crate::variable::{Encoding, SymbolTable, VarId, VariableSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One piece of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Fixed bytes: written verbatim, or expected verbatim.
    Literal(Vec<u8>),
    /// A session variable occupying its current width.
    Var(VarId),
    /// Receive only: everything up to `terminator` (at most `max_len` bytes)
    /// lands in `var`; the terminator is consumed.
    Until {
        var: VarId,
        terminator: Vec<u8>,
        max_len: usize,
    },
}

/// How a receive step locates its first element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// The first element must be at the head of the buffer.
    Exact,
    /// Skip fewer than `max_skip` noise bytes looking for the first element.
    Pattern { max_skip: usize },
}

/// Checksum carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumRule {
    /// Checksum variable; its offset ends the covered range.
    pub var: VarId,
    /// Leading message bytes excluded from the sum (start characters etc).
    pub skip_leading: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendStep {
    pub elements: Vec<Element>,
    pub checksum: Option<ChecksumRule>,
    /// Discard stale input before writing.
    pub purge_before: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveStep {
    pub elements: Vec<Element>,
    pub mode: ReceiveMode,
    /// Applies to every read the step performs.
    pub timeout: Duration,
    /// Accept a short final read of at least this many bytes into a trailing
    /// resizable variable.
    pub min_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidateRule {
    /// Recompute the checksum over the received message and compare.
    Checksum(ChecksumRule),
    /// Variable must hold exactly these bytes.
    Equals { var: VarId, expected: Vec<u8> },
}

/// `target.width = value(length_from) * multiplier + adjust`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeStep {
    pub target: VarId,
    pub length_from: VarId,
    pub multiplier: usize,
    pub adjust: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Send(SendStep),
    Receive(ReceiveStep),
    Validate(ValidateRule),
    Resize(ResizeStep),
}

/// A named, ordered list of steps run as one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Why the last conversation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Nothing, or not enough, arrived before the deadline.
    Timeout,
    /// A literal or pattern did not match, or an `Equals` rule failed.
    PatternMismatch,
    ChecksumMismatch,
    /// Bytes arrived but fewer than the step required.
    ShortRead,
    WriteFailed,
    /// A variable could not be sized or read as the step required.
    Variable,
}

/// Engine state, observable between and after conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    Sending,
    AwaitingResponse,
    Validating,
    Success,
    Failed(FailureKind),
}

/// A resolved device script: variables plus named conversations.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    symbols: Arc<SymbolTable>,
    conversations: HashMap<String, Arc<Conversation>>,
}

impl Script {
    /// Check every conversation against the symbol table and build the script.
    pub fn new(
        name: &str,
        symbols: SymbolTable,
        conversations: Vec<Conversation>,
    ) -> Result<Self, MeterLinkError> {
        let mut map = HashMap::new();
        for conversation in conversations {
            check_conversation(&symbols, &conversation)?;
            let key = conversation.name.clone();
            if map.insert(key.clone(), Arc::new(conversation)).is_some() {
                return Err(MeterLinkError::ScriptError(format!(
                    "{name}: conversation '{key}' defined twice"
                )));
            }
        }
        Ok(Script {
            name: name.to_string(),
            symbols: Arc::new(symbols),
            conversations: map,
        })
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn conversation(&self, name: &str) -> Option<&Arc<Conversation>> {
        self.conversations.get(name)
    }

    pub fn conversation_names(&self) -> impl Iterator<Item = &str> {
        self.conversations.keys().map(String::as_str)
    }
}

fn declared<'a>(
    symbols: &'a SymbolTable,
    conv: &Conversation,
    id: VarId,
) -> Result<&'a VariableSpec, MeterLinkError> {
    symbols.spec(id).ok_or_else(|| {
        MeterLinkError::ScriptError(format!(
            "conversation '{}': variable #{} is not declared",
            conv.name,
            id.index()
        ))
    })
}

fn check_conversation(symbols: &SymbolTable, conv: &Conversation) -> Result<(), MeterLinkError> {
    let fail = |reason: String| -> Result<(), MeterLinkError> {
        Err(MeterLinkError::ScriptError(format!(
            "conversation '{}': {reason}",
            conv.name
        )))
    };
    let spec = |id: VarId| declared(symbols, conv, id);

    if conv.name.is_empty() {
        return fail("empty name".into());
    }
    if conv.steps.is_empty() {
        return fail("no steps".into());
    }

    for step in &conv.steps {
        match step {
            Step::Send(send) => {
                for element in &send.elements {
                    match element {
                        Element::Until { .. } => {
                            return fail("'until' cannot be sent".into());
                        }
                        Element::Var(id) => {
                            spec(*id)?;
                        }
                        Element::Literal(_) => {}
                    }
                }
                if let Some(rule) = send.checksum {
                    if spec(rule.var)?.encoding != Encoding::Checksum {
                        return fail(format!("'{}' is not a checksum", spec(rule.var)?.name));
                    }
                    if !send.elements.contains(&Element::Var(rule.var)) {
                        return fail(format!(
                            "checksum '{}' is not part of the message",
                            spec(rule.var)?.name
                        ));
                    }
                }
            }
            Step::Receive(receive) => {
                if receive.elements.is_empty() {
                    return fail("receive step without elements".into());
                }
                if let (ReceiveMode::Pattern { .. }, Some(Element::Until { .. })) =
                    (receive.mode, receive.elements.first())
                {
                    return fail("pattern search cannot start with 'until'".into());
                }
                for element in &receive.elements {
                    match element {
                        Element::Var(id) => {
                            spec(*id)?;
                        }
                        Element::Until {
                            var,
                            terminator,
                            max_len,
                        } => {
                            let s = spec(*var)?;
                            if terminator.is_empty() {
                                return fail(format!("'until' into '{}' has no terminator", s.name));
                            }
                            if s.max_width.map_or(true, |max| max < *max_len) {
                                return fail(format!(
                                    "'{}' must be resizable to at least {max_len} bytes",
                                    s.name
                                ));
                            }
                        }
                        Element::Literal(bytes) if bytes.is_empty() => {
                            return fail("empty literal".into());
                        }
                        Element::Literal(_) => {}
                    }
                }
            }
            Step::Validate(ValidateRule::Checksum(rule)) => {
                if spec(rule.var)?.encoding != Encoding::Checksum {
                    return fail(format!("'{}' is not a checksum", spec(rule.var)?.name));
                }
            }
            Step::Validate(ValidateRule::Equals { var, .. }) => {
                spec(*var)?;
            }
            Step::Resize(resize) => {
                let target = spec(resize.target)?;
                if !target.is_resizable() {
                    return fail(format!("'{}' is not resizable", target.name));
                }
                let from = spec(resize.length_from)?;
                if from.encoding != Encoding::Uint {
                    return fail(format!("length field '{}' is not a uint", from.name));
                }
            }
        }
    }
    Ok(())
}
