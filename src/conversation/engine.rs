//! # Conversation Engine
//!
//! Runs named conversations of a [`Script`] over a [`DeviceStream`]:
//!
//! ```text
//! Idle -> Sending -> AwaitingResponse -> Validating -> Success
//!                                                   \-> Failed(kind)
//! ```
//!
//! A conversation either completes every step or stops at the first failing
//! one and reports `false`. Failures are ordinary control flow for drivers:
//! nothing is consumed from the input buffer by a literal that did not match,
//! so the driver can try another conversation against the same bytes.
//!
//! The engine is synchronous and owns its stream exclusively.

use super::{
    ChecksumRule, Conversation, ConversationState, Element, FailureKind, ReceiveMode,
    ReceiveStep, ResizeStep, Script, SendStep, Step, ValidateRule,
};
use crate::error::MeterLinkError;
use crate::strategy::CalculationStrategy;
use crate::transport::{DeviceStream, Port};
use crate::variable::{codec, Encoding, Session, VarId, Variable};
use bytes::{BufMut, BytesMut};
use log::{debug, error, trace};
use std::sync::Arc;
use std::time::Duration;

/// Counters kept across conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub conversations: u64,
    pub succeeded: u64,
    pub timeouts: u64,
    pub pattern_mismatches: u64,
    pub checksum_errors: u64,
    pub short_reads: u64,
    pub write_failures: u64,
    pub variable_errors: u64,
}

impl EngineStats {
    fn record(&mut self, state: ConversationState) {
        self.conversations += 1;
        match state {
            ConversationState::Success => self.succeeded += 1,
            ConversationState::Failed(kind) => match kind {
                FailureKind::Timeout => self.timeouts += 1,
                FailureKind::PatternMismatch => self.pattern_mismatches += 1,
                FailureKind::ChecksumMismatch => self.checksum_errors += 1,
                FailureKind::ShortRead => self.short_reads += 1,
                FailureKind::WriteFailed => self.write_failures += 1,
                FailureKind::Variable => self.variable_errors += 1,
            },
            _ => {}
        }
    }
}

type StepResult = Result<(), FailureKind>;

pub struct ConversationEngine<P: Port> {
    stream: DeviceStream<P>,
    strategy: Arc<dyn CalculationStrategy>,
    script: Arc<Script>,
    session: Session,
    state: ConversationState,
    /// Bytes received since the last send step or pattern search; checksum
    /// validation covers these.
    rx_message: Vec<u8>,
    stats: EngineStats,
}

impl<P: Port> ConversationEngine<P> {
    pub fn new(
        stream: DeviceStream<P>,
        strategy: Arc<dyn CalculationStrategy>,
        script: Arc<Script>,
    ) -> Self {
        let session = Session::new(Arc::clone(script.symbols()), strategy.byte_order());
        ConversationEngine {
            stream,
            strategy,
            script,
            session,
            state: ConversationState::Idle,
            rx_message: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    /// Replace the script; every session variable starts over.
    pub fn load_script(&mut self, script: Arc<Script>) {
        self.session = Session::new(Arc::clone(script.symbols()), self.strategy.byte_order());
        self.script = script;
        self.rx_message.clear();
        self.state = ConversationState::Idle;
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn strategy(&self) -> &dyn CalculationStrategy {
        self.strategy.as_ref()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn stream(&mut self) -> &mut DeviceStream<P> {
        &mut self.stream
    }

    pub fn open(&mut self) -> Result<(), MeterLinkError> {
        self.stream.open()
    }

    pub fn close(&mut self) {
        self.stream.close()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Resolve a variable name once, for use with [`Self::var`].
    pub fn var_id(&self, name: &str) -> Result<VarId, MeterLinkError> {
        self.script.symbols().resolve(name)
    }

    /// Variable for an id from [`Self::var_id`]. Ids issued before
    /// [`Self::load_script`] are stale; see [`Session::get`].
    pub fn var(&self, id: VarId) -> &Variable {
        self.session.get(id)
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        self.session.get_mut(id)
    }

    /// Checked variant of [`Self::var`]; `None` for an id from another script.
    pub fn try_var(&self, id: VarId) -> Option<&Variable> {
        self.session.try_get(id)
    }

    /// Session variable by name; the data exit point for drivers.
    pub fn variable(&self, name: &str) -> Result<&Variable, MeterLinkError> {
        self.session.variable(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Result<&mut Variable, MeterLinkError> {
        self.session.variable_mut(name)
    }

    /// Run a conversation, reporting only success or failure.
    ///
    /// An unknown name is logged and reported as failure.
    pub fn do_conversation(&mut self, name: &str) -> bool {
        match self.run(name) {
            Ok(ok) => ok,
            Err(e) => {
                error!("{}: {e}", self.stream.name());
                false
            }
        }
    }

    /// Run a conversation; `Err` only when the script has no such conversation.
    pub fn run(&mut self, name: &str) -> Result<bool, MeterLinkError> {
        let conversation = self
            .script
            .conversation(name)
            .cloned()
            .ok_or_else(|| MeterLinkError::UnknownConversation(name.to_string()))?;

        self.state = ConversationState::Idle;
        let outcome = self.execute(&conversation);
        self.state = match outcome {
            Ok(()) => ConversationState::Success,
            Err(kind) => {
                debug!(
                    "{}: conversation '{}' failed: {kind:?}",
                    self.stream.name(),
                    conversation.name
                );
                ConversationState::Failed(kind)
            }
        };
        self.stats.record(self.state);
        Ok(outcome.is_ok())
    }

    fn execute(&mut self, conversation: &Conversation) -> StepResult {
        trace!("{}: conversation '{}'", self.stream.name(), conversation.name);
        for step in &conversation.steps {
            match step {
                Step::Send(send) => {
                    self.state = ConversationState::Sending;
                    self.send(send)?;
                }
                Step::Receive(receive) => {
                    self.state = ConversationState::AwaitingResponse;
                    self.receive(receive)?;
                }
                Step::Validate(rule) => {
                    self.state = ConversationState::Validating;
                    self.validate(rule)?;
                }
                Step::Resize(resize) => self.resize(resize)?,
            }
        }
        Ok(())
    }

    fn send(&mut self, step: &SendStep) -> StepResult {
        if step.purge_before && !self.stream.purge_buffers() {
            return Err(FailureKind::WriteFailed);
        }
        self.rx_message.clear();

        let mut message = BytesMut::with_capacity(64);
        for element in &step.elements {
            match element {
                Element::Literal(bytes) => message.put_slice(bytes),
                Element::Var(id) => {
                    let var = self.session.get_mut(*id);
                    var.set_offset(Some(message.len()));
                    message.put_slice(var.bytes());
                }
                // rejected when the script is built
                Element::Until { .. } => return Err(FailureKind::Variable),
            }
        }

        if let Some(rule) = step.checksum {
            self.fill_checksum(rule, &mut message)?;
        }

        if self.stream.write(&message) {
            Ok(())
        } else {
            Err(FailureKind::WriteFailed)
        }
    }

    /// Compute the checksum over the finished message and patch it in place.
    fn fill_checksum(&mut self, rule: ChecksumRule, message: &mut BytesMut) -> StepResult {
        let var = self.session.get(rule.var);
        let (offset, width) = match var.offset() {
            Some(offset) => (offset, var.width()),
            None => return Err(FailureKind::Variable),
        };
        if rule.skip_leading > offset {
            error!("{}: checksum range of '{}' is empty", self.stream.name(), var.name());
            return Err(FailureKind::Variable);
        }

        let checksum = self
            .strategy
            .compute_checksum(&message[rule.skip_leading..offset]);
        if checksum.len() != width {
            error!(
                "{}: '{}' is {width} bytes but {} produces {}",
                self.stream.name(),
                var.name(),
                self.strategy.name(),
                checksum.len()
            );
            return Err(FailureKind::Variable);
        }

        message[offset..offset + width].copy_from_slice(&checksum);
        self.session
            .get_mut(rule.var)
            .set_bytes(&checksum)
            .map_err(|_| FailureKind::Variable)
    }

    fn receive(&mut self, step: &ReceiveStep) -> StepResult {
        // A pattern search starts a new frame.
        if let ReceiveMode::Pattern { .. } = step.mode {
            self.rx_message.clear();
        }
        let last = step.elements.len().saturating_sub(1);
        for (index, element) in step.elements.iter().enumerate() {
            let search = match step.mode {
                ReceiveMode::Pattern { max_skip } if index == 0 => Some(max_skip),
                _ => None,
            };
            match element {
                Element::Literal(expected) => match search {
                    Some(max_skip) => self.search(expected, max_skip, step.timeout)?,
                    None => self.expect_literal(expected, step.timeout)?,
                },
                Element::Var(id) => match search {
                    Some(max_skip) => {
                        let pattern = self.session.get(*id).get_bytes();
                        self.search(&pattern, max_skip, step.timeout)?;
                        self.session.get_mut(*id).set_offset(Some(
                            self.rx_message.len() - pattern.len(),
                        ));
                    }
                    None => {
                        let min = if index == last {
                            step.min_length
                        } else {
                            None
                        };
                        self.read_var(*id, min, step.timeout)?;
                    }
                },
                Element::Until {
                    var,
                    terminator,
                    max_len,
                } => self.read_until(*var, terminator, *max_len, step.timeout)?,
            }
        }
        Ok(())
    }

    /// Pattern search for the first element of a receive step.
    fn search(&mut self, pattern: &[u8], max_skip: usize, timeout: Duration) -> StepResult {
        let (info, _) = self.stream.find_pattern(pattern, max_skip, timeout, true, false);
        if !info.matched {
            return Err(if info.timed_out {
                FailureKind::Timeout
            } else {
                FailureKind::PatternMismatch
            });
        }
        if info.bytes_skipped > 0 {
            debug!(
                "{}: skipped {} bytes before {:02x?}",
                self.stream.name(),
                info.bytes_skipped,
                pattern
            );
        }
        self.rx_message.extend_from_slice(pattern);
        Ok(())
    }

    /// Fixed bytes at the head of the buffer; left in place on mismatch.
    fn expect_literal(&mut self, expected: &[u8], timeout: Duration) -> StepResult {
        let (bytes, info) = self
            .stream
            .read_exact(expected.len(), expected.len(), timeout, false);
        if !info.matched {
            return Err(self.shortfall());
        }
        if bytes != expected {
            return Err(FailureKind::PatternMismatch);
        }
        self.stream
            .read_exact(expected.len(), expected.len(), Duration::ZERO, true);
        self.rx_message.extend_from_slice(expected);
        Ok(())
    }

    fn read_var(&mut self, id: VarId, min_length: Option<usize>, timeout: Duration) -> StepResult {
        let var = self.session.get(id);
        let width = var.width();
        let min = match min_length {
            Some(min) if var.spec().is_resizable() => min.min(width),
            _ => width,
        };

        let (bytes, info) = self.stream.read_exact(width, min, timeout, true);
        if !info.matched {
            return Err(self.shortfall());
        }

        let offset = self.rx_message.len();
        let var = self.session.get_mut(id);
        if let Err(e) = var.set_bytes(&bytes) {
            error!("{e}");
            return Err(FailureKind::Variable);
        }
        var.set_offset(Some(offset));
        self.rx_message.extend_from_slice(&bytes);
        Ok(())
    }

    fn read_until(
        &mut self,
        id: VarId,
        terminator: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> StepResult {
        // A budget of max_len + 1 lets the terminator start right after max_len bytes.
        let (info, skipped) = self
            .stream
            .find_pattern(terminator, max_len + 1, timeout, true, true);
        if !info.matched {
            return Err(if info.timed_out {
                FailureKind::Timeout
            } else {
                FailureKind::PatternMismatch
            });
        }

        let field = skipped.unwrap_or_default();
        let offset = self.rx_message.len();
        let var = self.session.get_mut(id);
        if let Err(e) = var.set_bytes(&field) {
            error!("{e}");
            return Err(FailureKind::Variable);
        }
        var.set_offset(Some(offset));
        self.rx_message.extend_from_slice(&field);
        self.rx_message.extend_from_slice(terminator);
        Ok(())
    }

    /// Classify a failed exact read.
    fn shortfall(&mut self) -> FailureKind {
        if self.stream.source().available() > 0 {
            FailureKind::ShortRead
        } else {
            FailureKind::Timeout
        }
    }

    fn validate(&mut self, rule: &ValidateRule) -> StepResult {
        match rule {
            ValidateRule::Checksum(rule) => {
                let var = self.session.get(rule.var);
                let offset = var.offset().ok_or(FailureKind::Variable)?;
                if rule.skip_leading > offset || offset > self.rx_message.len() {
                    return Err(FailureKind::ChecksumMismatch);
                }
                let covered = &self.rx_message[rule.skip_leading..offset];
                if self.strategy.verify_checksum(covered, var.bytes()) {
                    Ok(())
                } else {
                    debug!(
                        "{}: checksum mismatch, received {:02x?} computed {:02x?}",
                        self.stream.name(),
                        var.bytes(),
                        self.strategy.compute_checksum(covered)
                    );
                    Err(FailureKind::ChecksumMismatch)
                }
            }
            ValidateRule::Equals { var, expected } => {
                if self.session.get(*var).bytes() == expected.as_slice() {
                    Ok(())
                } else {
                    Err(FailureKind::PatternMismatch)
                }
            }
        }
    }

    fn resize(&mut self, step: &ResizeStep) -> StepResult {
        let from = self.session.get(step.length_from);
        if from.encoding() != Encoding::Uint {
            return Err(FailureKind::Variable);
        }
        let length = codec::decode_uint(from.bytes(), from.byte_order());
        let width = (length as i128) * (step.multiplier as i128) + step.adjust as i128;
        let width = match usize::try_from(width) {
            Ok(width) => width,
            Err(_) => {
                debug!(
                    "{}: resize of '{}' to {width} rejected",
                    self.stream.name(),
                    self.session.get(step.target).name()
                );
                return Err(FailureKind::Variable);
            }
        };
        self.session.get_mut(step.target).resize(width).map_err(|e| {
            debug!("{e}");
            FailureKind::Variable
        })
    }
}
