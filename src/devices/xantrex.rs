//! # Xantrex GT Grid-Tie Inverter
//!
//! ASCII query/response over RS-232 at 9600 baud. Each query is a command
//! terminated by CR; the inverter answers with one CR-terminated line.
//!
//! | Command    | Reply                          |
//! |------------|--------------------------------|
//! | `MEASIN?`  | `V:352.1 I:1.02 P:359`         |
//! | `MEASOUT?` | `V:240.3 I:1.43 P:344 F:50.01` |
//! | `KWHLIFE?` | `12834`                        |

use super::{DeviceDriver, Quantity, Reading};
use crate::conversation::{ConversationEngine, Script};
use crate::error::MeterLinkError;
use crate::strategy::NoChecksum;
use crate::transport::{DeviceStream, Port};
use crate::variable::VarId;
use log::warn;
use nom::character::complete::{alpha1, char, space0, space1};
use nom::combinator::all_consuming;
use nom::multi::separated_list1;
use nom::number::complete::double;
use nom::sequence::{delimited, separated_pair};
use nom::IResult;
use serde::Deserialize;
use std::sync::Arc;

const SCRIPT: &str = r#"{
    "name": "xantrex-gt",
    "variables": [
        { "name": "line", "width": 0, "max_width": 80, "encoding": { "text": { "padding": "none" } } }
    ],
    "conversations": [
        { "name": "meas_in", "steps": [
            { "step": "send", "purge_before": true, "elements": [ { "ascii": "MEASIN?\r" } ] },
            { "step": "receive", "elements": [ { "until": "line", "terminator": { "ascii": "\r" }, "max_len": 80 } ] }
        ] },
        { "name": "meas_out", "steps": [
            { "step": "send", "purge_before": true, "elements": [ { "ascii": "MEASOUT?\r" } ] },
            { "step": "receive", "elements": [ { "until": "line", "terminator": { "ascii": "\r" }, "max_len": 80 } ] }
        ] },
        { "name": "kwh_life", "steps": [
            { "step": "send", "purge_before": true, "elements": [ { "ascii": "KWHLIFE?\r" } ] },
            { "step": "receive", "elements": [ { "until": "line", "terminator": { "ascii": "\r" }, "max_len": 80 } ] }
        ] }
    ]
}"#;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct XantrexSettings {
    /// Also query lifetime energy every cycle.
    #[serde(default = "default_true")]
    pub lifetime_energy: bool,
}

fn default_true() -> bool {
    true
}

impl Default for XantrexSettings {
    fn default() -> Self {
        XantrexSettings {
            lifetime_energy: true,
        }
    }
}

fn pair(input: &str) -> IResult<&str, (&str, f64)> {
    separated_pair(alpha1, char(':'), double)(input)
}

/// `K:value` pairs separated by spaces.
pub fn parse_measurements(line: &str) -> Option<Vec<(String, f64)>> {
    let result: IResult<&str, Vec<(&str, f64)>> =
        all_consuming(delimited(space0, separated_list1(space1, pair), space0))(line);
    result.ok().map(|(_, pairs)| {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect()
    })
}

/// A bare number, as returned by `KWHLIFE?`.
pub fn parse_number(line: &str) -> Option<f64> {
    let result: IResult<&str, f64> = all_consuming(delimited(space0, double, space0))(line);
    result.ok().map(|(_, v)| v)
}

fn quantity(key: &str) -> Option<Quantity> {
    match key {
        "V" => Some(Quantity::Voltage),
        "I" => Some(Quantity::Current),
        "P" => Some(Quantity::Power),
        "F" => Some(Quantity::Frequency),
        _ => None,
    }
}

pub struct XantrexInverter<P: Port> {
    name: String,
    settings: XantrexSettings,
    engine: ConversationEngine<P>,
    line: VarId,
}

impl<P: Port> XantrexInverter<P> {
    pub fn new(
        name: &str,
        stream: DeviceStream<P>,
        settings: XantrexSettings,
    ) -> Result<Self, MeterLinkError> {
        let script = Arc::new(Script::from_json(SCRIPT)?);
        let engine = ConversationEngine::new(stream, Arc::new(NoChecksum), script);
        let line = engine.var_id("line")?;
        Ok(XantrexInverter {
            name: name.to_string(),
            settings,
            engine,
            line,
        })
    }

    /// Run a query conversation and return the reply line.
    fn query(&mut self, conversation: &str) -> Result<String, MeterLinkError> {
        if !self.engine.run(conversation)? {
            return Err(MeterLinkError::DeviceError(format!(
                "{conversation}: no reply ({:?})",
                self.engine.state()
            )));
        }
        self.engine.var(self.line).get_string()
    }

    fn measurements(&mut self, conversation: &str, channel: &str) -> Result<Vec<Reading>, MeterLinkError> {
        let line = self.query(conversation)?;
        let pairs = parse_measurements(&line).ok_or_else(|| {
            MeterLinkError::DeviceError(format!("{conversation}: cannot parse {line:?}"))
        })?;
        Ok(pairs
            .into_iter()
            .filter_map(|(key, value)| {
                quantity(&key).map(|q| Reading::new(&self.name, channel, q, value))
            })
            .collect())
    }
}

impl<P: Port> DeviceDriver for XantrexInverter<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        self.engine.open()
    }

    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError> {
        let mut readings = self.measurements("meas_in", "in")?;
        readings.extend(self.measurements("meas_out", "out")?);

        if self.settings.lifetime_energy {
            let line = self.query("kwh_life")?;
            match parse_number(&line) {
                Some(kwh) => readings.push(Reading::new(&self.name, "lifetime", Quantity::Energy, kwh)),
                None => warn!("{}: cannot parse lifetime energy {line:?}", self.name),
            }
        }
        Ok(readings)
    }

    fn close(&mut self) {
        self.engine.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_measurements() {
        let pairs = parse_measurements("V:240.3 I:1.43 P:344 F:50.01").unwrap();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], ("V".to_string(), 240.3));
        assert_eq!(pairs[3], ("F".to_string(), 50.01));
        assert!(parse_measurements("garbage").is_none());
        assert!(parse_measurements("").is_none());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12834 "), Some(12834.0));
        assert_eq!(parse_number("12834 kWh"), None);
    }

    #[test]
    fn test_script_resolves() {
        let script = Script::from_json(SCRIPT).unwrap();
        assert_eq!(script.conversation_names().count(), 3);
    }
}
