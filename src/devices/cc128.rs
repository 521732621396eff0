//! # CurrentCost CC128
//!
//! The CC128 display pushes one XML message every six seconds at 57600 baud:
//!
//! ```text
//! <msg><src>CC128-v0.11</src><dsb>00089</dsb><time>13:02:39</time><tmpr>18.7</tmpr>
//! <sensor>0</sensor><id>01234</id><type>1</type>
//! <ch1><watts>00345</watts></ch1><ch2><watts>02151</watts></ch2></msg>
//! ```
//!
//! Nothing is sent to the device. A polling cycle waits for the next
//! `<msg>`, collects everything up to `</msg>` and parses it with `nom`.
//! History messages (`<hist>`) are recognised and ignored.

use super::{DeviceDriver, Quantity, Reading};
use crate::conversation::{ConversationEngine, Script};
use crate::error::MeterLinkError;
use crate::strategy::NoChecksum;
use crate::transport::{DeviceStream, Port};
use crate::variable::VarId;
use log::{debug, trace};
use nom::bytes::complete::{tag, take_until};
use nom::sequence::{delimited, preceded};
use nom::IResult;
use serde::Deserialize;
use std::sync::Arc;

const SCRIPT: &str = r#"{
    "name": "cc128",
    "variables": [
        { "name": "body", "width": 0, "max_width": 2048, "encoding": { "text": { "padding": "none" } } }
    ],
    "conversations": [
        { "name": "read_message", "steps": [
            { "step": "receive", "pattern": { "max_skip": 4096 }, "timeout_ms": 7000,
              "elements": [ { "ascii": "<msg>" }, { "until": "body", "terminator": { "ascii": "</msg>" }, "max_len": 2048 } ] }
        ] }
    ]
}"#;

const CHANNELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct Cc128Settings {
    /// Only report this sensor (0 is the whole-house clamp); all when unset.
    #[serde(default)]
    pub sensor: Option<u8>,
}

/// Fields of one real-time message.
#[derive(Debug, Clone, PartialEq)]
pub struct Cc128Message {
    pub sensor: u8,
    pub temperature: Option<f64>,
    pub watts: Vec<(usize, f64)>,
}

/// Text between `<name>` and `</name>`, anywhere in `input`.
fn element<'a>(input: &'a str, name: &str) -> IResult<&'a str, &'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let mut parser = preceded(
        take_until(open.as_str()),
        delimited(tag(open.as_str()), take_until(close.as_str()), tag(close.as_str())),
    );
    parser(input)
}

fn field<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    element(input, name).ok().map(|(_, value)| value.trim())
}

/// Parse the inside of a `<msg>` element; `None` for history or malformed messages.
pub fn parse_message(body: &str) -> Option<Cc128Message> {
    if field(body, "hist").is_some() {
        return None;
    }

    let sensor = field(body, "sensor").and_then(|s| s.parse().ok()).unwrap_or(0);
    let temperature = field(body, "tmpr")
        .and_then(|t| t.parse::<f64>().ok())
        .or_else(|| {
            field(body, "tmprF")
                .and_then(|t| t.parse::<f64>().ok())
                .map(|f| (f - 32.0) * 5.0 / 9.0)
        });

    let watts: Vec<(usize, f64)> = (1..=CHANNELS)
        .filter_map(|ch| {
            let channel = field(body, &format!("ch{ch}"))?;
            let watts = field(channel, "watts")?.parse::<f64>().ok()?;
            Some((ch, watts))
        })
        .collect();

    if watts.is_empty() {
        return None;
    }
    Some(Cc128Message {
        sensor,
        temperature,
        watts,
    })
}

pub struct Cc128Meter<P: Port> {
    name: String,
    settings: Cc128Settings,
    engine: ConversationEngine<P>,
    body: VarId,
}

impl<P: Port> Cc128Meter<P> {
    pub fn new(
        name: &str,
        stream: DeviceStream<P>,
        settings: Cc128Settings,
    ) -> Result<Self, MeterLinkError> {
        let script = Arc::new(Script::from_json(SCRIPT)?);
        let engine = ConversationEngine::new(stream, Arc::new(NoChecksum), script);
        let body = engine.var_id("body")?;
        Ok(Cc128Meter {
            name: name.to_string(),
            settings,
            engine,
            body,
        })
    }

    fn readings(&self, message: &Cc128Message) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(message.watts.len() + 1);
        if let Some(t) = message.temperature {
            readings.push(Reading::new(&self.name, "display", Quantity::Temperature, t));
        }
        for &(ch, watts) in &message.watts {
            let channel = format!("sensor{}/ch{ch}", message.sensor);
            readings.push(Reading::new(&self.name, &channel, Quantity::Power, watts));
        }
        readings
    }
}

impl<P: Port> DeviceDriver for Cc128Meter<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), MeterLinkError> {
        self.engine.open()
    }

    fn poll(&mut self) -> Result<Vec<Reading>, MeterLinkError> {
        if !self.engine.run("read_message")? {
            debug!("{}: no message ({:?})", self.name, self.engine.state());
            return Ok(Vec::new());
        }

        let body = self.engine.var(self.body).get_string()?;
        let message = match parse_message(&body) {
            Some(message) => message,
            None => {
                trace!("{}: ignoring message {body:?}", self.name);
                return Ok(Vec::new());
            }
        };

        if self.settings.sensor.is_some_and(|s| s != message.sensor) {
            return Ok(Vec::new());
        }
        Ok(self.readings(&message))
    }

    fn close(&mut self) {
        self.engine.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REALTIME: &str = "<src>CC128-v0.11</src><dsb>00089</dsb><time>13:02:39</time>\
        <tmpr>18.7</tmpr><sensor>1</sensor><id>01234</id><type>1</type>\
        <ch1><watts>00345</watts></ch1><ch2><watts>02151</watts></ch2>";

    #[test]
    fn test_parse_realtime() {
        let msg = parse_message(REALTIME).unwrap();
        assert_eq!(msg.sensor, 1);
        assert_eq!(msg.temperature, Some(18.7));
        assert_eq!(msg.watts, vec![(1, 345.0), (2, 2151.0)]);
    }

    #[test]
    fn test_parse_fahrenheit() {
        let msg = parse_message("<tmprF>68.0</tmprF><ch1><watts>1</watts></ch1>").unwrap();
        assert!((msg.temperature.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_ignored() {
        assert!(parse_message("<src>CC128</src><hist><dsw>00032</dsw></hist>").is_none());
    }

    #[test]
    fn test_element_parser() {
        assert_eq!(
            element("<a>1</a><b> 2 </b>", "b"),
            Ok(("", " 2 "))
        );
        assert_eq!(
            element("noise<ch1><watts>7</watts></ch1>tail", "ch1"),
            Ok(("tail", "<watts>7</watts>"))
        );
        assert!(element("<a>1</a>", "b").is_err());
        assert!(element("<b>unterminated", "b").is_err());
    }
}
