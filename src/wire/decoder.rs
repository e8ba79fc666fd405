//! # Telemetry Record Decoder
//!
//! Decodes one wire line into a [`TelemetryRecord`].
//!
//! Decoding is pure: a bad line yields [`DecodeError::Malformed`] carrying
//! the offending text and never panics.

use serde::Deserialize;

use super::protocol::*;
use crate::error::DecodeError;

/// A wire field that should be text but may arrive as a bare JSON number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireField {
    Text(String),
    Number(serde_json::Number),
}

impl WireField {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Raw shape of a wire message before type dispatch
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,

    // Older controller firmware
    #[serde(alias = "BMS")]
    device: WireField,

    value: WireField,
}

/// Decode a single wire line
///
/// # Arguments
///
/// * `line` - One JSON object, e.g. `{"type":"voltage_2","device":"5","value":"4123"}`
///
/// # Returns
///
/// * `Result<TelemetryRecord, DecodeError>` - Decoded record, or the line wrapped in `Malformed`
///
/// # Errors
///
/// Returns `Malformed` if:
/// - The line is not a JSON object with `type`, `device` and `value`
/// - `device` is not a non-negative integer
/// - `type` is not `status`, `voltage_<n>` or `temperature_<1|2>`
/// - A sample `value` is not a finite number
///
/// # Examples
///
/// ```
/// use bms_monitor::wire::decoder::decode;
/// use bms_monitor::wire::protocol::TelemetryRecord;
///
/// let record = decode(r#"{"type":"voltage_2","device":"5","value":"4123"}"#).unwrap();
/// assert_eq!(record, TelemetryRecord::VoltageSample { device: 5, cell: 2, value: 4123.0 });
/// ```
pub fn decode(line: &str) -> Result<TelemetryRecord, DecodeError> {
    let malformed = || DecodeError::Malformed(line.to_string());

    let message: WireMessage = serde_json::from_str(line.trim()).map_err(|_| malformed())?;
    let device = parse_index(&message.device.into_text()).ok_or_else(malformed)?;
    let value = message.value.into_text();

    if message.kind == STATUS_TYPE {
        return Ok(TelemetryRecord::StatusMessage { device, text: value });
    }

    if let Some(cell) = type_suffix(&message.kind, VOLTAGE_PREFIX) {
        let cell = parse_index(cell).ok_or_else(malformed)?;
        let value = parse_value(&value).ok_or_else(malformed)?;
        return Ok(TelemetryRecord::VoltageSample { device, cell, value });
    }

    if let Some(channel) = type_suffix(&message.kind, TEMPERATURE_PREFIX) {
        let channel = parse_index(channel)
            .and_then(|n| u8::try_from(n).ok())
            .and_then(TemperatureChannel::from_number)
            .ok_or_else(malformed)?;
        let value = parse_value(&value).ok_or_else(malformed)?;
        return Ok(TelemetryRecord::TemperatureSample { device, channel, value });
    }

    Err(malformed())
}

/// Suffix after `<prefix>_`, if the type tag has that shape
fn type_suffix<'a>(kind: &'a str, prefix: &str) -> Option<&'a str> {
    kind.strip_prefix(prefix)?.strip_prefix(SUFFIX_SEPARATOR)
}

/// Strict non-negative integer: ASCII digits only, no sign
fn parse_index(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_value(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
