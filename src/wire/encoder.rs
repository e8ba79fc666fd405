//! # Telemetry Record Encoder
//!
//! Renders records back into the controller's wire format. Used to replay
//! captured sessions and to simulate controller output.

use serde::Serialize;

use super::protocol::*;

#[derive(Serialize)]
struct WireMessageRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    device: String,
    value: String,
}

/// Encode a record as one wire line (without the trailing newline)
///
/// # Examples
///
/// ```
/// use bms_monitor::wire::encoder::encode;
/// use bms_monitor::wire::protocol::TelemetryRecord;
///
/// let line = encode(&TelemetryRecord::VoltageSample { device: 5, cell: 2, value: 4123.0 });
/// assert_eq!(line, r#"{"type":"voltage_2","device":"5","value":"4123"}"#);
/// ```
pub fn encode(record: &TelemetryRecord) -> String {
    let kind = record.type_tag();
    let value = match record {
        TelemetryRecord::VoltageSample { value, .. }
        | TelemetryRecord::TemperatureSample { value, .. } => value.to_string(),
        TelemetryRecord::StatusMessage { text, .. } => text.clone(),
    };

    let message = WireMessageRef {
        kind: &kind,
        device: record.device().to_string(),
        value,
    };

    // Only string fields, serialization cannot fail
    serde_json::to_string(&message).unwrap_or_default()
}

/// Encode a batch of records as newline-terminated wire text
pub fn encode_lines<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a TelemetryRecord>,
{
    let mut out = String::new();
    for record in records {
        out.push_str(&encode(record));
        out.push(LINE_DELIMITER);
    }
    out
}
