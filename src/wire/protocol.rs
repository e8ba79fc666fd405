//! # Wire Protocol Constants and Types
//!
//! Core definitions for the line-delimited JSON telemetry stream emitted by
//! the BMS controller.

use serde::Serialize;

/// Line delimiter between wire messages
pub const LINE_DELIMITER: char = '\n';

/// Type tag of status messages
pub const STATUS_TYPE: &str = "status";

/// Prefix of cell voltage type tags (`voltage_<cell>`)
pub const VOLTAGE_PREFIX: &str = "voltage";

/// Prefix of temperature type tags (`temperature_<1|2>`)
pub const TEMPERATURE_PREFIX: &str = "temperature";

/// Separator between a type prefix and its numeric suffix
pub const SUFFIX_SEPARATOR: char = '_';

/// One of the two temperature sensors wired to every BMS device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TemperatureChannel {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl TemperatureChannel {
    /// Channel from its wire number (1 or 2)
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }

    /// Wire number of the channel
    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// A decoded telemetry message
///
/// Built only by [`decode`](super::decoder::decode); consumed once by the
/// ingestion loop and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// Cell voltage in millivolts
    VoltageSample { device: usize, cell: usize, value: f64 },

    /// Temperature reading in degrees
    TemperatureSample {
        device: usize,
        channel: TemperatureChannel,
        value: f64,
    },

    /// Free-form controller status text
    StatusMessage { device: usize, text: String },
}

impl TelemetryRecord {
    /// Global index of the device that sent the message
    pub fn device(&self) -> usize {
        match self {
            Self::VoltageSample { device, .. }
            | Self::TemperatureSample { device, .. }
            | Self::StatusMessage { device, .. } => *device,
        }
    }

    /// Wire type tag for this record (`voltage_3`, `temperature_1`, `status`)
    pub fn type_tag(&self) -> String {
        match self {
            Self::VoltageSample { cell, .. } => {
                format!("{}{}{}", VOLTAGE_PREFIX, SUFFIX_SEPARATOR, cell)
            }
            Self::TemperatureSample { channel, .. } => {
                format!("{}{}{}", TEMPERATURE_PREFIX, SUFFIX_SEPARATOR, channel.number())
            }
            Self::StatusMessage { .. } => STATUS_TYPE.to_string(),
        }
    }
}
