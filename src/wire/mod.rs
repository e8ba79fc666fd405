//! # Wire Protocol Module
//!
//! Line-delimited JSON telemetry from the BMS controller.
//!
//! This module handles:
//! - Buffering raw link bytes into newline-delimited messages
//! - Decoding messages into typed telemetry records
//! - Encoding records back into wire text for replay and simulation

pub mod protocol;
pub mod line_buffer;
pub mod decoder;
pub mod encoder;

pub use decoder::decode;
pub use line_buffer::LineBuffer;
pub use protocol::{TelemetryRecord, TemperatureChannel};
