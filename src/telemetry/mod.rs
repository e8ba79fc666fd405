//! # Telemetry Module
//!
//! Persistent logging of decoded telemetry records.
//!
//! This module handles:
//! - The sink interface the ingestion loop feeds once per decoded record
//! - Formatting records as JSONL (JSON Lines)
//! - Writing to rotating log files
//! - Retaining only the newest N files

pub mod logger;

pub use logger::JsonlLogger;

use crate::error::Result;
use crate::wire::protocol::TelemetryRecord;

/// Receiver of every successfully decoded record
///
/// Implementations own their file format and rotation. Errors are logged by
/// the caller and never interrupt ingestion.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &TelemetryRecord) -> Result<()>;

    /// Push buffered output to storage; called once per ingestion cycle
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
