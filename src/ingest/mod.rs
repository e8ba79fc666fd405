//! # Ingestion Module
//!
//! Orchestrates telemetry intake from the line buffer into the battery
//! state model.

pub mod ingestion_loop;

pub use ingestion_loop::{IngestionCounters, IngestionLoop, IterationReport, LoopState};
