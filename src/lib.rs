//! # BMS Monitor Library
//!
//! Monitor a segmented lithium battery pack through its BMS controller over
//! a serial link.
//!
//! Telemetry arrives as newline-delimited JSON records. They are buffered,
//! decoded on a fixed interval and applied to a Pack → Segment → Device →
//! Cell model that concurrent readers can query. Operating-mode commands go
//! back to the controller as single bytes with bounded retries.

pub mod config;
pub mod error;
pub mod wire;
pub mod battery;
pub mod serial;
pub mod control;
pub mod ingest;
pub mod telemetry;
