//! # Control Module
//!
//! Operating-mode commands sent to the BMS controller.
//!
//! This module handles:
//! - Mapping operating modes to single-byte wire commands
//! - Dispatching commands with bounded retries and a fixed delay
//! - Reporting dispatch outcomes to an observer hook

pub mod mode;
pub mod dispatcher;

pub use dispatcher::{CommandDispatcher, DispatchReport};
pub use mode::OperatingMode;
