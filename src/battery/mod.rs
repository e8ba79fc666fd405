//! # Battery Model Module
//!
//! In-memory model of a multi-segment battery pack.
//!
//! This module handles:
//! - Cell voltage and temperature storage per BMS device
//! - Segment and pack aggregates (min/max/total voltage, temperature)
//! - Global device addressing across segments
//! - Controller status history
//! - Alert classification of pack aggregates

pub mod device;
pub mod segment;
pub mod pack;
pub mod state;
pub mod status;
pub mod alerts;

pub use device::{Device, DeviceStats};
pub use pack::{Pack, PackLayout, PackStats};
pub use state::BatteryState;
pub use status::{StatusEntry, StatusTracker};
