//! # Battery State
//!
//! Shared facade over the [`Pack`] model. The ingestion loop is the only
//! writer; the reporter, loggers and any UI poll the read accessors.
//!
//! ## Consistency
//!
//! `snapshot` copies one device under its lock, so its fields always belong
//! to the same instant. `overall` reduces across devices one lock at a time:
//! a concurrent update may be visible for some devices and not yet for
//! others. Pack aggregates are advisory telemetry and accept that.

use super::device::DeviceStats;
use super::pack::{Pack, PackLayout, PackStats};
use crate::error::{AddressError, Result};
use crate::wire::protocol::{TelemetryRecord, TemperatureChannel};

/// Thread-safe battery state shared between the loop and readers
#[derive(Debug)]
pub struct BatteryState {
    pack: Pack,
}

impl BatteryState {
    pub fn new(layout: PackLayout) -> Self {
        Self {
            pack: Pack::new(layout),
        }
    }

    pub fn layout(&self) -> PackLayout {
        self.pack.layout()
    }

    /// Underlying pack model, for per-segment queries
    pub fn pack(&self) -> &Pack {
        &self.pack
    }

    /// Record a cell voltage (mV)
    ///
    /// # Errors
    ///
    /// Returns `AddressError` if `device` or `cell` is outside the layout;
    /// the sample is dropped.
    pub fn apply_voltage(
        &self,
        device: usize,
        cell: usize,
        value: f64,
    ) -> std::result::Result<(), AddressError> {
        self.pack.set_voltage(device, cell, value)
    }

    /// Record a temperature reading
    ///
    /// # Errors
    ///
    /// Returns `AddressError` if `device` is outside the layout; the sample
    /// is dropped.
    pub fn apply_temperature(
        &self,
        device: usize,
        channel: TemperatureChannel,
        value: f64,
    ) -> std::result::Result<(), AddressError> {
        self.pack.set_temperature(device, channel, value)
    }

    /// Apply a voltage or temperature record
    ///
    /// Returns `Ok(false)` for records that carry no sample (status).
    pub fn apply(&self, record: &TelemetryRecord) -> std::result::Result<bool, AddressError> {
        match *record {
            TelemetryRecord::VoltageSample { device, cell, value } => {
                self.apply_voltage(device, cell, value).map(|_| true)
            }
            TelemetryRecord::TemperatureSample { device, channel, value } => {
                self.apply_temperature(device, channel, value).map(|_| true)
            }
            TelemetryRecord::StatusMessage { .. } => Ok(false),
        }
    }

    /// Point-in-time statistics of one device
    ///
    /// # Errors
    ///
    /// - `Address` if `device` is outside the layout
    /// - `NoData` if the device has not reported yet
    pub fn snapshot(&self, device: usize) -> Result<DeviceStats> {
        self.pack.device(device)?.stats()
    }

    /// Pack-wide aggregates
    ///
    /// # Errors
    ///
    /// Returns `NoData` only if no device has reported anything
    pub fn overall(&self) -> Result<PackStats> {
        self.pack.stats()
    }
}
