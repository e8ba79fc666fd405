//! # BMS Device
//!
//! One monitoring chip: a fixed row of cell voltage slots plus two
//! temperature channels.
//!
//! Slots are `Option<f64>`; `None` means "never sampled". A voltage reading
//! that is not strictly positive clears its slot, so a controller reporting
//! 0 mV for an unpopulated cell does not drag the minimum down.

use crate::error::{AddressError, BmsError, Result};
use crate::wire::protocol::TemperatureChannel;

/// Cells per device on the reference hardware
pub const DEFAULT_CELLS_PER_DEVICE: usize = 6;

/// Point-in-time statistics of a single device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStats {
    /// Lowest sampled cell voltage (mV)
    pub min: Option<f64>,
    /// Highest sampled cell voltage (mV)
    pub max: Option<f64>,
    /// Mean over sampled cells (mV)
    pub avg: Option<f64>,
    /// Sum over sampled cells (mV)
    pub sum: f64,
    pub temperature1: Option<f64>,
    pub temperature2: Option<f64>,
    /// Combined device temperature, see [`Device::temperature`]
    pub temperature: Option<f64>,
}

/// Voltage and temperature state of one BMS device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    cells: Vec<Option<f64>>,
    temperature1: Option<f64>,
    temperature2: Option<f64>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DEFAULT_CELLS_PER_DEVICE)
    }
}

impl Device {
    /// Device with `cells` unsampled voltage slots
    pub fn new(cells: usize) -> Self {
        Self {
            cells: vec![None; cells],
            temperature1: None,
            temperature2: None,
        }
    }

    /// Number of cell slots
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Store a cell voltage (mV)
    ///
    /// # Errors
    ///
    /// Returns `AddressError::Cell` if `cell` is not a valid slot index
    pub fn set_voltage(&mut self, cell: usize, value: f64) -> std::result::Result<(), AddressError> {
        let count = self.cells.len();
        let slot = self
            .cells
            .get_mut(cell)
            .ok_or(AddressError::Cell { index: cell, count })?;
        *slot = (value.is_finite() && value > 0.0).then_some(value);
        Ok(())
    }

    /// Last sampled voltage of a cell
    ///
    /// # Errors
    ///
    /// Returns `AddressError::Cell` if `cell` is not a valid slot index
    pub fn voltage(&self, cell: usize) -> std::result::Result<Option<f64>, AddressError> {
        self.cells.get(cell).copied().ok_or(AddressError::Cell {
            index: cell,
            count: self.cells.len(),
        })
    }

    /// Store a temperature reading for one channel
    pub fn set_temperature(&mut self, channel: TemperatureChannel, value: f64) {
        match channel {
            TemperatureChannel::One => self.temperature1 = Some(value),
            TemperatureChannel::Two => self.temperature2 = Some(value),
        }
    }

    pub fn temperature1(&self) -> Option<f64> {
        self.temperature1
    }

    pub fn temperature2(&self) -> Option<f64> {
        self.temperature2
    }

    fn sampled(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// Whether any cell slot holds a sample
    pub fn has_voltage(&self) -> bool {
        self.cells.iter().any(Option::is_some)
    }

    /// Whether either temperature channel has reported
    pub fn has_temperature(&self) -> bool {
        self.temperature1.is_some() || self.temperature2.is_some()
    }

    /// Whether the device has reported anything at all
    pub fn has_data(&self) -> bool {
        self.has_voltage() || self.has_temperature()
    }

    /// Sum of sampled cell voltages (0 when nothing was sampled)
    pub fn sum_voltage(&self) -> f64 {
        self.sampled().sum()
    }

    pub fn min_voltage(&self) -> Result<f64> {
        self.sampled()
            .reduce(f64::min)
            .ok_or(BmsError::NoData("device has no sampled cells"))
    }

    pub fn max_voltage(&self) -> Result<f64> {
        self.sampled()
            .reduce(f64::max)
            .ok_or(BmsError::NoData("device has no sampled cells"))
    }

    pub fn avg_voltage(&self) -> Result<f64> {
        let (sum, samples) = self
            .sampled()
            .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
        if samples == 0 {
            return Err(BmsError::NoData("device has no sampled cells"));
        }
        Ok(sum / samples as f64)
    }

    /// Device temperature: the higher of the reported channels
    ///
    /// With only one channel reported, that channel's value.
    pub fn temperature(&self) -> Result<f64> {
        match (self.temperature1, self.temperature2) {
            (Some(t1), Some(t2)) => Ok(t1.max(t2)),
            (Some(t), None) | (None, Some(t)) => Ok(t),
            (None, None) => Err(BmsError::NoData("device has no temperature reading")),
        }
    }

    /// Statistics snapshot
    ///
    /// # Errors
    ///
    /// Returns `NoData` if the device never reported a voltage or temperature
    pub fn stats(&self) -> Result<DeviceStats> {
        if !self.has_data() {
            return Err(BmsError::NoData("device has not reported yet"));
        }

        Ok(DeviceStats {
            min: self.min_voltage().ok(),
            max: self.max_voltage().ok(),
            avg: self.avg_voltage().ok(),
            sum: self.sum_voltage(),
            temperature1: self.temperature1,
            temperature2: self.temperature2,
            temperature: self.temperature().ok(),
        })
    }
}
