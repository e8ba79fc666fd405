//! # Segment
//!
//! A series-wired group of BMS devices. Each device sits behind its own
//! `RwLock` so readers see a consistent device while the ingestion loop
//! updates another one.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::device::Device;
use crate::error::{BmsError, Result};

/// Fixed-size array of devices
#[derive(Debug)]
pub struct Segment {
    devices: Vec<RwLock<Device>>,
}

impl Segment {
    /// Segment of `devices` devices with `cells_per_device` cells each
    pub fn new(devices: usize, cells_per_device: usize) -> Self {
        Self {
            devices: (0..devices)
                .map(|_| RwLock::new(Device::new(cells_per_device)))
                .collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Read access to one device, `None` if `index` is out of range
    pub fn read(&self, index: usize) -> Option<RwLockReadGuard<'_, Device>> {
        self.devices
            .get(index)
            .map(|lock| lock.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Write access to one device, `None` if `index` is out of range
    pub fn write(&self, index: usize) -> Option<RwLockWriteGuard<'_, Device>> {
        self.devices
            .get(index)
            .map(|lock| lock.write().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Copy of every device, each taken under its own read lock
    pub fn devices(&self) -> Vec<Device> {
        (0..self.devices.len())
            .filter_map(|i| self.read(i).map(|device| device.clone()))
            .collect()
    }

    /// Sum of device voltages (mV)
    ///
    /// # Errors
    ///
    /// Returns `NoData` if no device has a sampled cell
    pub fn voltage(&self) -> Result<f64> {
        let sums: Vec<f64> = self
            .devices()
            .iter()
            .filter(|d| d.has_voltage())
            .map(Device::sum_voltage)
            .collect();
        if sums.is_empty() {
            return Err(BmsError::NoData("segment has no sampled cells"));
        }
        Ok(sums.iter().sum())
    }

    /// Average device temperature over devices that reported one
    ///
    /// # Errors
    ///
    /// Returns `NoData` if no device has a temperature reading
    pub fn temperature(&self) -> Result<f64> {
        let temperatures: Vec<f64> = self
            .devices()
            .iter()
            .filter_map(|d| d.temperature().ok())
            .collect();
        if temperatures.is_empty() {
            return Err(BmsError::NoData("segment has no temperature reading"));
        }
        Ok(temperatures.iter().sum::<f64>() / temperatures.len() as f64)
    }

    /// Lowest sampled cell voltage in the segment
    pub fn min_voltage(&self) -> Result<f64> {
        self.devices()
            .iter()
            .filter_map(|d| d.min_voltage().ok())
            .reduce(f64::min)
            .ok_or(BmsError::NoData("segment has no sampled cells"))
    }

    /// Highest sampled cell voltage in the segment
    pub fn max_voltage(&self) -> Result<f64> {
        self.devices()
            .iter()
            .filter_map(|d| d.max_voltage().ok())
            .reduce(f64::max)
            .ok_or(BmsError::NoData("segment has no sampled cells"))
    }

    /// Highest device temperature in the segment
    pub fn max_temperature(&self) -> Result<f64> {
        self.devices()
            .iter()
            .filter_map(|d| d.temperature().ok())
            .reduce(f64::max)
            .ok_or(BmsError::NoData("segment has no temperature reading"))
    }
}
