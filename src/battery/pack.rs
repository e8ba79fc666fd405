//! # Battery Pack
//!
//! The full Segment -> Device -> Cell tree with global device addressing.
//!
//! Devices are numbered globally across the pack; device `n` lives in
//! segment `n / devices_per_segment` at position `n % devices_per_segment`.

use super::device::Device;
use super::segment::Segment;
use crate::error::{AddressError, BmsError, Result};
use crate::wire::protocol::TemperatureChannel;

/// Shape of the pack, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackLayout {
    pub segments: usize,
    pub devices_per_segment: usize,
    pub cells_per_device: usize,
}

/// Where a globally numbered device sits in the pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePosition {
    pub segment: usize,
    pub index: usize,
}

impl PackLayout {
    /// Total device count (segments x devices per segment)
    pub fn total_devices(&self) -> usize {
        self.segments * self.devices_per_segment
    }

    /// Resolve a global device index to its segment and in-segment index
    ///
    /// # Errors
    ///
    /// Returns `AddressError::Device` if `device` is not below `total_devices()`
    pub fn locate(&self, device: usize) -> std::result::Result<DevicePosition, AddressError> {
        let count = self.total_devices();
        if device >= count {
            return Err(AddressError::Device { index: device, count });
        }
        Ok(DevicePosition {
            segment: device / self.devices_per_segment,
            index: device % self.devices_per_segment,
        })
    }
}

/// Pack-wide aggregates; `None` where no device has reported that quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackStats {
    /// Lowest cell voltage anywhere in the pack (mV)
    pub min_voltage: Option<f64>,
    /// Highest cell voltage anywhere in the pack (mV)
    pub max_voltage: Option<f64>,
    /// Sum of all sampled cells (mV)
    pub total_voltage: Option<f64>,
    /// Hottest device temperature
    pub max_temperature: Option<f64>,
}

/// Battery pack model
#[derive(Debug)]
pub struct Pack {
    layout: PackLayout,
    segments: Vec<Segment>,
}

impl Pack {
    pub fn new(layout: PackLayout) -> Self {
        Self {
            segments: (0..layout.segments)
                .map(|_| Segment::new(layout.devices_per_segment, layout.cells_per_device))
                .collect(),
            layout,
        }
    }

    pub fn layout(&self) -> PackLayout {
        self.layout
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Store one cell voltage (mV) of a globally numbered device
    pub fn set_voltage(
        &self,
        device: usize,
        cell: usize,
        value: f64,
    ) -> std::result::Result<(), AddressError> {
        let position = self.layout.locate(device)?;
        let mut device = self.write(position)?;
        device.set_voltage(cell, value)
    }

    /// Store one temperature reading of a globally numbered device
    pub fn set_temperature(
        &self,
        device: usize,
        channel: TemperatureChannel,
        value: f64,
    ) -> std::result::Result<(), AddressError> {
        let position = self.layout.locate(device)?;
        self.write(position)?.set_temperature(channel, value);
        Ok(())
    }

    /// Consistent copy of one globally numbered device
    pub fn device(&self, device: usize) -> std::result::Result<Device, AddressError> {
        let position = self.layout.locate(device)?;
        self.segments
            .get(position.segment)
            .and_then(|s| s.read(position.index))
            .map(|d| d.clone())
            .ok_or(AddressError::Device {
                index: device,
                count: self.layout.total_devices(),
            })
    }

    fn write(
        &self,
        position: DevicePosition,
    ) -> std::result::Result<std::sync::RwLockWriteGuard<'_, Device>, AddressError> {
        self.segments
            .get(position.segment)
            .and_then(|s| s.write(position.index))
            .ok_or(AddressError::Device {
                index: position.segment * self.layout.devices_per_segment + position.index,
                count: self.layout.total_devices(),
            })
    }

    /// Lowest cell voltage in the pack, ignoring silent segments
    pub fn min_voltage(&self) -> Result<f64> {
        self.segments
            .iter()
            .filter_map(|s| s.min_voltage().ok())
            .reduce(f64::min)
            .ok_or(BmsError::NoData("pack has no sampled cells"))
    }

    /// Highest cell voltage in the pack, ignoring silent segments
    pub fn max_voltage(&self) -> Result<f64> {
        self.segments
            .iter()
            .filter_map(|s| s.max_voltage().ok())
            .reduce(f64::max)
            .ok_or(BmsError::NoData("pack has no sampled cells"))
    }

    /// Sum of segment voltages (mV), ignoring silent segments
    pub fn total_voltage(&self) -> Result<f64> {
        self.segments
            .iter()
            .filter_map(|s| s.voltage().ok())
            .reduce(|a, b| a + b)
            .ok_or(BmsError::NoData("pack has no sampled cells"))
    }

    /// Hottest device in the pack, ignoring silent segments
    pub fn max_temperature(&self) -> Result<f64> {
        self.segments
            .iter()
            .filter_map(|s| s.max_temperature().ok())
            .reduce(f64::max)
            .ok_or(BmsError::NoData("pack has no temperature reading"))
    }

    /// All pack aggregates
    ///
    /// Each aggregate reads devices one lock at a time, so values from
    /// different devices may straddle a concurrent update.
    ///
    /// # Errors
    ///
    /// Returns `NoData` only if no device anywhere has reported
    pub fn stats(&self) -> Result<PackStats> {
        let stats = PackStats {
            min_voltage: self.min_voltage().ok(),
            max_voltage: self.max_voltage().ok(),
            total_voltage: self.total_voltage().ok(),
            max_temperature: self.max_temperature().ok(),
        };

        if stats.max_voltage.is_none() && stats.max_temperature.is_none() {
            return Err(BmsError::NoData("no device has reported yet"));
        }
        Ok(stats)
    }
}
