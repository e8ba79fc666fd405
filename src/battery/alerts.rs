//! # Alert Thresholds
//!
//! Classifies pack aggregates against configured bands. A value at or
//! beyond a bound counts as out of band.

use super::pack::PackStats;

/// Where a value falls relative to its band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Normal,
    High,
}

/// Inclusive-exclusive band: `min < value < max` is normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn classify(&self, value: f64) -> Level {
        if value >= self.max {
            Level::High
        } else if value <= self.min {
            Level::Low
        } else {
            Level::Normal
        }
    }
}

/// Aggregate an alert refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    MinCellVoltage,
    MaxCellVoltage,
    PackVoltage,
    MaxTemperature,
}

/// An out-of-band aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alert {
    pub quantity: Quantity,
    pub level: Level,
    pub value: f64,
}

/// Bands for every monitored aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Cell voltage band (mV)
    pub cell_voltage: Band,
    /// Total pack voltage band (V)
    pub pack_voltage: Band,
    /// Device temperature band (degrees)
    pub temperature: Band,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cell_voltage: Band::new(3000.0, 4200.0),
            pack_voltage: Band::new(426.0, 596.4),
            temperature: Band::new(0.0, 60.0),
        }
    }
}

impl Thresholds {
    /// Out-of-band aggregates in `stats`; missing aggregates are skipped
    pub fn check(&self, stats: &PackStats) -> Vec<Alert> {
        let candidates = [
            (Quantity::MinCellVoltage, stats.min_voltage, self.cell_voltage, 1.0),
            (Quantity::MaxCellVoltage, stats.max_voltage, self.cell_voltage, 1.0),
            // total is accumulated in mV, band is in V
            (Quantity::PackVoltage, stats.total_voltage, self.pack_voltage, 1000.0),
            (Quantity::MaxTemperature, stats.max_temperature, self.temperature, 1.0),
        ];

        candidates
            .into_iter()
            .filter_map(|(quantity, value, band, divisor)| {
                let value = value? / divisor;
                match band.classify(value) {
                    Level::Normal => None,
                    level => Some(Alert { quantity, level, value }),
                }
            })
            .collect()
    }
}
