//! # Error Types
//!
//! Custom error types for BMS Monitor using `thiserror`.

use thiserror::Error;

use crate::control::OperatingMode;

/// Errors produced while turning one wire line into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Bad JSON, missing keys, unknown type or non-numeric fields
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A device or cell index outside the pack layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("device {index} out of range (pack has {count} devices)")]
    Device { index: usize, count: usize },

    #[error("cell {index} out of range (devices have {count} cells)")]
    Cell { index: usize, count: usize },
}

/// Main error type for BMS Monitor
#[derive(Debug, Error)]
pub enum BmsError {
    /// Wire decoding errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Pack addressing errors
    #[error("address error: {0}")]
    Address(#[from] AddressError),

    /// Aggregate requested before any sample arrived
    #[error("no data: {0}")]
    NoData(&'static str),

    /// Operating-mode command not delivered after all retries
    #[error("command {mode} failed after {attempts} attempts")]
    CommandFailed { mode: OperatingMode, attempts: u32 },

    /// Serial port errors
    #[error("serial error: {0}")]
    Serial(String),

    /// No usable serial port among the candidates
    #[error("no serial port could be opened (tried: {0})")]
    SerialPortNotFound(String),

    /// Lifecycle transition not allowed from the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for BMS Monitor
pub type Result<T> = std::result::Result<T, BmsError>;
