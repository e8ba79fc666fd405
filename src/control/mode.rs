//! # Operating Modes
//!
//! The four controller operating modes and their one-byte wire commands.
//! Any mode may follow any other; `Normal` is selected at startup.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Normal,
    Balance,
    Sleep,
    Debug,
}

impl OperatingMode {
    /// Every mode, in selector order
    pub const ALL: [OperatingMode; 4] = [Self::Normal, Self::Balance, Self::Sleep, Self::Debug];

    /// Single ASCII character sent to the controller (no terminator)
    pub fn command(self) -> u8 {
        match self {
            Self::Normal => b'N',
            Self::Balance => b'B',
            Self::Sleep => b'S',
            Self::Debug => b'D',
        }
    }

    /// Mode for a wire command character, case-insensitive
    pub fn from_command(command: char) -> Option<Self> {
        if !command.is_ascii() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|mode| mode.command() == command.to_ascii_uppercase() as u8)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Balance => "Balance cells",
            Self::Sleep => "Sleep",
            Self::Debug => "Debug output",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Balance => "balance",
            Self::Sleep => "sleep",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    /// Accepts a mode name (`balance`) or its command letter (`B`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(mode) = Self::from_command(c) {
                return Ok(mode);
            }
        }

        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operating mode '{}'", s))
    }
}
