//! # Port Discovery
//!
//! Strategies that produce candidate serial port paths for the link opener.

use tracing::debug;

/// Fallback device paths when enumeration finds nothing (Linux)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // Arduino boards with native USB
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Linux serial device name prefixes, each followed by 1-3 digits
const LINUX_PREFIXES: &[&str] = &["ttyS", "ttyUSB", "ttyACM", "ttyAMA", "rfcomm", "ttyO"];

/// macOS serial device name prefixes (after `tty.` or `cu.`)
const MAC_PREFIXES: &[&str] = &["serial", "usbserial", "usbmodem"];

/// Source of candidate port paths, tried in order
pub trait PortDiscovery {
    fn candidates(&self) -> Vec<String>;
}

/// A single configured port
#[derive(Debug, Clone)]
pub struct FixedPort(pub String);

impl PortDiscovery for FixedPort {
    fn candidates(&self) -> Vec<String> {
        vec![self.0.clone()]
    }
}

/// Operating system family, selects the port name filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Other
        }
    }

    /// Whether a port path looks like a serial device on this platform
    pub fn matches(self, port: &str) -> bool {
        let name = port.rsplit(['/', '\\']).next().unwrap_or(port);
        match self {
            Self::Linux => LINUX_PREFIXES.iter().any(|prefix| {
                name.strip_prefix(prefix).is_some_and(|digits| {
                    (1..=3).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
                })
            }),
            Self::MacOs => name
                .strip_prefix("tty.")
                .or_else(|| name.strip_prefix("cu."))
                .is_some_and(|rest| MAC_PREFIXES.iter().any(|p| rest.starts_with(p))),
            Self::Windows | Self::Other => true,
        }
    }
}

/// Enumerates system ports and keeps those matching the platform filter
#[derive(Debug, Clone, Copy)]
pub struct PlatformDiscovery {
    platform: Platform,
}

impl Default for PlatformDiscovery {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl PlatformDiscovery {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Filter and sort a list of port names
    pub fn filter<I, S>(&self, ports: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut matching: Vec<String> = ports
            .into_iter()
            .map(Into::into)
            .filter(|name| self.platform.matches(name))
            .collect();
        matching.sort();
        matching.dedup();
        matching
    }
}

impl PortDiscovery for PlatformDiscovery {
    fn candidates(&self) -> Vec<String> {
        let listed = match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                debug!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        };

        let candidates = self.filter(listed);
        if candidates.is_empty() && self.platform == Platform::Linux {
            return DEFAULT_DEVICE_PATHS.iter().map(|p| p.to_string()).collect();
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_names() {
        let linux = Platform::Linux;
        assert!(linux.matches("/dev/ttyACM0"));
        assert!(linux.matches("/dev/ttyUSB12"));
        assert!(linux.matches("/dev/rfcomm1"));
        assert!(linux.matches("ttyAMA0"));
        assert!(!linux.matches("/dev/ttyUSB"));
        assert!(!linux.matches("/dev/ttyUSB1234"));
        assert!(!linux.matches("/dev/tty0"));
        assert!(!linux.matches("/dev/null"));
    }

    #[test]
    fn test_mac_names() {
        let mac = Platform::MacOs;
        assert!(mac.matches("/dev/tty.usbmodem14101"));
        assert!(mac.matches("/dev/cu.usbserial-A50285BI"));
        assert!(!mac.matches("/dev/tty.Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_windows_accepts_everything() {
        assert!(Platform::Windows.matches("COM3"));
    }

    #[test]
    fn test_filter_sorts_and_dedups() {
        let discovery = PlatformDiscovery::new(Platform::Linux);
        let ports = discovery.filter(["/dev/ttyUSB1", "/dev/null", "/dev/ttyACM0", "/dev/ttyUSB1"]);
        assert_eq!(ports, vec!["/dev/ttyACM0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn test_fixed_port() {
        let fixed = FixedPort("/dev/ttyUSB3".to_string());
        assert_eq!(fixed.candidates(), vec!["/dev/ttyUSB3"]);
    }

    #[test]
    fn test_default_paths_order() {
        assert_eq!(DEFAULT_DEVICE_PATHS[0], "/dev/ttyACM0");
        assert_eq!(DEFAULT_DEVICE_PATHS[1], "/dev/ttyUSB0");
    }
}
