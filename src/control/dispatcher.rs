//! # Command Dispatcher
//!
//! Sends operating-mode commands to the controller with bounded retries.
//!
//! `set_mode` runs on the caller's task and never touches the ingestion
//! loop; the only shared resource is the link's own write lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use super::mode::OperatingMode;
use crate::config::CommandConfig;
use crate::error::{BmsError, Result};
use crate::serial::Link;

/// Outcome of one `set_mode` call, passed to the dispatch hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub mode: OperatingMode,
    pub attempts: u32,
    pub delivered: bool,
}

/// Observer notified after every `set_mode` call
pub type DispatchHook = Box<dyn Fn(&DispatchReport) + Send + Sync>;

/// Lifetime totals of a dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub write_attempts: u64,
    pub commands_delivered: u64,
    pub commands_failed: u64,
}

/// Maps operating modes to wire commands and writes them to the link
pub struct CommandDispatcher {
    link: Arc<dyn Link>,
    max_retries: u32,
    retry_delay: Duration,
    selected: Mutex<OperatingMode>,
    write_attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    hook: Option<DispatchHook>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("selected", &self.selected_mode())
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    /// Dispatcher making at most `max_retries` write attempts per command
    ///
    /// A `max_retries` of 0 is treated as 1: every command is tried once.
    pub fn new(link: Arc<dyn Link>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            link,
            max_retries: max_retries.max(1),
            retry_delay,
            selected: Mutex::new(OperatingMode::default()),
            write_attempts: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            hook: None,
        }
    }

    pub fn from_config(link: Arc<dyn Link>, config: &CommandConfig) -> Self {
        Self::new(link, config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    /// Attach an observer for dispatch outcomes
    pub fn with_hook(mut self, hook: DispatchHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Mode of the last successfully delivered command (`Normal` at startup)
    pub fn selected_mode(&self) -> OperatingMode {
        *self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            write_attempts: self.write_attempts.load(Ordering::Relaxed),
            commands_delivered: self.delivered.load(Ordering::Relaxed),
            commands_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Send the command for `mode`, retrying failed writes
    ///
    /// Attempts are separated by the configured delay.
    ///
    /// # Returns
    ///
    /// * `Result<u32>` - Number of attempts the successful write took
    ///
    /// # Errors
    ///
    /// Returns `CommandFailed` once every attempt has failed
    pub async fn set_mode(&self, mode: OperatingMode) -> Result<u32> {
        let command = [mode.command()];

        for attempt in 1..=self.max_retries {
            self.write_attempts.fetch_add(1, Ordering::Relaxed);

            match self.link.write(&command).await {
                Ok(()) => {
                    *self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    info!("Operating mode set to {} (attempt {})", mode, attempt);
                    self.notify(mode, attempt, true);
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(
                        "Sending {} command failed (attempt {}/{}): {}",
                        mode, attempt, self.max_retries, e
                    );
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!("Max # of attempts reached, giving up on {} command", mode);
        self.notify(mode, self.max_retries, false);
        Err(BmsError::CommandFailed {
            mode,
            attempts: self.max_retries,
        })
    }

    fn notify(&self, mode: OperatingMode, attempts: u32, delivered: bool) {
        if let Some(hook) = &self.hook {
            hook(&DispatchReport { mode, attempts, delivered });
        }
    }
}
