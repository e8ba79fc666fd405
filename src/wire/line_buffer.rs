//! # Line Buffer
//!
//! Accumulates raw link bytes and hands out newline-delimited messages.
//!
//! `append` runs in the link reader context, `drain_lines` in the ingestion
//! loop. Both hold a single mutex for the duration of a copy and never wait
//! for data.

use bytes::BytesMut;
use std::sync::{Mutex, MutexGuard};

use super::protocol::LINE_DELIMITER;

/// Initial capacity of the byte buffer
const INITIAL_CAPACITY: usize = 4096;

/// Longest fragment carried without a newline; beyond it the fragment is
/// released as a line of its own
pub const MAX_PARTIAL_LEN: usize = 4096;

/// Thread-safe append/drain buffer for wire text
#[derive(Debug)]
pub struct LineBuffer {
    bytes: Mutex<BytesMut>,
    carry_partial: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Buffer that returns trailing partial lines as-is on drain
    pub fn new() -> Self {
        Self::with_partial_carry(false)
    }

    /// Buffer with configurable handling of a trailing partial line
    ///
    /// With `carry_partial` set, bytes after the last newline stay buffered
    /// until the rest of the message arrives, up to [`MAX_PARTIAL_LEN`].
    /// Without it they are returned by `drain_lines` like any other line.
    pub fn with_partial_carry(carry_partial: bool) -> Self {
        Self {
            bytes: Mutex::new(BytesMut::with_capacity(INITIAL_CAPACITY)),
            carry_partial,
        }
    }

    /// Append bytes received from the link
    pub fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.lock().extend_from_slice(data);
    }

    /// Take everything buffered so far, split into lines
    ///
    /// Lines come back in arrival order with `\r` and surrounding blank
    /// lines removed. An empty buffer yields an empty vector.
    pub fn drain_lines(&self) -> Vec<String> {
        let (taken, overflow) = {
            let mut bytes = self.lock();
            if self.carry_partial {
                let complete = match bytes.iter().rposition(|&b| b == LINE_DELIMITER as u8) {
                    Some(last) => {
                        let mut complete = bytes.split_to(last + 1);
                        complete.truncate(last);
                        complete
                    }
                    None => BytesMut::new(),
                };
                let overflow = (bytes.len() > MAX_PARTIAL_LEN).then(|| bytes.split());
                (complete, overflow)
            } else {
                (bytes.split(), None)
            }
        };

        let mut lines = split_lines(&taken);
        if let Some(fragment) = overflow {
            lines.extend(split_lines(&fragment));
        }
        lines
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        // A poisoned buffer still holds valid bytes
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split(LINE_DELIMITER)
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
