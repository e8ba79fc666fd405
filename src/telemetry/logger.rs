//! # JSONL Telemetry Logger
//!
//! Persists every decoded record as one JSON line, rotating files after a
//! fixed number of records and keeping only the newest files.
//!
//! Files are named `telemetry_<session>_<index>.jsonl`, where `<session>` is
//! the UTC start time of the logger. Files are ordered by session, then by
//! numeric index, so retention holds past any index width.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::TelemetrySink;
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::wire::protocol::TelemetryRecord;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: DateTime<Utc>,
    record: &'a TelemetryRecord,
}

#[derive(Debug)]
struct LogFile {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    records_in_file: usize,
    next_index: u32,
}

/// Rotating JSON Lines sink
#[derive(Debug)]
pub struct JsonlLogger {
    dir: PathBuf,
    session: String,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    state: Mutex<LogFile>,
}

impl JsonlLogger {
    /// Create the log directory if needed; files are opened lazily
    pub fn new(
        dir: impl AsRef<Path>,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            session: Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string(),
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            state: Mutex::new(LogFile {
                writer: None,
                path: None,
                records_in_file: 0,
                next_index: 0,
            }),
        })
    }

    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(&config.log_dir, config.max_records_per_file, config.max_files_to_keep)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log files in this directory, oldest first
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<(FileKey, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| file_key(&path).map(|key| (key, path)))
            .collect();
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    fn rotate(&self, state: &mut LogFile) -> Result<()> {
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }

        let path = self.dir.join(format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX, self.session, state.next_index, FILE_EXTENSION
        ));
        state.next_index += 1;
        state.records_in_file = 0;
        state.writer = Some(BufWriter::new(File::create(&path)?));
        info!("Telemetry log file opened: {}", path.display());
        state.path = Some(path);

        self.prune(state.path.as_deref())
    }

    /// Delete the oldest files beyond the retention limit, never `active`
    fn prune(&self, active: Option<&Path>) -> Result<()> {
        let files: Vec<PathBuf> = self
            .log_files()?
            .into_iter()
            .filter(|path| Some(path.as_path()) != active)
            .collect();
        let keep = self.max_files_to_keep - usize::from(active.is_some());
        let excess = files.len().saturating_sub(keep);
        for old in &files[..excess] {
            fs::remove_file(old)?;
            debug!("Removed old telemetry log {}", old.display());
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogFile> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sort key of a log file: session, then numeric index
type FileKey = (String, u64);

/// Parse `telemetry_<session>_<index>.jsonl`; `None` for anything else
fn file_key(path: &Path) -> Option<FileKey> {
    if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?.strip_prefix(FILE_PREFIX)?;
    let (session, index) = stem.rsplit_once('_')?;
    Some((session.to_string(), index.parse().ok()?))
}

impl TelemetrySink for JsonlLogger {
    fn record(&self, record: &TelemetryRecord) -> Result<()> {
        let mut state = self.lock();
        if state.writer.is_none() || state.records_in_file >= self.max_records_per_file {
            self.rotate(&mut state)?;
        }

        let line = serde_json::to_string(&LogLine {
            timestamp: Utc::now(),
            record,
        })?;
        if let Some(writer) = state.writer.as_mut() {
            writeln!(writer, "{}", line)?;
        }
        state.records_in_file += 1;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(writer) = self.lock().writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        let _ = TelemetrySink::flush(self);
    }
}
