//! # BMS Monitor
//!
//! Monitor a lithium battery pack through its BMS controller.
//!
//! Usage: `bms-monitor [config.toml]`
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (argument, `config/default.toml`, or defaults)
//!    - Set up logging to stderr and optionally to daily log files
//!    - Open the serial link and start the ingestion loop
//!    - Send the configured initial operating mode
//!
//! 2. **Running**
//!    - Report pack aggregates, alerts and status changes periodically
//!    - Accept mode commands on stdin (`N`, `B`, `S`, `D` or a mode name)
//!
//! 3. **Graceful Shutdown** on Ctrl+C
//!    - Stop ingestion, close the link, log totals

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use bms_monitor::battery::alerts::Thresholds;
use bms_monitor::battery::{BatteryState, StatusTracker};
use bms_monitor::config::{Config, LoggingConfig};
use bms_monitor::control::{CommandDispatcher, OperatingMode};
use bms_monitor::ingest::IngestionLoop;
use bms_monitor::serial::{Link, SerialLink};
use bms_monitor::telemetry::JsonlLogger;
use bms_monitor::wire::LineBuffer;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rolling diagnostic logs
const LOG_FILE_PREFIX: &str = "bms-monitor.log";

/// Console lines queued between the stdin thread and the console task
const CONSOLE_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config.logging);

    info!("BMS Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let layout = config.pack.layout();
    let buffer = Arc::new(LineBuffer::with_partial_carry(config.ingestion.carry_partial_lines));
    let state = Arc::new(BatteryState::new(layout));
    let status = Arc::new(StatusTracker::new());

    let discovery = config.serial.discovery();
    let link = Arc::new(
        SerialLink::open(&config.serial, discovery.as_ref(), Arc::clone(&buffer))
            .context("no BMS controller found")?,
    );
    info!("BMS serial port opened at: {}", link.device_path());
    info!(
        "Pack layout: {} segments x {} devices x {} cells",
        layout.segments, layout.devices_per_segment, layout.cells_per_device
    );

    let mut ingestion = IngestionLoop::new(
        buffer,
        Arc::clone(&state),
        Arc::clone(&status),
        config.ingestion.poll_interval(),
    );
    if config.telemetry.enabled {
        let logger = JsonlLogger::from_config(&config.telemetry)?;
        info!("Recording telemetry to {}", logger.dir().display());
        ingestion = ingestion.with_sink(Arc::new(logger));
    }
    let ingestion = Arc::new(ingestion);
    let ingestion_task = ingestion.start()?;

    let command_link: Arc<dyn Link> = link.clone();
    let dispatcher = Arc::new(CommandDispatcher::from_config(command_link, &config.command));
    if let Err(e) = dispatcher.set_mode(config.command.initial_mode).await {
        warn!("Initial mode not applied: {}", e);
    }

    let reporter = tokio::spawn(report(
        Arc::clone(&state),
        Arc::clone(&status),
        config.alerts.thresholds(),
        config.logging.report_interval(),
    ));
    let input = read_lines(std::io::BufReader::new(std::io::stdin()));
    let console = tokio::spawn(console(Arc::clone(&dispatcher), input));

    info!("Enter a mode to switch:");
    for mode in OperatingMode::ALL {
        info!("  {} / {:<7} {}", mode.command() as char, mode.to_string(), mode.description());
    }
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    ingestion.stop();
    reporter.abort();
    console.abort();
    if let Err(e) = ingestion_task.await {
        warn!("Ingestion task ended abnormally: {}", e);
    }
    link.close().await;

    let totals = ingestion.counters();
    info!(
        "Processed {} lines: {} samples applied, {} statuses, {} malformed, {} address errors",
        totals.lines, totals.records_applied, totals.statuses, totals.malformed, totals.address_errors
    );
    let commands = dispatcher.counters();
    info!(
        "Commands: {} delivered, {} failed, {} write attempts",
        commands.commands_delivered, commands.commands_failed, commands.write_attempts
    );

    Ok(())
}

/// Explicit path, else the default file if present, else built-in defaults
fn load_config(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(&path).with_context(|| format!("failed to load config from {}", path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("failed to load config from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Install the tracing subscriber; keep the guard alive to flush file logs
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Periodically log pack aggregates, out-of-band alerts and new statuses
async fn report(
    state: Arc<BatteryState>,
    status: Arc<StatusTracker>,
    thresholds: Thresholds,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    let mut last_status = 0;

    loop {
        ticker.tick().await;

        match state.overall() {
            Ok(stats) => {
                info!(
                    "Pack: {} total, cells {}..{}, max temp {}",
                    reading(stats.total_voltage.map(|mv| mv / 1000.0), "V"),
                    reading(stats.min_voltage, "mV"),
                    reading(stats.max_voltage, "mV"),
                    reading(stats.max_temperature, "°C"),
                );
                for alert in thresholds.check(&stats) {
                    warn!("{:?} is {:?}: {:.1}", alert.quantity, alert.level, alert.value);
                }
            }
            Err(_) => debug!("No telemetry received yet"),
        }

        if let Some(entry) = status.since(last_status) {
            last_status = entry.sequence;
            info!("Controller status (device {}): {}", entry.device, entry.text);
        }
    }
}

/// Forward lines from a blocking reader over a channel
///
/// The reader runs on its own thread so a pending read never holds up
/// runtime shutdown. The thread ends at EOF, on a read error, or once the
/// receiver is dropped and the next line arrives.
fn read_lines<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CONSOLE_QUEUE);
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Apply mode commands until the input closes
async fn console(dispatcher: Arc<CommandDispatcher>, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input.parse::<OperatingMode>() {
            Ok(mode) => {
                if let Err(e) = dispatcher.set_mode(mode).await {
                    warn!("{}", e);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
    debug!("Console input closed");
}

fn reading(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1} {}", v, unit),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::{self, Cursor, Read};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Link that keeps every byte written to it
    #[derive(Default)]
    struct CapturedLink(Mutex<Vec<u8>>);

    #[async_trait]
    impl Link for CapturedLink {
        async fn write(&self, data: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    /// Reader that blocks until its sender is dropped, then reports EOF
    struct StalledInput(std::sync::mpsc::Receiver<()>);

    impl Read for StalledInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_console_applies_modes_until_input_closes() {
        let link = Arc::new(CapturedLink::default());
        let dispatcher = Arc::new(CommandDispatcher::new(link.clone(), 3, Duration::ZERO));

        let input = read_lines(Cursor::new("S\n\nbogus\n debug \n"));
        console(Arc::clone(&dispatcher), input).await;

        assert_eq!(link.0.lock().unwrap().as_slice(), b"SD");
        assert_eq!(dispatcher.selected_mode(), OperatingMode::Debug);
    }

    #[test]
    fn test_runtime_shuts_down_while_console_input_is_idle() {
        let (release, stalled) = std::sync::mpsc::channel();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let link: Arc<dyn Link> = Arc::new(CapturedLink::default());
            let dispatcher = Arc::new(CommandDispatcher::new(link, 3, Duration::ZERO));
            let input = read_lines(std::io::BufReader::new(StalledInput(stalled)));

            let task = tokio::spawn(console(dispatcher, input));
            tokio::task::yield_now().await;
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(release);
    }

    #[test]
    fn test_reading_format() {
        assert_eq!(reading(Some(4123.0), "mV"), "4123.0 mV");
        assert_eq!(reading(Some(24.26), "°C"), "24.3 °C");
        assert_eq!(reading(None, "V"), "n/a");
    }

    #[test]
    fn test_explicit_config_path_must_exist() {
        assert!(load_config(Some("/nonexistent/bms.toml".to_string())).is_err());
    }

    #[test]
    fn test_explicit_config_path_loaded() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[pack]\nsegments = 2\n").unwrap();
        file.flush().unwrap();

        let config = load_config(Some(file.path().display().to_string())).unwrap();
        assert_eq!(config.pack.segments, 2);
    }

    #[test]
    fn test_default_config_file_is_valid() {
        let contents = include_str!("../config/default.toml");
        assert!(Config::parse(contents).is_ok());
    }
}
