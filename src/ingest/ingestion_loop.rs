//! # Ingestion Loop
//!
//! Timer-driven consumer of the line buffer. Each tick drains every buffered
//! line, decodes it and applies it to the battery state or status tracker.
//!
//! Parsing is batched per tick rather than per received byte. A bad line is
//! counted and skipped; nothing inside an iteration can end the loop.
//!
//! Lifecycle: `Idle -> Running -> Stopped`. `stop` is cooperative: an
//! iteration in progress completes, then the task exits instead of waiting
//! for the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::battery::{BatteryState, StatusTracker};
use crate::error::{BmsError, Result};
use crate::telemetry::TelemetrySink;
use crate::wire::protocol::TelemetryRecord;
use crate::wire::{decode, LineBuffer};

/// Default polling interval between iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// What one iteration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub lines: u64,
    pub applied: u64,
    pub statuses: u64,
    pub malformed: u64,
    pub address_errors: u64,
}

/// Lifetime totals of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionCounters {
    pub iterations: u64,
    pub lines: u64,
    pub records_applied: u64,
    pub statuses: u64,
    pub malformed: u64,
    pub address_errors: u64,
    pub sink_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    iterations: AtomicU64,
    lines: AtomicU64,
    records_applied: AtomicU64,
    statuses: AtomicU64,
    malformed: AtomicU64,
    address_errors: AtomicU64,
    sink_errors: AtomicU64,
}

/// Drains, decodes and applies telemetry on a fixed interval
pub struct IngestionLoop {
    buffer: Arc<LineBuffer>,
    battery: Arc<BatteryState>,
    status: Arc<StatusTracker>,
    sink: Option<Arc<dyn TelemetrySink>>,
    interval: Duration,
    phase: Mutex<LoopState>,
    stop_tx: watch::Sender<bool>,
    counters: Counters,
}

impl std::fmt::Debug for IngestionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionLoop")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

impl IngestionLoop {
    /// Loop in the `Idle` state; nothing runs until [`start`](Self::start)
    pub fn new(
        buffer: Arc<LineBuffer>,
        battery: Arc<BatteryState>,
        status: Arc<StatusTracker>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            buffer,
            battery,
            status,
            sink: None,
            interval,
            phase: Mutex::new(LoopState::Idle),
            stop_tx,
            counters: Counters::default(),
        }
    }

    /// Forward every decoded record to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> LoopState {
        *self.phase()
    }

    pub fn counters(&self) -> IngestionCounters {
        let c = &self.counters;
        IngestionCounters {
            iterations: c.iterations.load(Ordering::Relaxed),
            lines: c.lines.load(Ordering::Relaxed),
            records_applied: c.records_applied.load(Ordering::Relaxed),
            statuses: c.statuses.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            address_errors: c.address_errors.load(Ordering::Relaxed),
            sink_errors: c.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Move `Idle -> Running` and spawn the polling task
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the loop was already started or stopped
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        {
            let mut phase = self.phase();
            if *phase != LoopState::Idle {
                return Err(BmsError::InvalidState(format!(
                    "cannot start ingestion loop while {:?}",
                    *phase
                )));
            }
            *phase = LoopState::Running;
        }

        let this = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        info!("Ingestion loop started ({} ms interval)", self.interval.as_millis());

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        this.run_once();
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            let counters = this.counters();
            info!(
                "Ingestion loop stopped after {} iterations ({} applied, {} malformed, {} address errors)",
                counters.iterations, counters.records_applied, counters.malformed, counters.address_errors
            );
        }))
    }

    /// Request the loop to stop; safe to call in any state and repeatedly
    pub fn stop(&self) {
        *self.phase() = LoopState::Stopped;
        self.stop_tx.send_replace(true);
    }

    /// Run one iteration synchronously
    pub fn run_once(&self) -> IterationReport {
        let mut report = IterationReport::default();

        for line in self.buffer.drain_lines() {
            report.lines += 1;
            match decode(&line) {
                Ok(record) => self.handle(record, &mut report),
                Err(e) => {
                    report.malformed += 1;
                    debug!("Dropping line: {}", e);
                }
            }
        }

        if report.lines > 0 {
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.flush() {
                    self.counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Telemetry sink flush failed: {}", e);
                }
            }
            trace!("Iteration: {:?}", report);
        }

        let c = &self.counters;
        c.iterations.fetch_add(1, Ordering::Relaxed);
        c.lines.fetch_add(report.lines, Ordering::Relaxed);
        c.records_applied.fetch_add(report.applied, Ordering::Relaxed);
        c.statuses.fetch_add(report.statuses, Ordering::Relaxed);
        c.malformed.fetch_add(report.malformed, Ordering::Relaxed);
        c.address_errors.fetch_add(report.address_errors, Ordering::Relaxed);
        report
    }

    fn handle(&self, record: TelemetryRecord, report: &mut IterationReport) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&record) {
                self.counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Telemetry sink rejected record: {}", e);
            }
        }

        match record {
            TelemetryRecord::StatusMessage { device, text } => {
                debug!("Status from device {}: {}", device, text);
                self.status.update(device, text);
                report.statuses += 1;
            }
            sample => match self.battery.apply(&sample) {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.address_errors += 1;
                    debug!("Dropping {}: {}", sample.type_tag(), e);
                }
            },
        }
    }

    fn phase(&self) -> MutexGuard<'_, LoopState> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::PackLayout;
    use crate::wire::encoder::encode_lines;
    use crate::wire::protocol::TemperatureChannel;

    const LAYOUT: PackLayout = PackLayout {
        segments: 8,
        devices_per_segment: 3,
        cells_per_device: 6,
    };

    struct Fixture {
        buffer: Arc<LineBuffer>,
        state: Arc<BatteryState>,
        status: Arc<StatusTracker>,
        ingestion: Arc<IngestionLoop>,
    }

    fn fixture() -> Fixture {
        fixture_with(|ingestion| ingestion)
    }

    fn fixture_with(configure: impl FnOnce(IngestionLoop) -> IngestionLoop) -> Fixture {
        let buffer = Arc::new(LineBuffer::new());
        let state = Arc::new(BatteryState::new(LAYOUT));
        let status = Arc::new(StatusTracker::new());
        let ingestion = configure(IngestionLoop::new(
            Arc::clone(&buffer),
            Arc::clone(&state),
            Arc::clone(&status),
            DEFAULT_POLL_INTERVAL,
        ));
        Fixture { buffer, state, status, ingestion: Arc::new(ingestion) }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<TelemetryRecord>>,
        flushes: AtomicU64,
    }

    impl TelemetrySink for CollectingSink {
        fn record(&self, record: &TelemetryRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct FailingSink;

    impl TelemetrySink for FailingSink {
        fn record(&self, _record: &TelemetryRecord) -> Result<()> {
            Err(BmsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    #[test]
    fn test_voltage_line_reaches_pack() {
        let f = fixture();
        f.buffer.append(b"{\"type\":\"voltage_2\",\"device\":\"5\",\"value\":\"4123\"}\n");

        let report = f.ingestion.run_once();
        assert_eq!(report, IterationReport { lines: 1, applied: 1, ..Default::default() });

        let segment = f.state.pack().segment(1).unwrap();
        assert_eq!(segment.read(2).unwrap().voltage(2).unwrap(), Some(4123.0));
        assert_eq!(f.state.overall().unwrap().max_voltage, Some(4123.0));
    }

    #[test]
    fn test_malformed_lines_do_not_disturb_good_ones() {
        let good = vec![
            TelemetryRecord::VoltageSample { device: 0, cell: 0, value: 4000.0 },
            TelemetryRecord::VoltageSample { device: 0, cell: 1, value: 4100.0 },
            TelemetryRecord::TemperatureSample {
                device: 4,
                channel: TemperatureChannel::One,
                value: 33.0,
            },
            TelemetryRecord::VoltageSample { device: 23, cell: 5, value: 3900.0 },
        ];
        let wire = encode_lines(&good);
        let mut lines: Vec<&str> = wire.lines().collect();
        let malformed = [
            "garbage",
            r#"{"type":"voltage","device":"1","value":"4000"}"#,
            r#"{"type":"voltage_1","device":"x","value":"4000"}"#,
        ];
        lines.insert(1, malformed[0]);
        lines.insert(3, malformed[1]);
        lines.push(malformed[2]);

        let clean = fixture();
        clean.buffer.append(wire.as_bytes());
        clean.ingestion.run_once();

        let noisy = fixture();
        noisy.buffer.append((lines.join("\n") + "\n").as_bytes());
        let report = noisy.ingestion.run_once();

        assert_eq!(report.malformed, malformed.len() as u64);
        assert_eq!(report.applied, good.len() as u64);
        assert_eq!(noisy.ingestion.counters().malformed, 3);
        for device in [0, 4, 23] {
            assert_eq!(
                noisy.state.snapshot(device).unwrap(),
                clean.state.snapshot(device).unwrap()
            );
        }
        assert_eq!(noisy.state.overall().unwrap(), clean.state.overall().unwrap());
    }

    #[test]
    fn test_out_of_range_addresses_counted_and_dropped() {
        let f = fixture();
        let records = [
            TelemetryRecord::VoltageSample { device: 24, cell: 0, value: 4000.0 },
            TelemetryRecord::VoltageSample { device: 2, cell: 6, value: 4000.0 },
            TelemetryRecord::TemperatureSample {
                device: 100,
                channel: TemperatureChannel::Two,
                value: 30.0,
            },
            TelemetryRecord::VoltageSample { device: 2, cell: 5, value: 4000.0 },
        ];
        f.buffer.append(encode_lines(&records).as_bytes());

        let report = f.ingestion.run_once();
        assert_eq!(report.address_errors, 3);
        assert_eq!(report.applied, 1);
        assert_eq!(f.ingestion.counters().address_errors, 3);
        assert_eq!(f.state.overall().unwrap().total_voltage, Some(4000.0));
    }

    #[test]
    fn test_status_lines_update_tracker_only() {
        let f = fixture();
        f.buffer.append(b"{\"type\":\"status\",\"device\":\"2\",\"value\":\"Balancing\"}\n");

        let report = f.ingestion.run_once();
        assert_eq!(report.statuses, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(f.status.current().unwrap().text, "Balancing");
        assert!(f.status.has_changed());
        assert!(f.state.overall().is_err());
    }

    #[test]
    fn test_messages_applied_in_arrival_order() {
        let f = fixture();
        let records = [
            TelemetryRecord::VoltageSample { device: 1, cell: 0, value: 3900.0 },
            TelemetryRecord::VoltageSample { device: 1, cell: 0, value: 3950.0 },
            TelemetryRecord::VoltageSample { device: 1, cell: 0, value: 3925.0 },
        ];
        f.buffer.append(encode_lines(&records).as_bytes());
        f.ingestion.run_once();

        assert_eq!(f.state.snapshot(1).unwrap().max, Some(3925.0));
    }

    #[test]
    fn test_sink_sees_each_decoded_record_once() {
        let sink = Arc::new(CollectingSink::default());
        let shared: Arc<dyn TelemetrySink> = sink.clone();
        let f = fixture_with(|ingestion| ingestion.with_sink(shared));

        f.buffer.append(b"{\"type\":\"voltage_0\",\"device\":\"0\",\"value\":\"4000\"}\n");
        f.buffer.append(b"not json\n");
        f.buffer.append(b"{\"type\":\"status\",\"device\":\"0\",\"value\":\"ok\"}\n");
        f.buffer.append(b"{\"type\":\"voltage_0\",\"device\":\"99\",\"value\":\"4000\"}\n");
        f.ingestion.run_once();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], TelemetryRecord::StatusMessage { device: 0, text: "ok".into() });
        assert_eq!(sink.flushes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sink_failure_does_not_stop_ingestion() {
        let f = fixture_with(|ingestion| ingestion.with_sink(Arc::new(FailingSink)));
        f.buffer.append(b"{\"type\":\"voltage_0\",\"device\":\"0\",\"value\":\"4000\"}\n");

        let report = f.ingestion.run_once();
        assert_eq!(report.applied, 1);
        assert_eq!(f.ingestion.counters().sink_errors, 1);
    }

    #[test]
    fn test_runaway_fragment_counted_malformed() {
        let buffer = Arc::new(LineBuffer::with_partial_carry(true));
        let state = Arc::new(BatteryState::new(LAYOUT));
        let ingestion = IngestionLoop::new(
            Arc::clone(&buffer),
            Arc::clone(&state),
            Arc::new(StatusTracker::new()),
            DEFAULT_POLL_INTERVAL,
        );

        // CR-only line endings never produce a newline
        let record = "{\"type\":\"voltage_0\",\"device\":\"0\",\"value\":\"4000\"}\r";
        buffer.append(record.repeat(100).as_bytes());

        let report = ingestion.run_once();
        assert_eq!(report.lines, 1);
        assert_eq!(report.malformed, 1);
        assert!(buffer.is_empty());
        assert!(state.overall().is_err());
    }

    #[test]
    fn test_empty_iteration() {
        let f = fixture();
        assert_eq!(f.ingestion.run_once(), IterationReport::default());
        assert_eq!(f.ingestion.counters().iterations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_transitions() {
        let f = fixture();
        assert_eq!(f.ingestion.state(), LoopState::Idle);

        let handle = f.ingestion.start().unwrap();
        assert_eq!(f.ingestion.state(), LoopState::Running);
        assert!(matches!(f.ingestion.start(), Err(BmsError::InvalidState(_))));

        f.ingestion.stop();
        assert_eq!(f.ingestion.state(), LoopState::Stopped);
        handle.await.unwrap();

        f.ingestion.stop();
        assert!(f.ingestion.start().is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_terminal() {
        let f = fixture();
        f.ingestion.stop();
        assert_eq!(f.ingestion.state(), LoopState::Stopped);
        assert!(f.ingestion.start().is_err());
    }

    #[tokio::test]
    async fn test_serial_bytes_flow_into_state() {
        use crate::serial::{Link, SerialLink};
        use tokio::io::AsyncWriteExt;

        let f = fixture();
        let (near, mut far) = tokio::io::duplex(1024);
        let link = SerialLink::from_stream(
            near,
            "duplex",
            Arc::clone(&f.buffer),
            Duration::from_millis(10),
        );
        let handle = f.ingestion.start().unwrap();

        far.write_all(
            b"{\"type\":\"voltage_2\",\"device\":\"5\",\"value\":\"4123\"}\n\
              {\"type\":\"status\",\"device\":\"5\",\"value\":\"Balancing\"}\n",
        )
        .await
        .unwrap();

        for _ in 0..100 {
            if f.status.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.status.current().unwrap().text, "Balancing");
        assert_eq!(f.state.overall().unwrap().max_voltage, Some(4123.0));

        f.ingestion.stop();
        handle.await.unwrap();
        link.close().await;
        link.close().await;
        assert!(link.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_loop_polls_buffer() {
        let f = fixture();
        let handle = f.ingestion.start().unwrap();

        f.buffer.append(b"{\"type\":\"temperature_1\",\"device\":\"3\",\"value\":\"41.5\"}\n");
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(f.state.snapshot(3).unwrap().temperature1, Some(41.5));

        f.buffer.append(b"{\"type\":\"voltage_1\",\"device\":\"3\",\"value\":\"3999\"}\n");
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(f.state.snapshot(3).unwrap().max, Some(3999.0));

        f.ingestion.stop();
        handle.await.unwrap();

        // Nothing is consumed once stopped
        f.buffer.append(b"{\"type\":\"voltage_1\",\"device\":\"3\",\"value\":\"4100\"}\n");
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(f.state.snapshot(3).unwrap().max, Some(3999.0));
        assert!(!f.buffer.is_empty());
    }
}
