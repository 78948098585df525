//! Telemetry events emitted by the orchestrator.
//!
//! The engine never talks to a telemetry backend. It hands [`MetricEvent`]s to a
//! [`MetricsSink`] and the host decides where they go.

use crate::error::ErrorKind;
use crate::spreadsheet::FileFormat;
use serde::Serialize;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum MetricEvent {
    FileProcessed { format: FileFormat },
    RowsProcessed { count: usize },
    FileElapsed { file: String, elapsed: Duration },
    SheetElapsed { file: String, sheet: String, elapsed: Duration },
    Error { kind: ErrorKind },
}

/// Receiver of telemetry events. Shared by every worker, hence `Send + Sync`.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Discards every event.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: MetricEvent) {}
}

/// Writes every event to the `log` facade at debug level.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::FileProcessed { format } => log::debug!("metric file_processed format={format}"),
            MetricEvent::RowsProcessed { count } => log::debug!("metric rows_processed count={count}"),
            MetricEvent::FileElapsed { file, elapsed } => {
                log::debug!("metric file_elapsed file='{}' ms={}", file, elapsed.as_millis())
            }
            MetricEvent::SheetElapsed { file, sheet, elapsed } => {
                log::debug!("metric sheet_elapsed file='{}' sheet='{}' ms={}", file, sheet, elapsed.as_millis())
            }
            MetricEvent::Error { kind } => log::debug!("metric error kind={kind}"),
        }
    }
}

/// Keeps events in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemoryMetrics {
    pub fn new() -> MemoryMetrics {
        MemoryMetrics::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<MetricEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sum of all `RowsProcessed` counts
    pub fn rows_processed(&self) -> usize {
        self.events()
            .iter()
            .map(|event| match event {
                MetricEvent::RowsProcessed { count } => *count,
                _ => 0,
            })
            .sum()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, event: MetricEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Hands `events` to `sink`, containing any panic raised by the sink.
pub(crate) fn emit(sink: &dyn MetricsSink, events: Vec<MetricEvent>) {
    for event in events {
        if catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
            log::warn!("Metrics sink panicked, event dropped");
        }
    }
}
