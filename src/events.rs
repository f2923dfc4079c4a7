//! Structured cycle events
//!
//! Every state the sequencer enters, completes or fails in is reported as a
//! `CycleEvent` to a `CycleObserver`, so external tools can follow a run
//! without scraping log lines.

use crate::sequencer::CycleState;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Current time as RFC 3339 with microsecond precision.
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Entered,
    Completed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEvent {
    pub timestamp: String,
    /// Event type for JSON parsing
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sequence number of the cycle, starting at 1
    pub cycle: u64,
    pub state: CycleState,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CycleEvent {
    pub fn new(cycle: u64, state: CycleState, status: StepStatus, message: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: "cycle_step".to_string(),
            cycle,
            state,
            status,
            message,
        }
    }
}

/// Receiver of cycle events.
pub trait CycleObserver {
    fn on_event(&mut self, event: &CycleEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoOpObserver;

impl CycleObserver for NoOpObserver {
    fn on_event(&mut self, _event: &CycleEvent) {}
}

/// Writes one JSON object per line.
pub struct JsonLinesObserver<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesObserver<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> CycleObserver for JsonLinesObserver<W> {
    fn on_event(&mut self, event: &CycleEvent) {
        let result = serde_json::to_string(event)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.writer, "{}", line))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to write cycle event: {}", e);
        }
    }
}
