use time::OffsetDateTime;

use crate::error::TransportError;

/// Result of one write, or one write followed by one line read
#[derive(Debug)]
pub enum CommandOutcome {
    Sent,
    SendFailed(TransportError),
    TimedOut,
    ReceivedLine(String),
    ReceiveFailed(TransportError),
    DecodeFailed(Vec<u8>, String),
}

/// Integration state as reported by `:INTEGRATE:STATE?`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationState {
    Running,
    Complete,
    StoppedUnexpectedly(String),
    Overflow(String),
    Unrecognized(String),
}

/// Which acquisition the session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    Integration,
    Averaging,
}

/// Values read back after one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSample {
    pub peak_voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy_wh: Option<f64>,
    pub average_power: Option<f64>,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleErrorKind {
    /// Reset, start or fetch command could not be written
    CommandFailed,
    /// Fetch query got no answer
    NoResponse,
    Decode,
    StoppedUnexpectedly,
    Overflow,
    Timeout,
    /// The channel is gone; ends the session
    Transport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Success(MeasurementSample),
    Failed(CycleErrorKind, String),
}

impl CycleOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleOutcome::Failed(CycleErrorKind::Transport, _))
    }
}

/// Per-session cycle accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub succeeded: u64,
    pub failed: u64,
}

impl SessionStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Success(_) => self.succeeded += 1,
            CycleOutcome::Failed(..) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}
