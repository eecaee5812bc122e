/// Integration cycle: reset, start, poll until the timer is up, fetch the result
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::Timing;
use crate::error::TransportError;
use crate::instrument::commands;
use crate::instrument::decoder::decode;
use crate::models::{CommandOutcome, CycleErrorKind, CycleOutcome, IntegrationState, MeasurementSample};
use crate::serial::{ScpiDriver, Transport};

type Failure = (CycleErrorKind, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Resetting,
    Starting,
    Polling,
    Fetching,
    Done,
    Failed,
}

/// Normalize a state query response
///
/// Matching is by case-insensitive substring, checked in this order: `TIM`
/// (covers `TIMEUP`), `RUN`, `STOP`/`RESET`, `OVERFLOW`.
pub fn classify_state(response: &str) -> IntegrationState {
    let upper = response.trim().to_uppercase();
    if upper.contains("TIM") {
        IntegrationState::Complete
    } else if upper.contains("RUN") {
        IntegrationState::Running
    } else if upper.contains("STOP") || upper.contains("RESET") {
        IntegrationState::StoppedUnexpectedly(upper)
    } else if upper.contains("OVERFLOW") {
        IntegrationState::Overflow(upper)
    } else {
        IntegrationState::Unrecognized(upper)
    }
}

/// Watchdog bound for the polling phase: `interval * 1.5 + 5` seconds
pub fn soft_timeout(interval_secs: u64) -> Duration {
    Duration::from_millis(interval_secs.saturating_mul(1500).saturating_add(5000))
}

/// One reset/start/poll/fetch pass over the instrument's integrator
///
/// Reset always precedes start, so only one integration is ever in flight.
/// A cycle ends in [`CyclePhase::Done`] or [`CyclePhase::Failed`]; the next
/// call to [`IntegrationCycle::run`] starts again from [`CyclePhase::Idle`].
pub struct IntegrationCycle {
    interval_secs: u64,
    expected_fields: usize,
    timing: Timing,
    phase: CyclePhase,
    history: Vec<CyclePhase>,
}

impl IntegrationCycle {
    pub fn new(interval_secs: u64, expected_fields: usize, timing: Timing) -> Self {
        IntegrationCycle {
            interval_secs,
            expected_fields,
            timing,
            phase: CyclePhase::Idle,
            history: vec![CyclePhase::Idle],
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Phases entered during the last run, in order
    pub fn history(&self) -> &[CyclePhase] {
        &self.history
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("Integration cycle {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.history.push(phase);
    }

    fn fail(&mut self, (kind, context): Failure) -> CycleOutcome {
        self.enter(CyclePhase::Failed);
        CycleOutcome::Failed(kind, context)
    }

    pub async fn run<T: Transport>(&mut self, driver: &mut ScpiDriver<T>) -> CycleOutcome {
        self.phase = CyclePhase::Idle;
        self.history = vec![CyclePhase::Idle];

        self.enter(CyclePhase::Resetting);
        info!("Resetting integrator...");
        if let Err(failure) = self.write_step(driver, commands::INTEGRATE_RESET, "reset").await {
            return self.fail(failure);
        }
        sleep(self.timing.reset_settle).await;

        self.enter(CyclePhase::Starting);
        info!("Starting integrator...");
        if let Err(failure) = self.write_step(driver, commands::INTEGRATE_START, "start").await {
            return self.fail(failure);
        }
        sleep(self.timing.start_settle).await;

        self.enter(CyclePhase::Polling);
        info!("Integrating for {} seconds...", self.interval_secs);
        if let Err(failure) = self.poll_until_complete(driver).await {
            return self.fail(failure);
        }

        self.enter(CyclePhase::Fetching);
        info!("Querying measurement results...");
        match fetch_sample(driver, self.expected_fields).await {
            Ok(sample) => {
                self.enter(CyclePhase::Done);
                CycleOutcome::Success(sample.with_average_power(self.interval_secs as f64))
            }
            Err(failure) => self.fail(failure),
        }
    }

    async fn write_step<T: Transport>(
        &self,
        driver: &mut ScpiDriver<T>,
        command: &str,
        what: &str,
    ) -> Result<(), Failure> {
        match driver.send(command).await {
            CommandOutcome::Sent => Ok(()),
            CommandOutcome::SendFailed(e) => Err(write_failure(what, e)),
            other => Err((
                CycleErrorKind::CommandFailed,
                format!("{} command: unexpected outcome {:?}", what, other),
            )),
        }
    }

    /// Query the integrator state until it reports completion or the watchdog fires
    async fn poll_until_complete<T: Transport>(
        &self,
        driver: &mut ScpiDriver<T>,
    ) -> Result<(), Failure> {
        let limit = soft_timeout(self.interval_secs);
        let started = Instant::now();
        let mut last_logged: Option<Instant> = None;
        let mut unrecognized_in_a_row = 0u32;
        let mut last_state = String::from("none");

        loop {
            if started.elapsed() > limit {
                return Err((
                    CycleErrorKind::Timeout,
                    format!(
                        "integration not complete after {:.1}s (last state: {})",
                        limit.as_secs_f64(),
                        last_state
                    ),
                ));
            }

            let response = match driver.send_and_receive(commands::INTEGRATE_STATE_QUERY).await {
                CommandOutcome::ReceivedLine(text) => text,
                CommandOutcome::SendFailed(e) => {
                    if e.is_fatal() {
                        return Err(write_failure("state query", e));
                    }
                    warn!("Failed to send STATE query ({}). Retrying...", e);
                    sleep(self.timing.query_retry).await;
                    continue;
                }
                CommandOutcome::ReceiveFailed(e) if e.is_fatal() => {
                    return Err((
                        CycleErrorKind::Transport,
                        format!("state query read: {}", e),
                    ));
                }
                other => {
                    // The read already waited out its own timeout
                    warn!("No usable response to STATE query ({:?}). Retrying...", other);
                    continue;
                }
            };

            let now = Instant::now();
            if last_logged.map_or(true, |t| now - t > self.timing.state_log_every) {
                info!(
                    "  Current state: {} (polling for {:.1}s)",
                    response.to_uppercase(),
                    (now - started).as_secs_f64()
                );
                last_logged = Some(now);
            }
            last_state = response.to_uppercase();

            match classify_state(&response) {
                IntegrationState::Complete => {
                    info!("Integration complete ({}).", last_state);
                    return Ok(());
                }
                IntegrationState::Running => {
                    unrecognized_in_a_row = 0;
                    sleep(self.timing.running_poll).await;
                }
                IntegrationState::StoppedUnexpectedly(raw) => {
                    return Err((CycleErrorKind::StoppedUnexpectedly, raw));
                }
                IntegrationState::Overflow(raw) => {
                    return Err((CycleErrorKind::Overflow, raw));
                }
                IntegrationState::Unrecognized(raw) => {
                    unrecognized_in_a_row += 1;
                    if unrecognized_in_a_row >= self.timing.max_unrecognized_reads {
                        return Err((
                            CycleErrorKind::Timeout,
                            format!(
                                "{} unrecognized integration states in a row (last: '{}')",
                                unrecognized_in_a_row, raw
                            ),
                        ));
                    }
                    warn!(
                        "Unexpected integration state received: '{}'. Continuing to wait...",
                        raw
                    );
                    sleep(self.timing.unrecognized_poll).await;
                }
            }
        }
    }
}

/// Query the numeric values once and decode them
///
/// Never retried: after completion the result is only valid until the next
/// reset.
pub async fn fetch_sample<T: Transport>(
    driver: &mut ScpiDriver<T>,
    expected_fields: usize,
) -> Result<MeasurementSample, Failure> {
    match driver.send_and_receive(commands::NUMERIC_VALUE_QUERY).await {
        CommandOutcome::ReceivedLine(line) => {
            decode(&line, expected_fields).map_err(|e| (CycleErrorKind::Decode, e.to_string()))
        }
        CommandOutcome::SendFailed(e) => Err(write_failure("numeric query", e)),
        CommandOutcome::ReceiveFailed(e) if e.is_fatal() => Err((
            CycleErrorKind::Transport,
            format!("numeric query read: {}", e),
        )),
        CommandOutcome::DecodeFailed(raw, reason) => Err((
            CycleErrorKind::Decode,
            format!("undecodable response {:?}: {}", raw, reason),
        )),
        other => Err((
            CycleErrorKind::NoResponse,
            format!("no measurement response ({:?})", other),
        )),
    }
}

fn write_failure(what: &str, e: TransportError) -> Failure {
    let kind = if e.is_fatal() {
        CycleErrorKind::Transport
    } else {
        CycleErrorKind::CommandFailed
    };
    (kind, format!("failed to send {} command: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::{MockTransport, Reply};
    use std::io;

    const STATE: &str = ":INTEGRATE:STATE?";
    const VALUE: &str = ":NUMERIC:NORMAL:VALUE?";

    fn setup() -> (MockTransport, ScpiDriver<MockTransport>, IntegrationCycle) {
        let mock = MockTransport::new();
        let timing = Timing::default();
        let driver = ScpiDriver::new(mock.clone(), timing.settle);
        (mock, driver, IntegrationCycle::new(10, 4, timing))
    }

    fn states(mock: &MockTransport, replies: &[&str]) {
        mock.script(STATE, replies.iter().map(|r| Reply::line(r)));
    }

    #[test]
    fn classifies_states() {
        assert_eq!(classify_state("RUNNING"), IntegrationState::Running);
        assert_eq!(classify_state("run"), IntegrationState::Running);
        assert_eq!(classify_state("TIMEUP"), IntegrationState::Complete);
        assert_eq!(classify_state(":INT:STAT TIM"), IntegrationState::Complete);
        assert_eq!(
            classify_state("Stop"),
            IntegrationState::StoppedUnexpectedly("STOP".into())
        );
        assert_eq!(
            classify_state("RESET"),
            IntegrationState::StoppedUnexpectedly("RESET".into())
        );
        assert_eq!(
            classify_state("overflow"),
            IntegrationState::Overflow("OVERFLOW".into())
        );
        assert_eq!(
            classify_state("BUSY"),
            IntegrationState::Unrecognized("BUSY".into())
        );
        assert_eq!(classify_state(""), IntegrationState::Unrecognized(String::new()));
    }

    #[test]
    fn watchdog_margin() {
        assert_eq!(soft_timeout(10), Duration::from_secs(20));
        assert_eq!(soft_timeout(1), Duration::from_secs_f64(6.5));
        assert_eq!(soft_timeout(u64::MAX), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_running_states() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["RUNNING", "RUNNING", "TIMEUP"]);
        mock.script(VALUE, [Reply::line("12.5,0.8,9.2,0.002778")]);

        let outcome = cycle.run(&mut driver).await;

        let sample = match outcome {
            CycleOutcome::Success(sample) => sample,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(sample.energy_wh, Some(0.002778));
        assert!((sample.average_power.unwrap() - 1.0).abs() < 1e-3);
        assert_eq!(mock.count(STATE), 3);
        assert_eq!(mock.count(VALUE), 1);
        assert_eq!(cycle.phase(), CyclePhase::Done);
        assert_eq!(
            cycle.history(),
            &[
                CyclePhase::Idle,
                CyclePhase::Resetting,
                CyclePhase::Starting,
                CyclePhase::Polling,
                CyclePhase::Fetching,
                CyclePhase::Done
            ]
        );

        let writes = mock.writes();
        assert_eq!(writes[0], ":INTegrate:RESet");
        assert_eq!(writes[1], ":INTegrate:STARt");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_immediately() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["STOP", "TIMEUP"]);

        let outcome = cycle.run(&mut driver).await;

        assert_eq!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::StoppedUnexpectedly, "STOP".into())
        );
        assert_eq!(mock.count(STATE), 1);
        assert_eq!(mock.count(VALUE), 0);
        assert_eq!(cycle.phase(), CyclePhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_aborts() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["RUN", "OVERFLOW"]);

        let outcome = cycle.run(&mut driver).await;

        assert_eq!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Overflow, "OVERFLOW".into())
        );
        assert_eq!(mock.count(VALUE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_expires_while_running() {
        let (mock, mut driver, mut cycle) = setup();
        mock.respond_always(STATE, Reply::line("RUNNING"));

        let started = Instant::now();
        let outcome = cycle.run(&mut driver).await;
        let elapsed = started.elapsed();

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Timeout, ref context) if context.contains("RUNNING")
        ));
        assert!(elapsed >= Duration::from_secs(20), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(22), "{:?}", elapsed);
        assert_eq!(mock.count(VALUE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_expires_when_silent() {
        let (mock, mut driver, mut cycle) = setup();

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Timeout, _)
        ));
        assert!(mock.count(STATE) >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_never_polls() {
        let (mock, mut driver, mut cycle) = setup();
        mock.fail_next_write(":INTegrate:STARt", TransportError::WriteTimeout);

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::CommandFailed, _)
        ));
        assert!(!cycle.history().contains(&CyclePhase::Polling));
        assert_eq!(mock.count(STATE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_state_query() {
        let (mock, mut driver, mut cycle) = setup();
        mock.fail_next_write(STATE, TransportError::WriteTimeout);
        states(&mock, &["RUN", "TIM"]);
        mock.script(VALUE, [Reply::line("1,2,3,4")]);

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(outcome, CycleOutcome::Success(_)));
        assert_eq!(mock.count(STATE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_read_timeout() {
        let (mock, mut driver, mut cycle) = setup();
        mock.script(STATE, [Reply::Silence, Reply::line("TIMEUP")]);
        mock.script(VALUE, [Reply::line("1,2,3,4")]);

        assert!(matches!(cycle.run(&mut driver).await, CycleOutcome::Success(_)));
        assert_eq!(mock.count(STATE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_channel_while_polling_is_fatal() {
        let (mock, mut driver, mut cycle) = setup();
        mock.fail_next_write(
            STATE,
            TransportError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        );

        let outcome = cycle.run(&mut driver).await;

        assert!(outcome.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn tolerates_some_unrecognized_states() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["BUSY", "???", "RUN", "TIM"]);
        mock.script(VALUE, [Reply::line("1,2,3,4")]);

        assert!(matches!(cycle.run(&mut driver).await, CycleOutcome::Success(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn caps_consecutive_unrecognized_states() {
        let mock = MockTransport::new();
        let timing = Timing::default();
        let mut driver = ScpiDriver::new(mock.clone(), timing.settle);
        let mut cycle = IntegrationCycle::new(600, 4, timing);
        mock.respond_always(STATE, Reply::line("BUSY"));

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Timeout, ref context) if context.contains("unrecognized")
        ));
        assert_eq!(mock.count(STATE), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_is_not_retried() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["TIMEUP"]);

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::NoResponse, _)
        ));
        assert_eq!(mock.count(VALUE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_result_is_a_decode_failure() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["TIMEUP"]);
        mock.script(VALUE, [Reply::line("12.5,0.8")]);

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Decode, ref context) if context.contains("12.5,0.8")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_result_is_a_decode_failure() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["TIMEUP"]);
        mock.script(VALUE, [Reply::Bytes(b"12.5,0.8,9.2,0.0027".to_vec())]);

        let outcome = cycle.run(&mut driver).await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleErrorKind::Decode, _)
        ));
        assert_eq!(mock.count(VALUE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_again_from_idle() {
        let (mock, mut driver, mut cycle) = setup();
        states(&mock, &["STOP", "TIMEUP"]);
        mock.script(VALUE, [Reply::line("1,2,3,4")]);

        assert!(matches!(cycle.run(&mut driver).await, CycleOutcome::Failed(..)));
        assert!(matches!(cycle.run(&mut driver).await, CycleOutcome::Success(_)));
        assert_eq!(mock.count(":INTegrate:RESet"), 2);
    }
}
