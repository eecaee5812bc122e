/// Measurement session: configure once, then repeat cycles into the log
use log::{debug, error, info, warn};
use tokio::time::sleep;

use crate::config::AnalyzerConfig;
use crate::error::SessionError;
use crate::instrument::averaging::read_average;
use crate::instrument::commands;
use crate::instrument::configure::{configure, InstrumentOptions};
use crate::instrument::integration::IntegrationCycle;
use crate::models::{
    CommandOutcome, CycleOutcome, MeasurementMode, MeasurementSample, SessionStats,
};
use crate::serial::{ScpiDriver, Transport};
use crate::storage::CsvSessionLog;
use crate::utils::format_datetime;

/// Integration cycles read peak voltage, current, power and energy
const INTEGRATION_FIELDS: usize = 4;

/// Exclusive owner of the instrument link and the session log
///
/// `run` may be cancelled by dropping its future at any await point;
/// `shutdown` must still be called afterwards to stop the integrator and
/// release the port.
pub struct Session<T: Transport> {
    driver: ScpiDriver<T>,
    log: CsvSessionLog,
    config: AnalyzerConfig,
    cycle: IntegrationCycle,
    stats: SessionStats,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, log: CsvSessionLog, config: AnalyzerConfig) -> Self {
        let timing = config.timing.clone();
        Session {
            driver: ScpiDriver::new(transport, timing.settle),
            log,
            cycle: IntegrationCycle::new(
                config.integration_interval_secs,
                INTEGRATION_FIELDS,
                timing,
            ),
            config,
            stats: SessionStats::default(),
        }
    }

    /// Configure the instrument and run cycles until the limit or a fatal error
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let options = match self.config.mode {
            MeasurementMode::Integration => {
                InstrumentOptions::integration(self.config.integration_interval_secs)
            }
            MeasurementMode::Averaging => InstrumentOptions::averaging(self.config.averaging_count),
        };
        if let Err(e) = configure(&mut self.driver, &options, self.config.timing.timer_settle).await
        {
            if e.fatal_transport {
                return Err(SessionError::Transport(e.to_string()));
            }
            return Err(e.into());
        }

        info!(
            "Starting {:?} measurement loop. Press Ctrl+C to stop.",
            self.config.mode
        );

        loop {
            if let Some(limit) = self.config.cycle_limit {
                if self.stats.total() >= limit {
                    info!("Cycle limit of {} reached", limit);
                    return Ok(());
                }
            }

            let number = self.stats.total() + 1;
            info!("--- Cycle {} ---", number);

            let outcome = match self.config.mode {
                MeasurementMode::Integration => {
                    let outcome = self.cycle.run(&mut self.driver).await;
                    debug!(
                        "Integration cycle ended in {:?} after {:?}",
                        self.cycle.phase(),
                        self.cycle.history()
                    );
                    outcome
                }
                MeasurementMode::Averaging => read_average(&mut self.driver).await,
            };
            self.stats.record(&outcome);
            let fatal = outcome.is_fatal();

            match outcome {
                CycleOutcome::Success(sample) => {
                    self.report(&sample);
                    self.log.append(&sample)?;
                    debug!(
                        "{} rows written, {} cycles failed",
                        self.log.rows(),
                        self.stats.failed
                    );
                    if self.config.mode == MeasurementMode::Averaging {
                        sleep(self.config.timing.averaging_period).await;
                    }
                }
                CycleOutcome::Failed(kind, context) => {
                    error!("Cycle {} failed ({:?}): {}", number, kind, context);
                    if fatal {
                        return Err(SessionError::Transport(context));
                    }
                    sleep(self.config.timing.error_backoff).await;
                }
            }
        }
    }

    fn report(&self, sample: &MeasurementSample) {
        let timestamp = format_datetime(&sample.timestamp);
        match self.config.mode {
            MeasurementMode::Integration => {
                info!(
                    "{} - Interval Avg P: {:.4} W (from {:.6} Wh)",
                    timestamp,
                    sample.average_power.unwrap_or_default(),
                    sample.energy_wh.unwrap_or_default()
                );
                info!(
                    "    End V+pk: {:.4} V, End I: {:.4} A, End Inst P: {:.4} W",
                    sample.peak_voltage, sample.current, sample.power
                );
            }
            MeasurementMode::Averaging => {
                info!(
                    "{} - Avg V+pk: {:.4} V, Avg I: {:.4} A, Avg P: {:.4} W",
                    timestamp, sample.peak_voltage, sample.current, sample.power
                );
            }
        }
    }

    /// Stop the integrator, flush the log and release the port
    ///
    /// Every step is best effort; failures are logged and the remaining
    /// steps still run.
    pub async fn shutdown(mut self) -> SessionStats {
        info!("Cleaning up...");
        let timing = self.config.timing.clone();

        if self.driver.transport().is_open() {
            if let Err(e) = self
                .driver
                .transport_mut()
                .set_timeout(timing.cleanup_timeout)
                .await
            {
                warn!("Could not shorten link timeout for cleanup: {}", e);
            }

            if self.config.mode == MeasurementMode::Integration {
                info!("Sending integration STOP command...");
                match self.driver.send(commands::INTEGRATE_STOP).await {
                    CommandOutcome::Sent => info!("Integration stopped"),
                    other => warn!("Could not stop integration: {:?}", other),
                }
            }

            self.driver.transport_mut().close().await;
            info!("Serial port closed");
        }

        if let Err(e) = self.log.flush() {
            error!("Failed to flush log file '{}': {}", self.log.path().display(), e);
        } else {
            info!("Log file '{}' closed", self.log.path().display());
        }

        info!(
            "Session finished: {} cycles succeeded, {} failed",
            self.stats.succeeded, self.stats.failed
        );
        self.stats
    }
}
