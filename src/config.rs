use log::info;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SettingsError;
use crate::models::MeasurementMode;
use crate::utils::MAX_TIMER_SECS;

const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_AVERAGING_COUNT: u32 = 16;
const AVERAGING_COUNTS: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Fixed pauses and bounds used while talking to the instrument
#[derive(Debug, Clone)]
pub struct Timing {
    /// Pause after every successful write
    pub settle: Duration,
    pub reset_settle: Duration,
    pub start_settle: Duration,
    /// Extra pause after the integration timer is set
    pub timer_settle: Duration,
    pub running_poll: Duration,
    pub unrecognized_poll: Duration,
    /// Pause before re-sending a state query whose write failed
    pub query_retry: Duration,
    /// Pause before the next cycle after a failed one
    pub error_backoff: Duration,
    pub averaging_period: Duration,
    /// Link timeout used for the final stop command
    pub cleanup_timeout: Duration,
    pub state_log_every: Duration,
    pub max_unrecognized_reads: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle: Duration::from_millis(100),
            reset_settle: Duration::from_millis(300),
            start_settle: Duration::from_millis(100),
            timer_settle: Duration::from_millis(200),
            running_poll: Duration::from_millis(400),
            unrecognized_poll: Duration::from_millis(500),
            query_retry: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            averaging_period: Duration::from_secs(1),
            cleanup_timeout: Duration::from_millis(500),
            state_log_every: Duration::from_secs(2),
            max_unrecognized_reads: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub port: String,
    pub baud_rate: u32,
    pub io_timeout: Duration,
    pub mode: MeasurementMode,
    pub integration_interval_secs: u64,
    pub averaging_count: u32,
    pub output_csv: PathBuf,
    pub cycle_limit: Option<u64>,
    pub timing: Timing,
}

impl AnalyzerConfig {
    pub fn new() -> Result<Self, SettingsError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;

        info!(
            "Analyzer on {} at {} baud, {:?} mode, logging to '{}'",
            config.port,
            config.baud_rate,
            config.mode,
            config.output_csv.display()
        );

        Ok(config)
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("ANALYZER_PORT")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or(SettingsError::Missing("ANALYZER_PORT"))?;

        let baud_rate = parse_or(&lookup, "ANALYZER_BAUD_RATE", DEFAULT_BAUD_RATE)?;
        let timeout_ms = parse_or(&lookup, "ANALYZER_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;

        let mode = match lookup("MEASUREMENT_MODE") {
            None => MeasurementMode::Integration,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "integration" | "integrate" => MeasurementMode::Integration,
                "averaging" | "average" => MeasurementMode::Averaging,
                _ => {
                    return Err(SettingsError::Invalid {
                        key: "MEASUREMENT_MODE",
                        value: raw,
                        reason: "expected 'integration' or 'averaging'".into(),
                    })
                }
            },
        };

        let integration_interval_secs =
            parse_or(&lookup, "INTEGRATION_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?;
        if integration_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "INTEGRATION_INTERVAL_SECS",
                value: "0".into(),
                reason: "interval must be at least one second".into(),
            });
        }
        if integration_interval_secs > MAX_TIMER_SECS {
            return Err(SettingsError::Invalid {
                key: "INTEGRATION_INTERVAL_SECS",
                value: integration_interval_secs.to_string(),
                reason: format!(
                    "the integration timer holds at most {} seconds",
                    MAX_TIMER_SECS
                ),
            });
        }

        let averaging_count = parse_or(&lookup, "AVERAGING_COUNT", DEFAULT_AVERAGING_COUNT)?;
        if !AVERAGING_COUNTS.contains(&averaging_count) {
            return Err(SettingsError::Invalid {
                key: "AVERAGING_COUNT",
                value: averaging_count.to_string(),
                reason: format!("expected one of {:?}", AVERAGING_COUNTS),
            });
        }

        let output_csv = lookup("OUTPUT_CSV")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| match mode {
                MeasurementMode::Integration => PathBuf::from(format!(
                    "power_data_integrated_{}s.csv",
                    integration_interval_secs
                )),
                MeasurementMode::Averaging => PathBuf::from("power_data_averaged_peakV.csv"),
            });

        let cycle_limit = match lookup("CYCLE_LIMIT") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_value("CYCLE_LIMIT", &raw)?),
            _ => None,
        };

        Ok(AnalyzerConfig {
            port,
            baud_rate,
            io_timeout: Duration::from_millis(timeout_ms),
            mode,
            integration_interval_secs,
            averaging_count,
            output_csv,
            cycle_limit,
            timing: Timing::default(),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
