/// Utility functions for timer conversion, derived quantities and formatting
use time::{format_description, OffsetDateTime};

/// Largest hour count the `:INTegrate:TIMer` command accepts
pub const MAX_TIMER_HOURS: u64 = 9999;

/// Longest interval the timer command can express: 9999:59:59
pub const MAX_TIMER_SECS: u64 = MAX_TIMER_HOURS * 3600 + 3599;

/// Intervals shorter than this are treated as zero when deriving power
const MIN_INTERVAL_HOURS: f64 = 1e-9;

/// Format a timestamp for CSV rows and log lines
///
/// Converts an OffsetDateTime to YYYY-MM-DD HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Split a second count into the hours, minutes, seconds triple of the timer command
///
/// Hours are clamped to [`MAX_TIMER_HOURS`]; minutes and seconds are always
/// below 60.
pub fn seconds_to_hms(seconds: u64) -> (u64, u64, u64) {
    let h = (seconds / 3600).min(MAX_TIMER_HOURS);
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    (h, m, s)
}

/// Average power over an integration interval
///
/// `energy_wh / (interval_secs / 3600)`, or 0.0 when the interval is
/// effectively zero.
pub fn average_power(energy_wh: f64, interval_secs: f64) -> f64 {
    let interval_hours = interval_secs / 3600.0;
    if interval_hours > MIN_INTERVAL_HOURS {
        energy_wh / interval_hours
    } else {
        0.0
    }
}
