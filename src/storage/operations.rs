/// Row layout of the session log for each measurement mode
use crate::models::{MeasurementMode, MeasurementSample};
use crate::utils::format_datetime;

const INTEGRATION_HEADER: [&str; 6] = [
    "Timestamp",
    "Interval Avg Power (W)",
    "Interval WattHours (Wh)",
    "End Interval V+pk (V)",
    "End Interval Current (A)",
    "End Interval Inst Power (W)",
];

const AVERAGING_HEADER: [&str; 4] = [
    "Timestamp",
    "Avg Peak Voltage (V+pk)",
    "Avg Current (A)",
    "Avg Power (W)",
];

/// Column names written once at the top of an empty log
pub fn header(mode: MeasurementMode) -> &'static [&'static str] {
    match mode {
        MeasurementMode::Integration => &INTEGRATION_HEADER,
        MeasurementMode::Averaging => &AVERAGING_HEADER,
    }
}

/// Format one sample as a log row
///
/// # Arguments
/// * `mode` - Which column layout to produce
/// * `sample` - Decoded values of one completed cycle
///
/// # Returns
/// One field per header column. Integration rows carry energy to 6 decimal
/// places and everything else to 4; a missing energy or average is left
/// empty.
pub fn record(mode: MeasurementMode, sample: &MeasurementSample) -> Vec<String> {
    let timestamp = format_datetime(&sample.timestamp);
    match mode {
        MeasurementMode::Integration => vec![
            timestamp,
            optional(sample.average_power, 4),
            optional(sample.energy_wh, 6),
            format!("{:.4}", sample.peak_voltage),
            format!("{:.4}", sample.current),
            format!("{:.4}", sample.power),
        ],
        MeasurementMode::Averaging => vec![
            timestamp,
            format!("{:.4}", sample.peak_voltage),
            format!("{:.4}", sample.current),
            format!("{:.4}", sample.power),
        ],
    }
}

fn optional(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_default()
}
