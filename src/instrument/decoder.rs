/// Decoding of `:NUMERIC:NORMAL:VALUE?` responses
use time::OffsetDateTime;

use crate::error::DecodeError;
use crate::models::MeasurementSample;
use crate::utils::average_power;

/// Fields every sample needs: peak voltage, current, power
const BASE_FIELDS: usize = 3;

/// Decode a comma-separated numeric response into a sample
///
/// The response must carry at least `expected_fields` values in configured
/// item order (peak voltage, current, power, then energy when four items are
/// configured). Extra trailing fields are ignored and empty fields read as
/// 0.0, since the instrument leaves saturated quantities blank.
pub fn decode(line: &str, expected_fields: usize) -> Result<MeasurementSample, DecodeError> {
    let error = |reason: String| DecodeError {
        raw: line.to_string(),
        reason,
    };

    if expected_fields < BASE_FIELDS {
        return Err(error(format!(
            "at least {} fields are needed, {} configured",
            BASE_FIELDS, expected_fields
        )));
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < expected_fields {
        return Err(error(format!(
            "expected {} values, received {}",
            expected_fields,
            fields.len()
        )));
    }

    let mut values = Vec::with_capacity(expected_fields);
    for (index, field) in fields.iter().take(expected_fields).enumerate() {
        let field = field.trim();
        if field.is_empty() {
            values.push(0.0);
            continue;
        }
        let value = field
            .parse::<f64>()
            .map_err(|e| error(format!("field {} ('{}'): {}", index + 1, field, e)))?;
        values.push(value);
    }

    Ok(MeasurementSample {
        peak_voltage: values[0],
        current: values[1],
        power: values[2],
        energy_wh: values.get(3).copied(),
        average_power: None,
        timestamp: OffsetDateTime::now_utc(),
    })
}

impl MeasurementSample {
    /// Fill in the interval's average power from the accumulated energy
    pub fn with_average_power(mut self, interval_secs: f64) -> Self {
        self.average_power = self
            .energy_wh
            .map(|energy| average_power(energy, interval_secs));
        self
    }
}
