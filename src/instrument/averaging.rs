/// Averaging acquisition: one numeric read of the instrument's running average
use crate::instrument::integration::fetch_sample;
use crate::models::CycleOutcome;
use crate::serial::{ScpiDriver, Transport};

/// Peak voltage, current, power
pub const AVERAGING_FIELDS: usize = 3;

pub async fn read_average<T: Transport>(driver: &mut ScpiDriver<T>) -> CycleOutcome {
    match fetch_sample(driver, AVERAGING_FIELDS).await {
        Ok(sample) => CycleOutcome::Success(sample),
        Err((kind, context)) => CycleOutcome::Failed(kind, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CycleErrorKind;
    use crate::serial::mock::{MockTransport, Reply};
    use std::time::Duration;

    const VALUE: &str = ":NUMERIC:NORMAL:VALUE?";

    #[tokio::test(start_paused = true)]
    async fn reads_three_values() {
        let mock = MockTransport::new();
        mock.script(VALUE, [Reply::line("325.1,1.25,230.4")]);
        let mut driver = ScpiDriver::new(mock.clone(), Duration::from_millis(100));

        match read_average(&mut driver).await {
            CycleOutcome::Success(sample) => {
                assert_eq!(sample.peak_voltage, 325.1);
                assert_eq!(sample.power, 230.4);
                assert_eq!(sample.energy_wh, None);
                assert_eq!(sample.average_power, None);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(mock.writes(), vec![VALUE]);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_no_response() {
        let mock = MockTransport::new();
        let mut driver = ScpiDriver::new(mock.clone(), Duration::from_millis(100));

        assert!(matches!(
            read_average(&mut driver).await,
            CycleOutcome::Failed(CycleErrorKind::NoResponse, _)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_is_a_decode_failure() {
        let mock = MockTransport::new();
        mock.script(VALUE, [Reply::line("OVER,1.0,2.0")]);
        let mut driver = ScpiDriver::new(mock.clone(), Duration::from_millis(100));

        assert!(matches!(
            read_average(&mut driver).await,
            CycleOutcome::Failed(CycleErrorKind::Decode, _)
        ));
    }
}
