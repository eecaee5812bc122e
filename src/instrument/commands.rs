//! SCPI command text understood by the power analyzer
//!
//! Set commands use the mixed-case abbreviated form, queries the upper-case
//! long form. The exact text matters: some firmware only accepts it as shown.

pub const IDENTIFY: &str = "*IDN?";

pub const INTEGRATE_RESET: &str = ":INTegrate:RESet";
pub const INTEGRATE_START: &str = ":INTegrate:STARt";
pub const INTEGRATE_STOP: &str = ":INTegrate:STOP";
pub const INTEGRATE_STATE_QUERY: &str = ":INTEGRATE:STATE?";
pub const INTEGRATE_MODE_QUERY: &str = ":INTEGRATE:MODE?";
pub const INTEGRATE_FUNCTION_QUERY: &str = ":INTEGRATE:FUNCTION?";
pub const INTEGRATE_TIMER_QUERY: &str = ":INTEGRATE:TIMER?";

pub const NUMERIC_VALUE_QUERY: &str = ":NUMERIC:NORMAL:VALUE?";
pub const NUMERIC_NUMBER_QUERY: &str = ":NUMERIC:NORMAL:NUMBER?";
pub const AVERAGING_COUNT_QUERY: &str = ":MEASURE:AVERAGING:COUNT?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationMode {
    /// Timed integration that stops by itself when the timer expires
    Standard,
}

impl IntegrationMode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            IntegrationMode::Standard => "STANdard",
        }
    }
}

/// Quantity the integrator accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationFunction {
    /// Watt-hours
    Watt,
}

impl IntegrationFunction {
    pub fn mnemonic(self) -> &'static str {
        match self {
            IntegrationFunction::Watt => "WATT",
        }
    }
}

/// Measurement assignable to a numeric output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericItem {
    PeakVoltage,
    Current,
    Power,
    Energy,
}

impl NumericItem {
    pub fn mnemonic(self) -> &'static str {
        match self {
            NumericItem::PeakVoltage => "UPPeak",
            NumericItem::Current => "I",
            NumericItem::Power => "P",
            NumericItem::Energy => "WH",
        }
    }
}

pub fn set_integration_mode(mode: IntegrationMode) -> String {
    format!(":INTegrate:MODE {}", mode.mnemonic())
}

pub fn set_integration_function(function: IntegrationFunction) -> String {
    format!(":INTegrate:FUNCtion {}", function.mnemonic())
}

pub fn set_integration_timer(hours: u64, minutes: u64, seconds: u64) -> String {
    format!(":INTegrate:TIMer {},{},{}", hours, minutes, seconds)
}

/// `slot` is 1-based
pub fn set_numeric_item(slot: usize, item: NumericItem) -> String {
    format!(":NUMeric:NORMal:ITEM{} {}", slot, item.mnemonic())
}

pub fn numeric_item_query(slot: usize) -> String {
    format!(":NUMERIC:NORMAL:ITEM{}?", slot)
}

pub fn set_numeric_number(count: usize) -> String {
    format!(":NUMeric:NORMal:NUMBer {}", count)
}

pub fn set_averaging_count(count: u32) -> String {
    format!(":MEASure:AVERaging:COUNt {}", count)
}

/// Short form of a mnemonic, the part instruments echo back (`UPPeak` -> `UPP`)
pub fn short_form(mnemonic: &str) -> String {
    let short: String = mnemonic
        .chars()
        .filter(|c| !c.is_ascii_lowercase())
        .collect();
    if short.is_empty() {
        mnemonic.to_ascii_uppercase()
    } else {
        short
    }
}
