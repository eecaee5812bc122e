/// Instrument configuration sequence: ordered set commands with advisory read-back
use log::{info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::ConfigError;
use crate::instrument::commands::{self, IntegrationFunction, IntegrationMode, NumericItem};
use crate::models::CommandOutcome;
use crate::serial::{ScpiDriver, Transport};
use crate::utils::seconds_to_hms;

/// Vendors whose identity strings are known to speak this command set
const KNOWN_VENDORS: [&str; 2] = ["TELEDYNE", "LECROY"];

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationOptions {
    pub mode: IntegrationMode,
    pub function: IntegrationFunction,
    pub timer_secs: u64,
}

/// Everything the sequencer puts on the instrument
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOptions {
    pub integration: Option<IntegrationOptions>,
    /// Numeric output items in slot order
    pub items: Vec<NumericItem>,
    /// How many items the value query returns
    pub item_count: usize,
    pub averaging_count: Option<u32>,
}

impl InstrumentOptions {
    /// Timed watt-hour integration returning peak voltage, current, power and energy
    pub fn integration(interval_secs: u64) -> Self {
        InstrumentOptions {
            integration: Some(IntegrationOptions {
                mode: IntegrationMode::Standard,
                function: IntegrationFunction::Watt,
                timer_secs: interval_secs,
            }),
            items: vec![
                NumericItem::PeakVoltage,
                NumericItem::Current,
                NumericItem::Power,
                NumericItem::Energy,
            ],
            item_count: 4,
            averaging_count: None,
        }
    }

    /// Averaged peak voltage, current and power
    pub fn averaging(count: u32) -> Self {
        InstrumentOptions {
            integration: None,
            items: vec![NumericItem::PeakVoltage, NumericItem::Current, NumericItem::Power],
            item_count: 3,
            averaging_count: Some(count),
        }
    }
}

/// What a read-back must show for the setting to count as applied
#[derive(Debug, Clone, PartialEq)]
enum Expect {
    Contains(String),
    Count(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    label: String,
    command: String,
    verify: Option<(String, Expect)>,
    extra_settle: Option<Duration>,
    /// Query first and leave the setting alone when it already matches
    skip_when_applied: bool,
}

impl Step {
    fn new(label: impl Into<String>, command: String) -> Self {
        Step {
            label: label.into(),
            command,
            verify: None,
            extra_settle: None,
            skip_when_applied: false,
        }
    }

    fn verify(mut self, query: impl Into<String>, expect: Expect) -> Self {
        self.verify = Some((query.into(), expect));
        self
    }

    fn settle(mut self, pause: Duration) -> Self {
        self.extra_settle = Some(pause);
        self
    }

    fn only_if_different(mut self) -> Self {
        self.skip_when_applied = true;
        self
    }
}

fn plan(options: &InstrumentOptions, timer_settle: Duration) -> Vec<Step> {
    let mut steps = Vec::new();

    if let Some(integration) = &options.integration {
        let (h, m, s) = seconds_to_hms(integration.timer_secs);
        steps.push(
            Step::new("integration mode", commands::set_integration_mode(integration.mode)).verify(
                commands::INTEGRATE_MODE_QUERY,
                Expect::Contains(commands::short_form(integration.mode.mnemonic())),
            ),
        );
        steps.push(
            Step::new(
                "integration function",
                commands::set_integration_function(integration.function),
            )
            .verify(
                commands::INTEGRATE_FUNCTION_QUERY,
                Expect::Contains(commands::short_form(integration.function.mnemonic())),
            ),
        );
        steps.push(
            Step::new("integration timer", commands::set_integration_timer(h, m, s))
                .settle(timer_settle)
                .verify(
                    commands::INTEGRATE_TIMER_QUERY,
                    Expect::Contains(format!("{},{},{}", h, m, s)),
                ),
        );
    }

    for (index, item) in options.items.iter().enumerate() {
        let slot = index + 1;
        steps.push(
            Step::new(
                format!("numeric item {}", slot),
                commands::set_numeric_item(slot, *item),
            )
            .verify(
                commands::numeric_item_query(slot),
                Expect::Contains(commands::short_form(item.mnemonic())),
            ),
        );
    }

    steps.push(
        Step::new("numeric item count", commands::set_numeric_number(options.item_count))
            .verify(commands::NUMERIC_NUMBER_QUERY, Expect::Count(options.item_count))
            .only_if_different(),
    );

    if let Some(count) = options.averaging_count {
        steps.push(
            Step::new("averaging count", commands::set_averaging_count(count)).verify(
                commands::AVERAGING_COUNT_QUERY,
                Expect::Count(count as usize),
            ),
        );
    }

    steps
}

/// Put the instrument into the measurement setup described by `options`
///
/// Steps run strictly in order and the first command that cannot be written
/// aborts the sequence; nothing after it is sent. Read-backs only warn,
/// unless the channel itself is gone. The item count is queried first and
/// only set when it differs.
pub async fn configure<T: Transport>(
    driver: &mut ScpiDriver<T>,
    options: &InstrumentOptions,
    timer_settle: Duration,
) -> Result<(), ConfigError> {
    identify(driver).await?;

    info!("Configuring instrument...");

    for step in plan(options, timer_settle) {
        if step.skip_when_applied {
            if let Some((query, expect)) = &step.verify {
                let current = read_back(driver, &step.label, query).await?;
                if current.as_deref().map_or(false, |reply| confirms(reply, expect)) {
                    info!("{} already applied ({:?})", step.label, expect);
                    continue;
                }
            }
        }

        match driver.send(&step.command).await {
            CommandOutcome::Sent => {}
            CommandOutcome::SendFailed(e) => {
                return Err(ConfigError {
                    step: step.label,
                    reason: e.to_string(),
                    fatal_transport: e.is_fatal(),
                })
            }
            other => {
                return Err(ConfigError {
                    step: step.label,
                    reason: format!("unexpected outcome {:?}", other),
                    fatal_transport: false,
                })
            }
        }

        if let Some(pause) = step.extra_settle {
            sleep(pause).await;
        }

        if let Some((query, expect)) = &step.verify {
            if let Some(reply) = read_back(driver, &step.label, query).await? {
                if confirms(&reply, expect) {
                    info!("Confirm {}: {}", step.label, reply);
                } else {
                    warn!(
                        "Read-back of {} is '{}', expected {:?}",
                        step.label, reply, expect
                    );
                }
            }
        }
    }

    info!("Instrument configured");
    Ok(())
}

/// Query `*IDN?`; no answer aborts, an unfamiliar vendor only warns
async fn identify<T: Transport>(driver: &mut ScpiDriver<T>) -> Result<String, ConfigError> {
    let failure = |reason: String, fatal_transport: bool| ConfigError {
        step: "identify".to_string(),
        reason,
        fatal_transport,
    };

    match driver.send_and_receive(commands::IDENTIFY).await {
        CommandOutcome::ReceivedLine(identity) if !identity.is_empty() => {
            info!("Instrument ID: {}", identity);
            let upper = identity.to_uppercase();
            if !KNOWN_VENDORS.iter().any(|vendor| upper.contains(vendor)) {
                warn!("Instrument ID doesn't mention Teledyne/LeCroy. Ensure compatibility.");
            }
            Ok(identity)
        }
        CommandOutcome::SendFailed(e) | CommandOutcome::ReceiveFailed(e) => {
            let fatal = e.is_fatal();
            Err(failure(e.to_string(), fatal))
        }
        other => Err(failure(format!("no identity response ({:?})", other), false)),
    }
}

/// Advisory query; only a dead channel is an error
async fn read_back<T: Transport>(
    driver: &mut ScpiDriver<T>,
    label: &str,
    query: &str,
) -> Result<Option<String>, ConfigError> {
    match driver.send_and_receive(query).await {
        CommandOutcome::ReceivedLine(reply) => Ok(Some(reply)),
        CommandOutcome::SendFailed(e) | CommandOutcome::ReceiveFailed(e) if e.is_fatal() => {
            Err(ConfigError {
                step: label.to_string(),
                reason: e.to_string(),
                fatal_transport: true,
            })
        }
        other => {
            warn!("No read-back for {} ({:?})", label, other);
            Ok(None)
        }
    }
}

fn confirms(reply: &str, expect: &Expect) -> bool {
    match expect {
        Expect::Contains(token) => reply.to_uppercase().contains(&token.to_uppercase()),
        Expect::Count(count) => parse_count(reply) == Some(*count),
    }
}

/// Last whitespace-separated token as a count (`:NUM:NORM:NUMB 4` -> 4)
fn parse_count(reply: &str) -> Option<usize> {
    reply.split_whitespace().last()?.parse().ok()
}
