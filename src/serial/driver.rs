/// Command/response driver: one SCPI line out, optionally one line back
use log::{debug, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::TransportError;
use crate::models::CommandOutcome;
use crate::serial::transport::Transport;

/// Owns the transport and turns every exchange into a [`CommandOutcome`]
///
/// Command text is written exactly as given plus a `\n` terminator; case is
/// never normalized because some firmware is case-sensitive. Each successful
/// write is followed by the settle delay the instrument needs between
/// commands.
pub struct ScpiDriver<T> {
    transport: T,
    settle: Duration,
}

impl<T: Transport> ScpiDriver<T> {
    pub fn new(transport: T, settle: Duration) -> Self {
        ScpiDriver { transport, settle }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write one command; never reads
    pub async fn send(&mut self, command: &str) -> CommandOutcome {
        if !self.transport.is_open() {
            return CommandOutcome::SendFailed(TransportError::NotOpen);
        }

        let line = encode(command);
        match self.transport.write(line.as_bytes()).await {
            Ok(()) => {
                debug!("SEND: {}", command.trim_end());
                sleep(self.settle).await;
                CommandOutcome::Sent
            }
            Err(e) => {
                warn!("Failed to send '{}': {}", command.trim_end(), e);
                CommandOutcome::SendFailed(e)
            }
        }
    }

    /// Write one command and read one response line
    ///
    /// A read that returns nothing is [`CommandOutcome::TimedOut`]. A line
    /// cut off by the timeout, or bytes that are not UTF-8, come back
    /// untouched in [`CommandOutcome::DecodeFailed`].
    pub async fn send_and_receive(&mut self, command: &str) -> CommandOutcome {
        match self.send(command).await {
            CommandOutcome::Sent => {}
            other => return other,
        }

        match self.transport.read_line().await {
            Ok(bytes) if bytes.is_empty() => {
                debug!("No response to '{}' before timeout", command.trim_end());
                CommandOutcome::TimedOut
            }
            Ok(bytes) if bytes.last() != Some(&b'\n') => {
                let reason = "line not terminated before timeout".to_string();
                warn!("Partial response to '{}': {:?}", command.trim_end(), bytes);
                CommandOutcome::DecodeFailed(bytes, reason)
            }
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    let text = text.trim().to_string();
                    debug!("RECV: {}", text);
                    CommandOutcome::ReceivedLine(text)
                }
                Err(e) => {
                    let reason = e.utf8_error().to_string();
                    let raw = e.into_bytes();
                    warn!("Could not decode response {:?}: {}", raw, reason);
                    CommandOutcome::DecodeFailed(raw, reason)
                }
            },
            Err(e) => {
                warn!("Failed to read response to '{}': {}", command.trim_end(), e);
                CommandOutcome::ReceiveFailed(e)
            }
        }
    }
}

fn encode(command: &str) -> String {
    let mut line = command.trim_end_matches(&['\r', '\n'][..]).to_string();
    line.push('\n');
    line
}
