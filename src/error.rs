/// Error types for the instrument link, the protocol layers and the session
use std::io;
use thiserror::Error;

/// Channel-level failure on the serial link
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("write timed out")]
    WriteTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("serial I/O task failed: {0}")]
    TaskFailed(String),
}

impl TransportError {
    /// Whether the channel itself is gone, as opposed to a single slow exchange
    ///
    /// Timeouts and interrupted calls are worth retrying on the same port.
    /// Everything else means the port was closed, unplugged or never opened.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::WriteTimeout => false,
            TransportError::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            TransportError::Serial(e) => !matches!(
                e.kind(),
                serialport::ErrorKind::Io(io::ErrorKind::TimedOut)
                    | serialport::ErrorKind::Io(io::ErrorKind::Interrupted)
            ),
            TransportError::NotOpen | TransportError::TaskFailed(_) => true,
        }
    }
}

/// Configuration sequence aborted at `step`
#[derive(Error, Debug)]
#[error("configuration step '{step}' failed: {reason}")]
pub struct ConfigError {
    pub step: String,
    pub reason: String,
    pub fatal_transport: bool,
}

/// A numeric response that could not be turned into a sample
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot decode '{raw}': {reason}")]
pub struct DecodeError {
    pub raw: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Invalid operator settings
#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures that end the whole session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("instrument configuration failed: {0}")]
    Configuration(#[from] ConfigError),

    #[error("result sink failure: {0}")]
    Storage(#[from] StorageError),
}
