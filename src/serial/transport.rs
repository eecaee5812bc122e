/// Line-framed duplex channel to the instrument and its serial port implementation
use async_trait::async_trait;
use log::debug;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::TransportError;

/// Byte channel the command driver talks through
///
/// Every call is bounded by the channel's own timeout. `read_line` returns
/// whatever arrived before the timeout, so an empty vector means nothing was
/// received at all.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError>;

    fn is_open(&self) -> bool;

    async fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Release the channel; later calls fail with [`TransportError::NotOpen`]
    async fn close(&mut self);
}

/// RS-232/USB-CDC link opened through the `serialport` crate
///
/// Blocking port I/O runs on Tokio's blocking pool.
pub struct SerialTransport {
    port_name: String,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`; `timeout` bounds every read and write
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(SerialTransport {
            port_name: port_name.to_string(),
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>, TransportError> {
        self.port.clone().ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.write_all(&bytes).map_err(write_error)?;
            port.flush().map_err(write_error)
        })
        .await
        .map_err(|e| TransportError::TaskFailed(e.to_string()))?
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            let mut line = Vec::new();
            let mut byte = [0u8; 1];

            loop {
                match port.read(&mut byte) {
                    Ok(1) => {
                        line.push(byte[0]);
                        if byte[0] == b'\n' {
                            break;
                        }
                    }
                    Ok(_) => {
                        // A serial port only reports EOF once the device is gone
                        if line.is_empty() {
                            return Err(TransportError::Io(ErrorKind::UnexpectedEof.into()));
                        }
                        break;
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }

            Ok(line)
        })
        .await
        .map_err(|e| TransportError::TaskFailed(e.to_string()))?
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let port = self.port()?;
        let mut port = port.lock().await;
        port.set_timeout(timeout)?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
    }
}

fn write_error(e: std::io::Error) -> TransportError {
    if e.kind() == ErrorKind::TimedOut {
        TransportError::WriteTimeout
    } else {
        TransportError::Io(e)
    }
}
