mod config;
mod error;
mod instrument;
mod models;
mod serial;
mod session;
mod storage;
mod utils;

use log::{error, info};
use tokio::time::{sleep, Duration};

use config::AnalyzerConfig;
use serial::{SerialTransport, Transport};
use session::Session;
use storage::CsvSessionLog;

/// Time the instrument needs after the port opens before it accepts commands
const PORT_SETTLE_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match AnalyzerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Connecting to {} at {} baud...",
        config.port, config.baud_rate
    );
    let mut transport = match SerialTransport::open(&config.port, config.baud_rate, config.io_timeout)
    {
        Ok(transport) => transport,
        Err(e) => {
            error!("Could not open serial port {}: {}", config.port, e);
            return Err(e.into());
        }
    };
    sleep(Duration::from_millis(PORT_SETTLE_MS)).await;

    let log = match CsvSessionLog::open(&config.output_csv, config.mode) {
        Ok(log) => log,
        Err(e) => {
            error!(
                "Could not open log file '{}': {}",
                config.output_csv.display(),
                e
            );
            transport.close().await;
            return Err(e.into());
        }
    };

    let mut session = Session::new(transport, log, config);

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    // Run the session or wait for shutdown signal
    let result = tokio::select! {
        result = session.run() => result,
        Ok(()) = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
            Ok(())
        }
    };

    let stats = session.shutdown().await;

    match result {
        Ok(()) => {
            info!("Program completed after {} cycles", stats.total());
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            Err(e.into())
        }
    }
}
