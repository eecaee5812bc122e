use csv::{Writer, WriterBuilder};
use log::info;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::models::{MeasurementMode, MeasurementSample};
use crate::storage::operations::{header, record};

/// Append-only CSV log of completed cycles
///
/// The header row is written only when the file is empty at open time, so
/// restarting a session against an existing log keeps appending rows under
/// the existing header. Every row is flushed before `append` returns.
pub struct CsvSessionLog {
    writer: Writer<File>,
    path: PathBuf,
    mode: MeasurementMode,
    rows: u64,
}

impl CsvSessionLog {
    pub fn open(path: impl AsRef<Path>, mode: MeasurementMode) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_empty {
            info!("Log file '{}' is new or empty. Writing header.", path.display());
            writer.write_record(header(mode))?;
            writer.flush()?;
        } else {
            info!("Appending to existing log file '{}'", path.display());
        }

        Ok(CsvSessionLog {
            writer,
            path,
            mode,
            rows: 0,
        })
    }

    pub fn append(&mut self, sample: &MeasurementSample) -> Result<(), StorageError> {
        self.writer.write_record(record(self.mode, sample))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended through this handle
    pub fn rows(&self) -> u64 {
        self.rows
    }
}
