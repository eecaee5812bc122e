pub mod operations;
pub mod sink;

pub use sink::CsvSessionLog;
