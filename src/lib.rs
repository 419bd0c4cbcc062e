//! Gauge OCR
//!
//! Reads numeric measurements from photos of gauge displays: maps a crop
//! box drawn over a letterboxed preview to source pixels, decodes and
//! enhances that region, runs text recognition and extracts the first
//! number. Readings fill the cells of inspection grids that export to CSV.

pub mod config;
pub mod crop;
pub mod error;
pub mod geometry;
pub mod inspection;
pub mod ocr;
pub mod paths;
pub mod store;
pub mod worker;

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;

pub use config::ScanConfig;
pub use error::ScanError;
pub use ocr::{MeasurementReading, Pipeline, RecognitionResult, TesseractRecognizer, TextRecognizer};

/// Logs a message to stderr and the log file with timestamp.
///
/// stdout is left to command output.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    eprint!("{}", line);
    let log_path = paths::get_logs_dir().join("gauge_ocr.log");
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
}
