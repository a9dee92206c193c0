use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExposureError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("Shodan API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("missing required column '{column}' in {}", .path.display())]
    MissingColumn { column: String, path: PathBuf },
    #[error("unsupported input format: {} (expected .csv, .json, .jsonl or .ndjson)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chart error: {0}")]
    Chart(String),
}

pub type Result<T> = std::result::Result<T, ExposureError>;
