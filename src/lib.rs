pub mod aggregate;
pub mod app;
pub mod charts;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod output;
pub mod report;
pub mod risk;
pub mod shodan;
pub mod table;

pub use error::{ExposureError, Result};
