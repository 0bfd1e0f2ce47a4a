//! Command-line interface for ocrbridge.

mod commands;
pub mod icons;

pub use commands::{is_verbose, run};
