//! Logging sink selection for the ferryline binaries.
//!
//! Mirrors the option set every tier understands: `logging_level` picks the
//! max level, `write_console` / `write_console_only` pick console, file, or
//! both. The file sink is `<program>.log` in the working directory.

use std::sync::Arc;

use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Errors during logging setup; fatal to startup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown logging level: {0}")]
    InvalidLevel(String),

    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Parses a `logging_level` option value.
pub fn parse_level(level: &str) -> Result<tracing::Level, LoggingError> {
    level
        .parse()
        .map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Installs the global subscriber for a binary.
pub fn init(
    program: &str,
    level: &str,
    write_console: bool,
    write_console_only: bool,
) -> Result<(), LoggingError> {
    let level = parse_level(level)?;

    if write_console_only {
        return tracing_subscriber::fmt()
            .with_max_level(level)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("{program}.log"))?;
    let file = Arc::new(file);

    if write_console {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(level)
            .with_writer(std::io::stdout.and(file))
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)
    } else {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(level)
            .with_writer(file)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)
    }
}
