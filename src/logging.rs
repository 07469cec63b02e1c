//! Diagnostic logging to stderr. Menu text goes to stdout and is not logged.

use std::io::{self, IsTerminal};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// WARN normally, DEBUG with `--verbose`.
pub fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

pub fn init(verbose: bool) -> Result<(), LogError> {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .with_filter(level_for(verbose));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .try_init()
        .map_err(|e| {
            if e.to_string().contains("already") {
                LogError::AlreadyInitialized
            } else {
                LogError::SubscriberInit(e)
            }
        })
}
