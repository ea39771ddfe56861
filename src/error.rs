//! Error types shared across the library.

use thiserror::Error;

/// Setup-time failures of a backtest run.
///
/// A run either fails with one of these before simulating a single bar,
/// or completes with a well-formed report.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("Initial equity must be positive, got {0}")]
    InvalidEquity(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bar {index} has no `{column}` column")]
    MissingColumn { column: String, index: usize },

    #[error("Cannot backtest an empty series")]
    EmptySeries,
}

/// Failure of a single notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications are disabled")]
    Disabled,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notification channel is closed")]
    ChannelClosed,
}
