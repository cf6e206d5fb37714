/// error.rs — Engine error taxonomy
///
/// Construction and loop-integrity failures abort a run and carry enough
/// context (asset, timestamp) to diagnose.  Degenerate metric formulas are
/// NOT errors: they are normalised to zero inside `metrics`.
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

#[derive(Debug, Error)]
pub enum BacktestError {
    /// Malformed price table, invalid run parameters or malformed strategy output.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Order, step or accrual issued out of time order (or twice).
    #[error("causality violation at step {step} ({timestamp}): {detail}")]
    Causality {
        step:      usize,
        timestamp: DateTime<Utc>,
        detail:    String,
    },

    /// A nonzero position needs a price that the table does not have.
    #[error("no close price for {asset} at {timestamp} while holding {position}")]
    DataGap {
        asset:     String,
        timestamp: DateTime<Utc>,
        position:  f64,
    },

    #[error("strategy `{name}` failed: {source:#}")]
    Strategy {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BacktestError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
