pub mod config;
pub mod error;
pub mod data;
pub mod signals;
pub mod strategy;
pub mod ledger;
pub mod backtest;
pub mod metrics;
pub mod report;

pub use backtest::{run_backtest, run_sweep, BacktestRun};
pub use config::BacktestConfig;
pub use data::{Bar, Field, PriceTable};
pub use error::{BacktestError, Result};
pub use ledger::{Ledger, LedgerFrame, PositionFrame};
pub use metrics::{compute_metrics, MetricsSnapshot};
pub use signals::SignalFrame;
pub use strategy::{OrderPlan, Strategy};
