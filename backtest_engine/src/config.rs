/// config.rs — Run parameters for a backtest
///
/// Values come either from `Default` or from environment variables (after
/// dotenv).  Every run borrows `&BacktestConfig`; nothing here is mutated
/// once the loop starts.
use anyhow::Result;
use std::env;

use crate::error::BacktestError;

/// Trading days per year, the annualisation constant for daily bars.
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_INIT_CASH:        f64 = 100_000.0;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Portfolio value seeded into `pnl[t0]`
    pub init_cash: f64,
    /// Sampling periods per year (252 for daily, 8_760 for hourly, ...)
    pub periods_per_year: f64,
    /// Log progress while the loop runs
    pub verbose: bool,
    /// Steps between progress lines when `verbose` is set
    pub progress_every: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            init_cash:        DEFAULT_INIT_CASH,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            verbose:          false,
            progress_every:   1_000,
        }
    }
}

impl BacktestConfig {
    /// Load configuration from environment variables (after dotenv).
    ///
    /// Unset keys fall back to `Default`; unparsable values are errors.
    /// `BACKTEST_INTERVAL` ("1h", "1d", ...) sets the annualisation unless
    /// `BACKTEST_PERIODS_PER_YEAR` is given explicitly.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let defaults = Self::default();
        let verbose = env::var("BACKTEST_VERBOSE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.verbose);

        let periods_per_year = match env::var("BACKTEST_INTERVAL") {
            Ok(interval) if env::var("BACKTEST_PERIODS_PER_YEAR").is_err() => {
                Self::periods_for_interval(interval.trim()).ok_or_else(|| {
                    anyhow::anyhow!("Config key BACKTEST_INTERVAL: unknown interval `{interval}`")
                })?
            }
            _ => parse_env("BACKTEST_PERIODS_PER_YEAR", defaults.periods_per_year)?,
        };

        let cfg = Self {
            init_cash:        parse_env("BACKTEST_INIT_CASH", defaults.init_cash)?,
            periods_per_year,
            verbose,
            progress_every:   parse_env("BACKTEST_PROGRESS_EVERY", defaults.progress_every)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Periods per year for a bar interval string ("1m", "1h", "1d", ...).
    /// Equity markets: 252 sessions per year, 6.5 hours per session.
    pub fn periods_for_interval(interval: &str) -> Option<f64> {
        let p = match interval {
            "1m"  => 252.0 * 390.0,
            "5m"  => 252.0 * 78.0,
            "15m" => 252.0 * 26.0,
            "30m" => 252.0 * 13.0,
            "1h"  => 252.0 * 6.5,
            "1d"  => 252.0,
            "1wk" => 52.0,
            "1mo" => 12.0,
            _     => return None,
        };
        Some(p)
    }

    pub fn validate(&self) -> std::result::Result<(), BacktestError> {
        if !(self.init_cash.is_finite() && self.init_cash > 0.0) {
            return Err(BacktestError::config(format!(
                "init_cash must be a positive finite number, got {}",
                self.init_cash
            )));
        }
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(BacktestError::config(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.progress_every == 0 {
            return Err(BacktestError::config("progress_every must be at least 1"));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_daily() {
        let cfg = BacktestConfig::default();
        assert_eq!(cfg.init_cash, 100_000.0);
        assert_eq!(cfg.periods_per_year, 252.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_cash() {
        let cfg = BacktestConfig { init_cash: 0.0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(BacktestError::Configuration(_))));

        let cfg = BacktestConfig { init_cash: f64::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn interval_table() {
        assert_eq!(BacktestConfig::periods_for_interval("1d"), Some(252.0));
        assert_eq!(BacktestConfig::periods_for_interval("1h"), Some(1_638.0));
        assert_eq!(BacktestConfig::periods_for_interval("7d"), None);
    }

    // the only test touching BACKTEST_* variables, so the cases run in sequence
    #[test]
    fn reads_overrides_from_env() {
        const KEYS: [&str; 5] = [
            "BACKTEST_INIT_CASH",
            "BACKTEST_PERIODS_PER_YEAR",
            "BACKTEST_VERBOSE",
            "BACKTEST_PROGRESS_EVERY",
            "BACKTEST_INTERVAL",
        ];
        let clear = || {
            for key in KEYS {
                env::remove_var(key);
            }
        };
        clear();

        env::set_var("BACKTEST_INIT_CASH", "250000");
        env::set_var("BACKTEST_VERBOSE", "true");
        let cfg = BacktestConfig::from_env().unwrap();
        assert_eq!(cfg.init_cash, 250_000.0);
        assert!(cfg.verbose);
        // unset keys keep their defaults
        assert_eq!(cfg.periods_per_year, 252.0);
        assert_eq!(cfg.progress_every, 1_000);

        env::set_var("BACKTEST_INTERVAL", "1h");
        assert_eq!(BacktestConfig::from_env().unwrap().periods_per_year, 1_638.0);
        env::set_var("BACKTEST_PERIODS_PER_YEAR", "365");
        assert_eq!(BacktestConfig::from_env().unwrap().periods_per_year, 365.0);

        env::set_var("BACKTEST_INIT_CASH", "abc");
        assert!(BacktestConfig::from_env().is_err());
        env::set_var("BACKTEST_INIT_CASH", "-5");
        assert!(BacktestConfig::from_env().is_err());

        clear();
        env::set_var("BACKTEST_INTERVAL", "7d");
        assert!(BacktestConfig::from_env().is_err());
        clear();
    }
}
