/// sma.rs — Moving-average crossover with take-profit / stop-loss exits
///
/// Signals (all computed from closes up to and including t):
///   short_mavg, long_mavg  rolling means, min_periods = 1
///   crossover              +1 / −1 on the bar the short mean moves above /
///                          below the long mean (only after short_window bars)
///   exit                   1 on the first bar after an entry where the close
///                          leaves the [stop, take-profit] band
///
/// The sizer targets ±order_size on a crossover, flat on an exit, and emits
/// the delta against what it already holds.
use anyhow::{anyhow, bail, Context};
use backtest_engine::{Field, OrderPlan, PriceTable, SignalFrame, Strategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rolling::rolling_mean;

// ─── Exit band ─────────────────────────────────────────────────────────────

const LONG_TAKE_PROFIT: f64 = 1.01;
const LONG_STOP_LOSS: f64 = 0.995;
const SHORT_TAKE_PROFIT: f64 = 0.99;
const SHORT_STOP_LOSS: f64 = 1.005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmaParams {
    pub short_window: usize,
    pub long_window:  usize,
    pub order_size:   f64,
}

impl Default for SmaParams {
    fn default() -> Self {
        Self { short_window: 20, long_window: 100, order_size: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub struct SmaCrossover {
    name:   String,
    asset:  String,
    params: SmaParams,
}

impl SmaCrossover {
    pub fn new(asset: impl Into<String>, params: SmaParams) -> anyhow::Result<Self> {
        if params.short_window == 0 {
            bail!("short_window must be at least 1");
        }
        if params.long_window < params.short_window {
            bail!(
                "long_window ({}) must not be shorter than short_window ({})",
                params.long_window,
                params.short_window
            );
        }
        if !(params.order_size.is_finite() && params.order_size > 0.0) {
            bail!("order_size must be positive, got {}", params.order_size);
        }
        let asset = asset.into();
        let name = format!("sma_{}_{}_{}", asset, params.short_window, params.long_window);
        Ok(Self { name, asset, params })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn params(&self) -> &SmaParams {
        &self.params
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signals(&self, prices: &PriceTable) -> anyhow::Result<SignalFrame> {
        let close = prices
            .series(Field::Close, &self.asset)
            .ok_or_else(|| anyhow!("asset {} is not in the price table", self.asset))?
            .to_vec();
        let n = close.len();
        let short = rolling_mean(&close, self.params.short_window, 1);
        let long = rolling_mean(&close, self.params.long_window, 1);

        // +1 short above long, −1 below, 0 during warm-up or when equal
        let regime: Vec<f64> = (0..n)
            .map(|t| {
                if t < self.params.short_window {
                    0.0
                } else if short[t] > long[t] {
                    1.0
                } else if short[t] < long[t] {
                    -1.0
                } else {
                    0.0
                }
            })
            .collect();

        let mut crossover = vec![0.0; n];
        for t in 1..n {
            if regime[t] != 0.0 && regime[t] != regime[t - 1] {
                crossover[t] = regime[t];
            }
        }

        let exit = exit_signal(&close, &crossover);
        debug!(
            strategy = %self.name,
            entries = crossover.iter().filter(|c| **c != 0.0).count(),
            exits = exit.iter().filter(|e| **e != 0.0).count(),
            "signals generated"
        );

        let mut frame = SignalFrame::new(prices.index().to_vec());
        frame.insert("short_mavg", short)?;
        frame.insert("long_mavg", long)?;
        frame.insert("crossover", crossover)?;
        frame.insert("exit", exit)?;
        Ok(frame)
    }

    fn generate_positions(&self, signals: &SignalFrame, orders: &mut OrderPlan) -> anyhow::Result<()> {
        let crossover = signals.column("crossover").context("missing `crossover` signal")?;
        let exit = signals.column("exit").context("missing `exit` signal")?;
        let size = self.params.order_size;

        let mut held = 0.0;
        for t in 0..signals.len() {
            let target = if crossover[t] > 0.0 {
                size
            } else if crossover[t] < 0.0 {
                -size
            } else if exit[t] != 0.0 {
                0.0
            } else {
                held
            };
            let delta = target - held;
            if delta != 0.0 {
                orders.set(&self.asset, t, delta)?;
            }
            held = target;
        }
        Ok(())
    }
}

/// Walk forward from each entry; the first bar whose close leaves the band
/// marks the exit.  A new crossover replaces the open entry.
fn exit_signal(close: &[f64], crossover: &[f64]) -> Vec<f64> {
    let mut exit = vec![0.0; close.len()];
    // (direction, entry close)
    let mut open: Option<(f64, f64)> = None;

    for t in 0..close.len() {
        if crossover[t] != 0.0 {
            open = close[t].is_finite().then_some((crossover[t], close[t]));
            continue;
        }
        let Some((dir, entry)) = open else { continue };
        let c = close[t];
        let hit = if dir > 0.0 {
            c > entry * LONG_TAKE_PROFIT || c < entry * LONG_STOP_LOSS
        } else {
            c < entry * SHORT_TAKE_PROFIT || c > entry * SHORT_STOP_LOSS
        };
        if hit {
            exit[t] = 1.0;
            open = None;
        }
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::closes_table;
    use backtest_engine::{run_backtest, BacktestConfig};

    fn params(short: usize, long: usize) -> SmaParams {
        SmaParams { short_window: short, long_window: long, order_size: 1.0 }
    }

    #[test]
    fn rejects_bad_params() {
        assert!(SmaCrossover::new("A", params(0, 5)).is_err());
        assert!(SmaCrossover::new("A", params(5, 2)).is_err());
        let bad_size = SmaParams { order_size: -1.0, ..params(2, 4) };
        assert!(SmaCrossover::new("A", bad_size).is_err());
        assert!(SmaCrossover::new("A", SmaParams::default()).is_ok());
    }

    #[test]
    fn rising_series_enters_after_warmup_then_takes_profit() {
        let prices = closes_table(&[("A", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])]);
        let sma = SmaCrossover::new("A", params(2, 4)).unwrap();
        let signals = sma.generate_signals(&prices).unwrap();

        // t = 2: short mean 2.5 over long mean 2.0
        assert_eq!(signals.column("crossover").unwrap().to_vec(), vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        // 4 > 3 × 1.01
        assert_eq!(signals.column("exit").unwrap().to_vec(), vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(signals.get("short_mavg", 0), Some(1.0));

        let mut orders = OrderPlan::new(prices.len(), prices.assets());
        sma.generate_positions(&signals, &mut orders).unwrap();
        let sizes: Vec<f64> = (0..6).map(|t| orders.get("A", t).unwrap()).collect();
        assert_eq!(sizes, vec![0.0, 0.0, 1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn reversal_flips_through_zero_in_one_order() {
        let prices = closes_table(&[("A", vec![10.0, 11.0, 12.0, 12.05, 8.0, 7.0, 6.0])]);
        let sma = SmaCrossover::new("A", params(2, 3)).unwrap();
        let signals = sma.generate_signals(&prices).unwrap();
        let crossover = signals.column("crossover").unwrap().to_vec();
        assert_eq!(crossover[2], 1.0);
        assert_eq!(crossover[4], -1.0);

        let mut orders = OrderPlan::new(prices.len(), prices.assets());
        sma.generate_positions(&signals, &mut orders).unwrap();
        assert_eq!(orders.get("A", 2), Some(1.0));
        // 12.05 stays inside the long band around 12
        assert_eq!(orders.get("A", 3), Some(0.0));
        assert_eq!(orders.get("A", 4), Some(-2.0));
    }

    #[test]
    fn short_exit_uses_short_band() {
        let close = [100.0, 100.0, 98.0, 98.5, 97.0];
        let crossover = [0.0, 0.0, -1.0, 0.0, 0.0];
        // 98.5 > 98 × 1.005 trips the short stop
        assert_eq!(exit_signal(&close, &crossover), vec![0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_asset_is_an_error() {
        let prices = closes_table(&[("A", vec![1.0, 2.0])]);
        let sma = SmaCrossover::new("B", params(1, 2)).unwrap();
        assert!(sma.generate_signals(&prices).is_err());
    }

    #[test]
    fn runs_through_the_engine() {
        let prices = closes_table(&[("A", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])]);
        let sma = SmaCrossover::new("A", params(2, 4)).unwrap();
        let run = run_backtest(&sma, &prices, &BacktestConfig::default()).unwrap();

        // long one unit from t = 2 to t = 3 earns one price step
        assert_eq!(run.ledger().pnl().last().copied(), Some(100_001.0));
        assert_eq!(run.metrics().number_of_trades, 2);
        assert_eq!(run.strategy(), "sma_A_2_4");
    }
}
