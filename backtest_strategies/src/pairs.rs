/// pairs.rs — Two-leg mean-reversion on a spread between assets A and B
///
/// Spread kinds:
///   zscore          a − β·b with β the OLS hedge ratio (intercept included),
///                   standardised by a trailing mean / sample std; NaN until
///                   the window fills
///   ratio           a / b
///   log-difference  ln a − ln b
///
/// Sizer (equal notional units on both legs):
///   spread crosses above +entry  → short A, long B
///   spread crosses below −entry  → long A, short B
///   |spread| falls through exit  → flatten both legs
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use backtest_engine::{Field, OrderPlan, PriceTable, SignalFrame, Strategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rolling::{ols_slope, rolling_mean, rolling_std};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpreadKind {
    ZScore,
    Ratio,
    LogDifference,
}

impl SpreadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SpreadKind::ZScore => "zscore",
            SpreadKind::Ratio => "ratio",
            SpreadKind::LogDifference => "log-difference",
        }
    }
}

impl fmt::Display for SpreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpreadKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zscore" | "z-score" => Ok(SpreadKind::ZScore),
            "ratio" => Ok(SpreadKind::Ratio),
            "log-difference" | "log_difference" | "logdiff" => Ok(SpreadKind::LogDifference),
            other => Err(anyhow!("unknown spread type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairsParams {
    pub entry_threshold: f64,
    pub exit_threshold:  f64,
    pub order_size:      f64,
    pub spread:          SpreadKind,
    /// Rolling window for the z-score; unused by the other spread kinds.
    pub window:          usize,
}

impl Default for PairsParams {
    fn default() -> Self {
        Self {
            entry_threshold: 1.5,
            exit_threshold:  0.5,
            order_size:      1.0,
            spread:          SpreadKind::ZScore,
            window:          20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairsTrading {
    name:    String,
    asset_a: String,
    asset_b: String,
    params:  PairsParams,
}

impl PairsTrading {
    pub fn new(
        asset_a: impl Into<String>,
        asset_b: impl Into<String>,
        params:  PairsParams,
    ) -> anyhow::Result<Self> {
        let (asset_a, asset_b) = (asset_a.into(), asset_b.into());
        if asset_a == asset_b {
            bail!("pair legs must differ, got {asset_a} twice");
        }
        if !(params.exit_threshold >= 0.0 && params.entry_threshold > params.exit_threshold) {
            bail!(
                "need entry_threshold > exit_threshold >= 0, got {} / {}",
                params.entry_threshold,
                params.exit_threshold
            );
        }
        if !(params.order_size.is_finite() && params.order_size > 0.0) {
            bail!("order_size must be positive, got {}", params.order_size);
        }
        if params.spread == SpreadKind::ZScore && params.window < 2 {
            bail!("zscore window must be at least 2, got {}", params.window);
        }
        let name = format!("pairs_{asset_a}_{asset_b}_{}", params.spread);
        Ok(Self { name, asset_a, asset_b, params })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn params(&self) -> &PairsParams {
        &self.params
    }

    fn closes(&self, prices: &PriceTable, asset: &str) -> anyhow::Result<Vec<f64>> {
        prices
            .series(Field::Close, asset)
            .map(|s| s.to_vec())
            .ok_or_else(|| anyhow!("asset {asset} is not in the price table"))
    }
}

impl Strategy for PairsTrading {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signals(&self, prices: &PriceTable) -> anyhow::Result<SignalFrame> {
        let a = self.closes(prices, &self.asset_a)?;
        let b = self.closes(prices, &self.asset_b)?;
        let mut frame = SignalFrame::new(prices.index().to_vec());

        let spread: Vec<f64> = match self.params.spread {
            SpreadKind::ZScore => {
                let hedge = ols_slope(&a, &b).unwrap_or_else(|| {
                    warn!(strategy = %self.name, "degenerate hedge regression, using β = 1");
                    1.0
                });
                let raw: Vec<f64> = a.iter().zip(&b).map(|(a, b)| a - hedge * b).collect();
                let w = self.params.window;
                let mean = rolling_mean(&raw, w, w);
                let std = rolling_std(&raw, w, w);
                debug!(strategy = %self.name, hedge, "hedge ratio estimated");
                frame.insert("hedge_ratio", vec![hedge; raw.len()])?;
                raw.iter()
                    .zip(mean.iter().zip(&std))
                    .map(|(x, (m, s))| if *s > 0.0 { (x - m) / s } else { f64::NAN })
                    .collect()
            }
            SpreadKind::Ratio => a.iter().zip(&b).map(|(a, b)| a / b).collect(),
            SpreadKind::LogDifference => a.iter().zip(&b).map(|(a, b)| a.ln() - b.ln()).collect(),
        };

        frame.insert("spread", spread)?;
        Ok(frame)
    }

    fn generate_positions(&self, signals: &SignalFrame, orders: &mut OrderPlan) -> anyhow::Result<()> {
        let spread = signals.column("spread").context("missing `spread` signal")?;
        let (entry, exit) = (self.params.entry_threshold, self.params.exit_threshold);
        let size = self.params.order_size;

        // (held A, held B)
        let mut held = (0.0, 0.0);
        for t in 1..signals.len() {
            let (s, prev) = (spread[t], spread[t - 1]);
            // strict on both sides: resting on a threshold is not a cross.
            // NaN compares false, so warm-up bars never trigger
            let target = if s > entry && prev < entry {
                (-size, size)
            } else if s < -entry && prev > -entry {
                (size, -size)
            } else if s.abs() < exit && prev.abs() > exit {
                (0.0, 0.0)
            } else {
                held
            };

            if target.0 != held.0 {
                orders.set(&self.asset_a, t, target.0 - held.0)?;
            }
            if target.1 != held.1 {
                orders.set(&self.asset_b, t, target.1 - held.1)?;
            }
            held = target;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::closes_table;
    use backtest_engine::{run_backtest, BacktestConfig};

    fn params(spread: SpreadKind) -> PairsParams {
        PairsParams { spread, ..PairsParams::default() }
    }

    fn sizes(orders: &OrderPlan, asset: &str) -> Vec<f64> {
        (0..orders.len()).map(|t| orders.get(asset, t).unwrap()).collect()
    }

    #[test]
    fn parses_spread_kinds() {
        assert_eq!("zscore".parse::<SpreadKind>().unwrap(), SpreadKind::ZScore);
        assert_eq!("Ratio".parse::<SpreadKind>().unwrap(), SpreadKind::Ratio);
        assert_eq!("log-difference".parse::<SpreadKind>().unwrap(), SpreadKind::LogDifference);
        assert!("spline".parse::<SpreadKind>().is_err());
    }

    #[test]
    fn rejects_bad_params() {
        let p = PairsParams::default();
        assert!(PairsTrading::new("A", "A", p).is_err());
        assert!(PairsTrading::new("A", "B", PairsParams { entry_threshold: 0.4, ..p }).is_err());
        assert!(PairsTrading::new("A", "B", PairsParams { order_size: 0.0, ..p }).is_err());
        assert!(PairsTrading::new("A", "B", PairsParams { window: 1, ..p }).is_err());
        assert!(PairsTrading::new("A", "B", p).is_ok());
    }

    #[test]
    fn ratio_spread_enters_short_a_and_exits() {
        // B flat at 10 so the ratio is A / 10
        let prices = closes_table(&[
            ("A", vec![10.0, 10.0, 20.0, 20.0, 3.0, 3.0]),
            ("B", vec![10.0; 6]),
        ]);
        let pairs = PairsTrading::new("A", "B", params(SpreadKind::Ratio)).unwrap();
        let signals = pairs.generate_signals(&prices).unwrap();
        assert_eq!(signals.get("spread", 2), Some(2.0));

        let mut orders = OrderPlan::new(prices.len(), prices.assets());
        pairs.generate_positions(&signals, &mut orders).unwrap();
        assert_eq!(sizes(&orders, "A"), vec![0.0, 0.0, -1.0, 0.0, 1.0, 0.0]);
        assert_eq!(sizes(&orders, "B"), vec![0.0, 0.0, 1.0, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn spread_resting_on_threshold_does_not_cross() {
        // ratio 1.5 → 2.0: leaves from exactly on the entry line
        let prices = closes_table(&[
            ("A", vec![15.0, 20.0, 20.0, 20.0]),
            ("B", vec![10.0; 4]),
        ]);
        let pairs = PairsTrading::new("A", "B", params(SpreadKind::Ratio)).unwrap();
        let signals = pairs.generate_signals(&prices).unwrap();
        assert_eq!(signals.get("spread", 0), Some(1.5));

        let mut orders = OrderPlan::new(prices.len(), prices.assets());
        pairs.generate_positions(&signals, &mut orders).unwrap();
        assert_eq!(sizes(&orders, "A"), vec![0.0; 4]);
        assert_eq!(sizes(&orders, "B"), vec![0.0; 4]);
    }

    #[test]
    fn log_difference_enters_long_a() {
        let spread = [0.0, -2.0, -2.0, 0.1];
        let a: Vec<f64> = spread.iter().map(|s| 10.0 * f64::exp(*s)).collect();
        let prices = closes_table(&[("A", a), ("B", vec![10.0; 4])]);
        let pairs = PairsTrading::new("A", "B", params(SpreadKind::LogDifference)).unwrap();
        let signals = pairs.generate_signals(&prices).unwrap();

        let mut orders = OrderPlan::new(prices.len(), prices.assets());
        pairs.generate_positions(&signals, &mut orders).unwrap();
        assert_eq!(sizes(&orders, "A"), vec![0.0, 1.0, 0.0, -1.0]);
        assert_eq!(sizes(&orders, "B"), vec![0.0, -1.0, 0.0, 1.0]);
    }

    #[test]
    fn zscore_is_nan_during_warmup() {
        let b: Vec<f64> = (0..8).map(|t| 10.0 + t as f64).collect();
        let a: Vec<f64> = b.iter().enumerate().map(|(t, b)| 2.0 * b + if t % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let prices = closes_table(&[("A", a), ("B", b)]);
        let p = PairsParams { window: 4, ..params(SpreadKind::ZScore) };
        let pairs = PairsTrading::new("A", "B", p).unwrap();
        let signals = pairs.generate_signals(&prices).unwrap();

        let z = signals.column("spread").unwrap();
        assert!(z.iter().take(3).all(|v| v.is_nan()));
        assert!(z.iter().skip(3).all(|v| v.is_finite()));
        let hedge = signals.get("hedge_ratio", 0).unwrap();
        assert!((hedge - 2.0).abs() < 0.1);
    }

    #[test]
    fn runs_through_the_engine() {
        let prices = closes_table(&[
            ("A", vec![10.0, 10.0, 20.0, 18.0, 3.0, 3.0]),
            ("B", vec![10.0; 6]),
        ]);
        let pairs = PairsTrading::new("A", "B", params(SpreadKind::Ratio)).unwrap();
        let run = run_backtest(&pairs, &prices, &BacktestConfig::default()).unwrap();

        // short A from t = 2 (20) to t = 4 (3)
        assert_eq!(run.ledger().pnl().last().copied(), Some(100_017.0));
        assert_eq!(run.positions().position("A", 3), Some(-1.0));
        assert_eq!(run.positions().position("B", 5), Some(0.0));
        assert_eq!(run.strategy(), "pairs_A_B_ratio");
    }
}
