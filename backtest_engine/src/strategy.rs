/// strategy.rs — Strategy hooks and the order plan handed to the loop
///
/// A strategy is two batch hooks: signals for the whole index, then order
/// sizes for the whole index.  Both run before the first simulated step;
/// the loop only ever reads the finished `OrderPlan`.
use ndarray::{Array2, ArrayView1};

use crate::data::PriceTable;
use crate::error::{BacktestError, Result};
use crate::signals::SignalFrame;

pub trait Strategy {
    fn name(&self) -> &str;

    /// Materialise every signal column for the table's full index.
    fn generate_signals(&self, prices: &PriceTable) -> anyhow::Result<SignalFrame>;

    /// Fill `orders` (zero-initialised, one row per timestamp) from `signals`.
    fn generate_positions(&self, signals: &SignalFrame, orders: &mut OrderPlan) -> anyhow::Result<()>;
}

/// Order sizes per (timestamp, asset), plus optional cash proceeds the
/// sizer chooses to book.  Row 0 seeds the initial position.
///
/// Unset entries are zero.  NaN entries are treated as unset.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    assets:    Vec<String>,
    sizes:     Array2<f64>,
    cash_flow: Vec<f64>,
}

impl OrderPlan {
    pub fn new(n_steps: usize, assets: &[String]) -> Self {
        Self {
            assets:    assets.to_vec(),
            sizes:     Array2::zeros((n_steps, assets.len())),
            cash_flow: vec![0.0; n_steps],
        }
    }

    pub fn len(&self) -> usize {
        self.sizes.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.nrows() == 0
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Set the signed order size for `asset` at step `t`.
    pub fn set(&mut self, asset: &str, t: usize, size: f64) -> Result<()> {
        let j = self.column_of(asset)?;
        let n = self.len();
        let cell = self
            .sizes
            .get_mut((t, j))
            .ok_or_else(|| BacktestError::config(format!("order step {t} outside 0..{n}")))?;
        *cell = size;
        Ok(())
    }

    pub fn get(&self, asset: &str, t: usize) -> Option<f64> {
        let j = self.assets.iter().position(|a| a == asset)?;
        self.sizes.get((t, j)).copied()
    }

    /// Cash proceeds booked at step `t` (metric-inert).
    pub fn book_cash(&mut self, t: usize, amount: f64) -> Result<()> {
        let n = self.len();
        let cell = self
            .cash_flow
            .get_mut(t)
            .ok_or_else(|| BacktestError::config(format!("cash step {t} outside 0..{n}")))?;
        *cell += amount;
        Ok(())
    }

    pub(crate) fn row(&self, t: usize) -> ArrayView1<'_, f64> {
        self.sizes.row(t)
    }

    pub(crate) fn cash_flow(&self, t: usize) -> f64 {
        self.cash_flow[t]
    }

    fn column_of(&self, asset: &str) -> Result<usize> {
        self.assets
            .iter()
            .position(|a| a == asset)
            .ok_or_else(|| BacktestError::config(format!("order for unknown asset {asset}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_initialised() {
        let plan = OrderPlan::new(3, &["A".to_string(), "B".to_string()]);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.get("B", 2), Some(0.0));
        assert_eq!(plan.cash_flow(1), 0.0);
    }

    #[test]
    fn set_validates_asset_and_step() {
        let mut plan = OrderPlan::new(2, &["A".to_string()]);
        plan.set("A", 1, -2.5).unwrap();
        assert_eq!(plan.get("A", 1), Some(-2.5));
        assert!(plan.set("Z", 1, 1.0).is_err());
        assert!(plan.set("A", 2, 1.0).is_err());
        assert!(plan.book_cash(5, 1.0).is_err());
    }
}
