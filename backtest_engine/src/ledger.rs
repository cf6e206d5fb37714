/// ledger.rs — Causal position / cash / P&L state
///
/// ─────────────────────────────────────────────────────────────────────────
/// ACCOUNTING
/// ─────────────────────────────────────────────────────────────────────────
///
///   position[a, t] = position[a, t−1] + order_size[a, t]      (t0: 0 + order)
///   pnl[t]         = pnl[t−1] + Σ_a position[a, t−1] · (close[a, t] − close[a, t−1])
///   cash[t]        = cash[t−1] (+ proceeds booked by the sizer)
///   returns[t]     = pnl[t] / pnl[t−1] − 1      (0 when pnl[t−1] = 0)
///
/// The position that earns the move from t−1 to t is the one held going
/// INTO the step.  An order placed at t only starts earning at t+1.
///
/// Step protocol, strictly in time order:
///   begin_step(t) → apply_order(·, t, ·)* → accrue(t) → book_cash(t, ·)*
/// Row t0 is open for seed orders from construction and is valued at
/// `init_cash` without accrual.
/// ─────────────────────────────────────────────────────────────────────────
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};

use crate::data::PriceTable;
use crate::error::{BacktestError, Result};

/// Position history: one `position` and one `order_size` per (t, asset).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFrame {
    index:      Vec<DateTime<Utc>>,
    assets:     Vec<String>,
    position:   Array2<f64>,
    order_size: Array2<f64>,
}

impl PositionFrame {
    pub(crate) fn from_parts(
        index:      Vec<DateTime<Utc>>,
        assets:     Vec<String>,
        position:   Array2<f64>,
        order_size: Array2<f64>,
    ) -> Result<Self> {
        let shape = (index.len(), assets.len());
        if position.dim() != shape || order_size.dim() != shape {
            return Err(BacktestError::config(format!(
                "position frame shape {:?}/{:?}, expected {shape:?}",
                position.dim(),
                order_size.dim()
            )));
        }
        Ok(Self { index, assets, position, order_size })
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// (time × asset) positions, columns ordered as `assets()`.
    pub fn positions(&self) -> &Array2<f64> {
        &self.position
    }

    /// (time × asset) order sizes, columns ordered as `assets()`.
    pub fn order_sizes(&self) -> &Array2<f64> {
        &self.order_size
    }

    pub fn position(&self, asset: &str, t: usize) -> Option<f64> {
        let j = self.column_of(asset)?;
        self.position.get((t, j)).copied()
    }

    pub fn order_size(&self, asset: &str, t: usize) -> Option<f64> {
        let j = self.column_of(asset)?;
        self.order_size.get((t, j)).copied()
    }

    pub fn position_series(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.column_of(asset)?;
        Some(self.position.column(j))
    }

    /// Any asset holds a nonzero position at `t`.
    pub fn is_invested(&self, t: usize) -> bool {
        self.position.row(t).iter().any(|&p| p != 0.0)
    }

    /// Any asset trades at `t`.
    pub fn has_order(&self, t: usize) -> bool {
        self.order_size.row(t).iter().any(|&o| o != 0.0)
    }

    fn column_of(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }
}

/// Portfolio-level rows: cash, pnl, returns per timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerFrame {
    index:   Vec<DateTime<Utc>>,
    cash:    Vec<f64>,
    pnl:     Vec<f64>,
    returns: Vec<f64>,
}

impl LedgerFrame {
    pub(crate) fn from_parts(
        index:   Vec<DateTime<Utc>>,
        cash:    Vec<f64>,
        pnl:     Vec<f64>,
        returns: Vec<f64>,
    ) -> Result<Self> {
        let n = index.len();
        if cash.len() != n || pnl.len() != n || returns.len() != n {
            return Err(BacktestError::config(format!(
                "ledger columns have {}/{}/{} rows for an index of {n}",
                cash.len(),
                pnl.len(),
                returns.len()
            )));
        }
        Ok(Self { index, cash, pnl, returns })
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn cash(&self) -> &[f64] {
        &self.cash
    }

    pub fn pnl(&self) -> &[f64] {
        &self.pnl
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }
}

#[derive(Debug)]
pub struct Ledger {
    positions:  PositionFrame,
    rows:       LedgerFrame,
    /// Last step whose positions have been carried forward (open for orders).
    carried:    usize,
    /// Last step whose pnl is committed.
    valued:     usize,
    last_order: Vec<Option<usize>>,
}

impl Ledger {
    /// Zero-filled ledger with `pnl[t0] = init_cash`, `cash[t0] = 0`.
    pub fn new(assets: &[String], index: &[DateTime<Utc>], init_cash: f64) -> Result<Self> {
        crate::data::check_index(index)?;
        if assets.is_empty() {
            return Err(BacktestError::config("ledger needs at least one asset"));
        }
        if !(init_cash.is_finite() && init_cash > 0.0) {
            return Err(BacktestError::config(format!("init_cash must be positive, got {init_cash}")));
        }

        let shape = (index.len(), assets.len());
        let positions = PositionFrame::from_parts(
            index.to_vec(),
            assets.to_vec(),
            Array2::zeros(shape),
            Array2::zeros(shape),
        )?;

        let n = index.len();
        let mut pnl = vec![0.0; n];
        pnl[0] = init_cash;
        let rows = LedgerFrame::from_parts(index.to_vec(), vec![0.0; n], pnl, vec![0.0; n])?;

        Ok(Self {
            positions,
            rows,
            carried: 0,
            valued: 0,
            last_order: vec![None; assets.len()],
        })
    }

    pub fn positions(&self) -> &PositionFrame {
        &self.positions
    }

    pub fn rows(&self) -> &LedgerFrame {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every step has been valued.
    pub fn is_complete(&self) -> bool {
        self.valued + 1 == self.len()
    }

    /// Open step `t`: every position carries over from `t − 1`.
    pub fn begin_step(&mut self, t: usize) -> Result<()> {
        if t == 0 || t != self.carried + 1 || t >= self.len() {
            return Err(self.violation(t, format!(
                "step opened out of order (last open step {})",
                self.carried
            )));
        }
        if self.valued != self.carried {
            return Err(self.violation(t, format!("step {} was never accrued", self.carried)));
        }

        let (prev, mut next) = self.positions.position.multi_slice_mut((
            ndarray::s![t - 1, ..],
            ndarray::s![t, ..],
        ));
        next.assign(&prev);
        self.carried = t;
        Ok(())
    }

    /// Record an order for asset column `j` at the open step `t`.
    pub fn apply_order(&mut self, j: usize, t: usize, size: f64) -> Result<()> {
        let open = t == self.carried && (t == 0 || self.valued + 1 == t);
        if !open {
            return Err(self.violation(t, format!(
                "order for {} outside the open step {}",
                self.asset_name(j),
                self.carried
            )));
        }
        if j >= self.last_order.len() {
            return Err(BacktestError::config(format!("asset column {j} out of range")));
        }
        if self.last_order[j] == Some(t) {
            return Err(self.violation(t, format!("second order for {}", self.asset_name(j))));
        }

        let prev = if t == 0 { 0.0 } else { self.positions.position[[t - 1, j]] };
        self.positions.order_size[[t, j]] = size;
        self.positions.position[[t, j]] = prev + size;
        self.last_order[j] = Some(t);
        Ok(())
    }

    /// Value step `t` from the positions held going into it.
    pub fn accrue(&mut self, t: usize, prices: &PriceTable) -> Result<()> {
        if t == 0 || t != self.valued + 1 || self.carried != t {
            return Err(self.violation(t, format!(
                "accrual out of order (valued through {}, open step {})",
                self.valued,
                self.carried
            )));
        }
        if prices.assets().len() != self.positions.assets.len() {
            return Err(BacktestError::config("price table and ledger disagree on the asset set"));
        }

        let mut delta = 0.0;
        for j in 0..self.positions.assets.len() {
            let held = self.positions.position[[t - 1, j]];
            let now = self.positions.position[[t, j]];
            if held != 0.0 {
                let p0 = self.mark(prices, j, t - 1, held)?;
                let p1 = self.mark(prices, j, t, held)?;
                delta += held * (p1 - p0);
            } else if now != 0.0 {
                // not earning yet, but must be priceable from here on
                self.mark(prices, j, t, now)?;
            }
        }

        let rows = &mut self.rows;
        let prev = rows.pnl[t - 1];
        rows.pnl[t] = prev + delta;
        rows.cash[t] = rows.cash[t - 1];
        rows.returns[t] = if prev == 0.0 { 0.0 } else { rows.pnl[t] / prev - 1.0 };
        self.valued = t;
        Ok(())
    }

    /// Add sizer-booked proceeds to the cash of step `t` (after accrual).
    pub fn book_cash(&mut self, t: usize, amount: f64) -> Result<()> {
        if t != self.carried || self.valued != t {
            return Err(self.violation(t, "cash booked outside the valued open step".to_string()));
        }
        self.rows.cash[t] += amount;
        Ok(())
    }

    /// Every nonzero position at `t` must have a close at `t`.
    pub fn check_marks(&self, t: usize, prices: &PriceTable) -> Result<()> {
        for (j, &p) in self.positions.position.row(t).iter().enumerate() {
            if p != 0.0 {
                self.mark(prices, j, t, p)?;
            }
        }
        Ok(())
    }

    /// Hand out the finished frames.  Fails if any step is unvalued.
    pub fn into_frames(self) -> Result<(PositionFrame, LedgerFrame)> {
        if !self.is_complete() {
            let t = self.valued + 1;
            return Err(self.violation(t, format!(
                "ledger closed after {} of {} steps",
                self.valued + 1,
                self.len()
            )));
        }
        Ok((self.positions, self.rows))
    }

    fn mark(&self, prices: &PriceTable, j: usize, t: usize, position: f64) -> Result<f64> {
        prices.close(j, t).ok_or_else(|| BacktestError::DataGap {
            asset:     self.asset_name(j).to_owned(),
            timestamp: self.rows.index[t],
            position,
        })
    }

    fn asset_name(&self, j: usize) -> &str {
        self.positions.assets.get(j).map(String::as_str).unwrap_or("<unknown>")
    }

    fn violation(&self, t: usize, detail: String) -> BacktestError {
        let idx = &self.rows.index;
        BacktestError::Causality {
            step:      t,
            timestamp: idx[t.min(idx.len() - 1)],
            detail,
        }
    }
}
