/// backtest.rs — Time-stepped Backtesting Engine
///
/// Runs a strategy's two batch hooks, then walks the time index exactly
/// once, committing each step to the ledger before moving on.
///
/// ARCHITECTURE
/// ┌───────────────────────────────────────────────────────┐
/// │  PriceTable (validated, read-only)                    │
/// │        │                                              │
/// │        ▼                                              │
/// │  Strategy::generate_signals   → SignalFrame           │
/// │  Strategy::generate_positions → OrderPlan             │
/// │        │                                              │
/// │   ┌────┴────────────────────────────────┐             │
/// │   │  t0:  seed orders, check marks      │             │
/// │   │  t ≥ 1:                             │             │
/// │   │   ├─ begin_step(t)  carry positions │             │
/// │   │   ├─ apply_order(a, t) orders ≠ 0   │             │
/// │   │   ├─ accrue(t)      pnl / returns   │             │
/// │   │   └─ book_cash(t)   sizer proceeds  │             │
/// │   └────┬────────────────────────────────┘             │
/// │        │                                              │
/// │  compute_metrics(positions, ledger)                   │
/// │        │                                              │
/// │  BacktestRun { signals, positions, ledger, metrics }  │
/// └───────────────────────────────────────────────────────┘
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::BacktestConfig;
use crate::data::PriceTable;
use crate::error::{BacktestError, Result};
use crate::ledger::{Ledger, LedgerFrame, PositionFrame};
use crate::metrics::{compute_metrics, MetricsSnapshot};
use crate::signals::SignalFrame;
use crate::strategy::{OrderPlan, Strategy};

/// Everything one run produced.  Read-only once returned.
#[derive(Debug, Clone)]
pub struct BacktestRun {
    strategy:  String,
    signals:   SignalFrame,
    positions: PositionFrame,
    ledger:    LedgerFrame,
    metrics:   MetricsSnapshot,
}

impl BacktestRun {
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn signals(&self) -> &SignalFrame {
        &self.signals
    }

    pub fn positions(&self) -> &PositionFrame {
        &self.positions
    }

    pub fn ledger(&self) -> &LedgerFrame {
        &self.ledger
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }
}

/// Run a complete backtest of `strategy` over `prices`.
pub fn run_backtest<S>(strategy: &S, prices: &PriceTable, cfg: &BacktestConfig) -> Result<BacktestRun>
where
    S: Strategy + ?Sized,
{
    cfg.validate()?;
    let name = strategy.name().to_owned();

    info!("═══════════════════════════════════════════════");
    info!("  BACKTEST `{}` — {} bars × {} assets", name, prices.len(), prices.assets().len());
    info!("═══════════════════════════════════════════════");

    // ── Strategy hooks: fully materialised before the first step ──────────
    let signals = strategy
        .generate_signals(prices)
        .map_err(|source| BacktestError::Strategy { name: name.clone(), source })?;
    if signals.index() != prices.index() {
        return Err(BacktestError::config(format!(
            "strategy `{name}` produced signals over a different index ({} rows, table has {})",
            signals.len(),
            prices.len()
        )));
    }

    let mut orders = OrderPlan::new(prices.len(), prices.assets());
    strategy
        .generate_positions(&signals, &mut orders)
        .map_err(|source| BacktestError::Strategy { name: name.clone(), source })?;
    debug!("strategy `{}`: {} signal columns", name, signals.names().len());

    // ── Main loop ─────────────────────────────────────────────────────────
    let ledger = simulate(prices, &orders, cfg)?;
    let (positions, ledger) = ledger.into_frames()?;

    // ── Compute metrics ───────────────────────────────────────────────────
    let metrics = compute_metrics(&positions, &ledger, cfg.periods_per_year);
    info!(
        "`{}` done: trades={} sharpe={:.3} max_dd={:.2}% yearly={:.2}%",
        name, metrics.number_of_trades, metrics.sharpe_ratio, metrics.max_drawdown, metrics.yearly_return
    );
    if cfg.verbose {
        info!("\n{}", metrics);
    }

    Ok(BacktestRun { strategy: name, signals, positions, ledger, metrics })
}

/// Walk the index once, committing every step to a fresh ledger.
pub fn simulate(prices: &PriceTable, orders: &OrderPlan, cfg: &BacktestConfig) -> Result<Ledger> {
    if orders.len() != prices.len() || orders.assets() != prices.assets() {
        return Err(BacktestError::config("order plan does not match the price table"));
    }

    let mut ledger = Ledger::new(prices.assets(), prices.index(), cfg.init_cash)?;

    // t0: seed positions only, valued at init_cash
    apply_row(&mut ledger, prices, orders, 0)?;
    ledger.check_marks(0, prices)?;
    book_row(&mut ledger, orders, 0)?;

    for t in 1..prices.len() {
        ledger.begin_step(t)?;
        apply_row(&mut ledger, prices, orders, t)?;
        ledger.accrue(t, prices)?;
        book_row(&mut ledger, orders, t)?;

        if cfg.verbose && t % cfg.progress_every == 0 {
            info!(
                "  [Step {:>6}/{}] {}  pnl={:.2}",
                t,
                prices.len() - 1,
                prices.timestamp(t).format("%Y-%m-%d %H:%M"),
                ledger.rows().pnl()[t]
            );
        }
    }

    Ok(ledger)
}

fn apply_row(ledger: &mut Ledger, prices: &PriceTable, orders: &OrderPlan, t: usize) -> Result<()> {
    for (j, &size) in orders.row(t).iter().enumerate() {
        if size.is_nan() || size == 0.0 {
            continue;
        }
        if size.is_infinite() {
            return Err(BacktestError::config(format!(
                "infinite order for {} at {}",
                prices.assets()[j],
                prices.timestamp(t)
            )));
        }
        ledger.apply_order(j, t, size)?;
    }
    Ok(())
}

fn book_row(ledger: &mut Ledger, orders: &OrderPlan, t: usize) -> Result<()> {
    let cash = orders.cash_flow(t);
    if cash != 0.0 && cash.is_finite() {
        ledger.book_cash(t, cash)?;
    }
    Ok(())
}

/// Evaluate independent strategies over the same table in parallel.
///
/// Each run owns its own ledger; results come back in input order.
pub fn run_sweep<S>(strategies: &[S], prices: &PriceTable, cfg: &BacktestConfig) -> Vec<Result<BacktestRun>>
where
    S: Strategy + Sync,
{
    info!("Sweep: {} strategies over {} bars", strategies.len(), prices.len());
    strategies
        .par_iter()
        .map(|s| run_backtest(s, prices, cfg))
        .collect()
}
