/// metrics.rs — Performance Metrics
///
/// ─────────────────────────────────────────────────────────────────────────
/// FORMULAS
/// ─────────────────────────────────────────────────────────────────────────
///
/// P = periods per year (252 for daily bars).
///
/// INVESTED RETURNS
///   r_inv = { returns[t] : t > t0, some asset held position[a, t−1] ≠ 0 }
///   The return at t is earned by the book held going into t.
///
/// SHARPE RATIO (annualised)
///   SR  = √P · mean(r_inv) / std(r_inv)
///
/// SORTINO RATIO (annualised)
///   σ_d = √(mean(min(r_inv, 0)²))   (downside deviation)
///   SoR = √P · mean(r_inv) / σ_d
///
/// MAXIMUM DRAWDOWN (percent, ≤ 0)
///   peak_t = max_{s ≤ t}(pnl_s)
///   MaxDD  = 100 · min_t { (pnl_t − peak_t) / peak_t }
///
/// YEARLY RETURN (percent, compound)
///   CAGR = 100 · ((pnl_last / pnl_first)^(P / (n−1)) − 1)
///
/// CALMAR RATIO
///   Calmar = CAGR / |MaxDD|
///
/// VOLATILITY (annualised, whole series)
///   σ_ann = std(returns) · √P
///
/// WIN / LOSS
///   win_rate  = #(r_inv > 0) / #r_inv        avg_win  = mean(r_inv | r > 0)
///   loss_rate = #(r_inv < 0) / #r_inv        avg_loss = mean(r_inv | r < 0)
///
/// TRADES
///   number of timestamps at which any asset has order_size ≠ 0
///
/// std is the sample deviation (n−1).  Every metric falls back to 0 on its
/// own when its formula degenerates (empty sample, zero deviation, zero or
/// negative base value, non-finite result); one degenerate metric never
/// prevents the others from being computed.
/// ─────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::ledger::{LedgerFrame, PositionFrame};

/// Deviations below this are treated as zero.
const STD_EPSILON: f64 = 1e-12;

/// Complete, read-only metric set of one backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sharpe_ratio:          f64,
    pub sortino_ratio:         f64,
    pub max_drawdown:          f64, // percent (negative)
    pub calmar_ratio:          f64,
    pub yearly_return:         f64, // percent
    pub total_return:          f64, // percent
    pub annualized_volatility: f64,
    pub average_return:        f64,
    pub average_win:           f64,
    pub average_loss:          f64,
    pub win_rate:              f64,
    pub loss_rate:             f64,
    pub number_of_trades:      usize,
}

impl MetricsSnapshot {
    pub const NAMES: [&'static str; 13] = [
        "sharpe_ratio",
        "sortino_ratio",
        "max_drawdown",
        "calmar_ratio",
        "yearly_return",
        "total_return",
        "annualized_volatility",
        "average_return",
        "average_win",
        "average_loss",
        "win_rate",
        "loss_rate",
        "number_of_trades",
    ];

    /// (name, value) pairs in `NAMES` order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        let values = [
            self.sharpe_ratio,
            self.sortino_ratio,
            self.max_drawdown,
            self.calmar_ratio,
            self.yearly_return,
            self.total_return,
            self.annualized_volatility,
            self.average_return,
            self.average_win,
            self.average_loss,
            self.win_rate,
            self.loss_rate,
            self.number_of_trades as f64,
        ];
        Self::NAMES.into_iter().zip(values)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BACKTEST PERFORMANCE REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Trades         : {}", self.number_of_trades)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Loss Rate      : {:.2}%", self.loss_rate * 100.0)?;
        writeln!(f, "  Avg Return     : {:.4}%", self.average_return * 100.0)?;
        writeln!(f, "  Avg Win        : {:.4}%", self.average_win * 100.0)?;
        writeln!(f, "  Avg Loss       : {:.4}%", self.average_loss * 100.0)?;
        writeln!(f, "  Total Return   : {:.2}%", self.total_return)?;
        writeln!(f, "  Yearly Return  : {:.2}%", self.yearly_return)?;
        writeln!(f, "  Volatility     : {:.4}", self.annualized_volatility)?;
        writeln!(f, "  Sharpe Ratio   : {:.3}", self.sharpe_ratio)?;
        writeln!(f, "  Sortino Ratio  : {:.3}", self.sortino_ratio)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown)?;
        writeln!(f, "  Calmar Ratio   : {:.3}", self.calmar_ratio)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

/// Compute every metric from a finished position history and ledger.
///
/// Pure function of its inputs: calling it twice yields the same snapshot.
pub fn compute_metrics(
    positions:        &PositionFrame,
    ledger:           &LedgerFrame,
    periods_per_year: f64,
) -> MetricsSnapshot {
    let pnl = ledger.pnl();
    let returns = ledger.returns();
    let n = pnl.len().min(positions.len());
    let ann = periods_per_year.sqrt();

    let invested: Vec<f64> = (1..n)
        .filter(|&t| positions.is_invested(t - 1))
        .map(|t| returns[t])
        .collect();
    let winners: Vec<f64> = invested.iter().copied().filter(|&r| r > 0.0).collect();
    let losers: Vec<f64> = invested.iter().copied().filter(|&r| r < 0.0).collect();

    // ── Sharpe / Sortino ──────────────────────────────────────────────────
    let r_mean = mean(&invested);
    let sharpe_ratio = match std_dev(&invested) {
        sd if sd > STD_EPSILON => finite_or_zero(ann * r_mean / sd),
        _ => 0.0,
    };

    let downside_sq: Vec<f64> = invested.iter().map(|&r| r.min(0.0).powi(2)).collect();
    let sigma_d = mean(&downside_sq).sqrt();
    let sortino_ratio = if sigma_d > STD_EPSILON {
        finite_or_zero(ann * r_mean / sigma_d)
    } else {
        0.0
    };

    // ── Drawdown / growth ─────────────────────────────────────────────────
    let max_drawdown = finite_or_zero(100.0 * max_drawdown(&pnl[..n]));
    let yearly_return = yearly_return(&pnl[..n], periods_per_year);
    let total_return = match (pnl.first(), pnl[..n].last()) {
        (Some(&first), Some(&last)) if first > 0.0 => finite_or_zero(100.0 * (last / first - 1.0)),
        _ => 0.0,
    };
    let calmar_ratio = if max_drawdown.abs() < 1e-10 {
        0.0
    } else {
        finite_or_zero(yearly_return / max_drawdown.abs())
    };

    // ── Distribution of invested returns ──────────────────────────────────
    let annualized_volatility = finite_or_zero(std_dev(&returns[..n]) * ann);
    let (win_rate, loss_rate) = if invested.is_empty() {
        (0.0, 0.0)
    } else {
        let k = invested.len() as f64;
        (winners.len() as f64 / k, losers.len() as f64 / k)
    };

    let number_of_trades = (0..n).filter(|&t| positions.has_order(t)).count();

    MetricsSnapshot {
        sharpe_ratio,
        sortino_ratio,
        max_drawdown,
        calmar_ratio,
        yearly_return,
        total_return,
        annualized_volatility,
        average_return: r_mean,
        average_win: mean(&winners),
        average_loss: mean(&losers),
        win_rate,
        loss_rate,
        number_of_trades,
    }
}

/// Worst peak-to-trough fall of a pnl path as a fraction (≤ 0).
/// Points under a non-positive running peak are skipped.
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    pnl.iter().fold(0.0f64, |worst, &v| {
        peak = peak.max(v);
        if peak > 0.0 { worst.min((v - peak) / peak) } else { worst }
    })
}

/// Compound annual growth in percent; 0 when undefined.
pub fn yearly_return(pnl: &[f64], periods_per_year: f64) -> f64 {
    let n = pnl.len();
    if n <= 1 || pnl[0] <= 0.0 {
        return 0.0;
    }
    let growth = pnl[n - 1] / pnl[0];
    finite_or_zero(100.0 * (growth.powf(periods_per_year / (n - 1) as f64) - 1.0))
}

// ── Statistical helpers ───────────────────────────────────────────────────

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    finite_or_zero(data.mean())
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    finite_or_zero(data.std_dev())
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}
