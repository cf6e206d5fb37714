/// report.rs — Persistence of a finished run
///
/// Three delimited-text tables keyed by the same RFC 3339 time index, plus
/// the metric snapshot as JSON:
///
///   signals.csv    timestamp, <signal>...
///   positions.csv  timestamp, <asset>.position, <asset>.order_size, ...
///   pnl.csv        timestamp, cash, pnl, returns
///   metrics.json   { "sharpe_ratio": ..., ... }
///
/// Reloading the tables and recomputing metrics reproduces the snapshot.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use polars::prelude::*;
use tracing::info;

use crate::backtest::BacktestRun;
use crate::data::{check_index, float_values, parse_timestamps};
use crate::error::{BacktestError, Result};
use crate::ledger::{LedgerFrame, PositionFrame};
use crate::metrics::{compute_metrics, MetricsSnapshot};
use crate::signals::SignalFrame;

pub const SIGNALS_FILE:   &str = "signals.csv";
pub const POSITIONS_FILE: &str = "positions.csv";
pub const LEDGER_FILE:    &str = "pnl.csv";
pub const METRICS_FILE:   &str = "metrics.json";

/// Tables reloaded from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub signals:   SignalFrame,
    pub positions: PositionFrame,
    pub ledger:    LedgerFrame,
}

impl StoredRun {
    /// Re-derive the metric snapshot from the reloaded tables.
    pub fn evaluate(&self, periods_per_year: f64) -> MetricsSnapshot {
        compute_metrics(&self.positions, &self.ledger, periods_per_year)
    }
}

/// Write every artifact of `run` into `dir` (created if missing).
pub fn save_run(run: &BacktestRun, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    write_csv(&mut signals_frame(run.signals())?, &dir.join(SIGNALS_FILE))?;
    write_csv(&mut positions_frame(run.positions())?, &dir.join(POSITIONS_FILE))?;
    write_csv(&mut ledger_frame(run.ledger())?, &dir.join(LEDGER_FILE))?;
    save_metrics(run.metrics(), dir.join(METRICS_FILE))?;

    info!("Run `{}` saved to: {}", run.strategy(), dir.display());
    Ok(())
}

pub fn save_metrics(metrics: &MetricsSnapshot, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(metrics)?;
    fs::write(path.as_ref(), json)?;
    Ok(())
}

pub fn load_metrics(path: impl AsRef<Path>) -> Result<MetricsSnapshot> {
    let raw = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&raw)?)
}

/// Reload the three tables written by `save_run`.
pub fn load_run(dir: impl AsRef<Path>) -> Result<StoredRun> {
    let dir = dir.as_ref();

    let signals = read_signals(&read_csv(dir.join(SIGNALS_FILE))?)?;
    let positions = read_positions(&read_csv(dir.join(POSITIONS_FILE))?)?;
    let ledger = read_ledger(&read_csv(dir.join(LEDGER_FILE))?)?;

    if positions.index() != signals.index() || ledger.index() != signals.index() {
        return Err(BacktestError::config(format!(
            "tables in {} do not share one time index",
            dir.display()
        )));
    }

    info!("Run loaded from: {} ({} rows)", dir.display(), ledger.len());
    Ok(StoredRun { signals, positions, ledger })
}

// ── Frame builders ────────────────────────────────────────────────────────

fn timestamp_column(index: &[DateTime<Utc>]) -> Column {
    let ts: Vec<String> = index.iter().map(|t| t.to_rfc3339()).collect();
    Series::new("timestamp".into(), ts).into()
}

fn float_column(name: &str, values: Vec<f64>) -> Column {
    Series::new(name.into(), values).into()
}

fn signals_frame(signals: &SignalFrame) -> Result<DataFrame> {
    let mut columns = vec![timestamp_column(signals.index())];
    for (j, name) in signals.names().iter().enumerate() {
        columns.push(float_column(name, signals.values().column(j).to_vec()));
    }
    Ok(DataFrame::new(columns)?)
}

fn positions_frame(positions: &PositionFrame) -> Result<DataFrame> {
    let mut columns = vec![timestamp_column(positions.index())];
    for (j, asset) in positions.assets().iter().enumerate() {
        columns.push(float_column(&format!("{asset}.position"), positions.positions().column(j).to_vec()));
        columns.push(float_column(&format!("{asset}.order_size"), positions.order_sizes().column(j).to_vec()));
    }
    Ok(DataFrame::new(columns)?)
}

fn ledger_frame(ledger: &LedgerFrame) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        timestamp_column(ledger.index()),
        float_column("cash", ledger.cash().to_vec()),
        float_column("pnl", ledger.pnl().to_vec()),
        float_column("returns", ledger.returns().to_vec()),
    ])?)
}

// ── Frame readers ─────────────────────────────────────────────────────────

fn read_index(df: &DataFrame) -> Result<Vec<DateTime<Utc>>> {
    let ts = df
        .column("timestamp")
        .map_err(|_| BacktestError::config("table has no `timestamp` column"))?;
    let index = parse_timestamps(ts)?;
    check_index(&index)?;
    Ok(index)
}

fn read_signals(df: &DataFrame) -> Result<SignalFrame> {
    let mut signals = SignalFrame::new(read_index(df)?);
    for col in df.get_columns() {
        let name = col.name().as_str();
        if name != "timestamp" {
            signals.insert(name, float_values(col)?)?;
        }
    }
    Ok(signals)
}

fn read_positions(df: &DataFrame) -> Result<PositionFrame> {
    let index = read_index(df)?;
    let mut assets: Vec<String> = Vec::new();
    let mut columns: Vec<(Option<Vec<f64>>, Option<Vec<f64>>)> = Vec::new();

    for col in df.get_columns() {
        let name = col.name().as_str();
        if name == "timestamp" {
            continue;
        }
        let (asset, kind) = name
            .rsplit_once('.')
            .ok_or_else(|| BacktestError::config(format!("position column `{name}` has no asset prefix")))?;
        let j = match assets.iter().position(|a| a == asset) {
            Some(j) => j,
            None => {
                assets.push(asset.to_owned());
                columns.push((None, None));
                assets.len() - 1
            }
        };
        let values = float_values(col)?;
        match kind {
            "position"   => columns[j].0 = Some(values),
            "order_size" => columns[j].1 = Some(values),
            other => {
                return Err(BacktestError::config(format!("unknown position column kind `{other}`")));
            }
        }
    }

    let (n, m) = (index.len(), assets.len());
    let mut position = Array2::zeros((n, m));
    let mut order_size = Array2::zeros((n, m));
    for (j, (pos, ord)) in columns.into_iter().enumerate() {
        let (Some(pos), Some(ord)) = (pos, ord) else {
            return Err(BacktestError::config(format!(
                "asset {} needs both position and order_size columns",
                assets[j]
            )));
        };
        for t in 0..n {
            position[[t, j]] = pos[t];
            order_size[[t, j]] = ord[t];
        }
    }

    PositionFrame::from_parts(index, assets, position, order_size)
}

fn read_ledger(df: &DataFrame) -> Result<LedgerFrame> {
    let index = read_index(df)?;
    let field = |name: &str| -> Result<Vec<f64>> {
        let col = df
            .column(name)
            .map_err(|_| BacktestError::config(format!("ledger table has no `{name}` column")))?;
        float_values(col)
    };
    LedgerFrame::from_parts(index, field("cash")?, field("pnl")?, field("returns")?)
}

// ── CSV I/O ───────────────────────────────────────────────────────────────

fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = fs::File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)?;
    info!("CSV exported to: {}", path.display());
    Ok(())
}

fn read_csv(path: PathBuf) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path))?
        .finish()?;
    Ok(df)
}
