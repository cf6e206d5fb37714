/// data.rs — Validated OHLCV price table
///
/// The engine never fetches data; it consumes a `PriceTable` built either
/// from per-asset bar vectors or from a polars frame.  Validation happens
/// once, here, so the simulation loop can index without re-checking shape.
///
/// Layout: one (time × asset) matrix per field.  A missing observation is
/// stored as NaN and surfaced as `None`; it only becomes an error when a
/// nonzero position needs it.
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use polars::prelude::*;

use crate::error::{BacktestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Open, Field::High, Field::Low, Field::Close, Field::Volume];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Open   => "Open",
            Field::High   => "High",
            Field::Low    => "Low",
            Field::Close  => "Close",
            Field::Volume => "Volume",
        }
    }

    pub fn parse(s: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str().eq_ignore_ascii_case(s))
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// One OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open:   f64,
    pub high:   f64,
    pub low:    f64,
    pub close:  f64,
    pub volume: f64,
}

impl Bar {
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Open   => self.open,
            Field::High   => self.high,
            Field::Low    => self.low,
            Field::Close  => self.close,
            Field::Volume => self.volume,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceTable {
    index:  Vec<DateTime<Utc>>,
    assets: Vec<String>,
    lookup: AHashMap<String, usize>,
    fields: [Array2<f64>; 5],
}

impl PriceTable {
    /// Build from per-asset bar series aligned to `index`.
    /// `None` entries are missing observations.
    pub fn from_bars(
        index:  Vec<DateTime<Utc>>,
        series: Vec<(String, Vec<Option<Bar>>)>,
    ) -> Result<Self> {
        check_index(&index)?;
        if series.is_empty() {
            return Err(BacktestError::config("price table has no assets"));
        }

        let (n, m) = (index.len(), series.len());
        let mut fields: [Array2<f64>; 5] = std::array::from_fn(|_| Array2::from_elem((n, m), f64::NAN));
        let mut assets = Vec::with_capacity(m);

        for (j, (asset, bars)) in series.into_iter().enumerate() {
            if bars.len() != n {
                return Err(BacktestError::config(format!(
                    "asset {asset}: {} bars for an index of {n}",
                    bars.len()
                )));
            }
            for (t, bar) in bars.iter().enumerate() {
                if let Some(bar) = bar {
                    for field in Field::ALL {
                        fields[field.slot()][[t, j]] = bar.get(field);
                    }
                }
            }
            assets.push(asset);
        }

        Self::assemble(index, assets, fields)
    }

    /// Build from a polars frame with a `timestamp` column (RFC 3339 strings
    /// or epoch milliseconds) and one `<asset>.<Field>` column per asset and
    /// field.  Every asset must carry all five fields.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let ts = df
            .column("timestamp")
            .map_err(|_| BacktestError::config("price table has no `timestamp` column"))?;
        let index = parse_timestamps(ts)?;
        check_index(&index)?;

        let mut assets: Vec<String> = Vec::new();
        let mut columns: Vec<[Option<Vec<f64>>; 5]> = Vec::new();

        for col in df.get_columns() {
            let name = col.name().as_str();
            if name == "timestamp" {
                continue;
            }
            let (asset, field) = name
                .rsplit_once('.')
                .and_then(|(a, f)| Field::parse(f).map(|f| (a, f)))
                .ok_or_else(|| {
                    BacktestError::config(format!("column `{name}` is not `<asset>.<Field>`"))
                })?;

            let j = match assets.iter().position(|a| a == asset) {
                Some(j) => j,
                None => {
                    assets.push(asset.to_owned());
                    columns.push(Default::default());
                    assets.len() - 1
                }
            };
            columns[j][field.slot()] = Some(float_values(col)?);
        }

        if assets.is_empty() {
            return Err(BacktestError::config("price table has no assets"));
        }

        let (n, m) = (index.len(), assets.len());
        let mut fields: [Array2<f64>; 5] = std::array::from_fn(|_| Array2::from_elem((n, m), f64::NAN));
        for (j, per_field) in columns.into_iter().enumerate() {
            for field in Field::ALL {
                let values = per_field[field.slot()].as_ref().ok_or_else(|| {
                    BacktestError::config(format!(
                        "asset {} is missing the {} field",
                        assets[j],
                        field.as_str()
                    ))
                })?;
                for (t, v) in values.iter().enumerate() {
                    fields[field.slot()][[t, j]] = *v;
                }
            }
        }

        Self::assemble(index, assets, fields)
    }

    fn assemble(
        index:  Vec<DateTime<Utc>>,
        assets: Vec<String>,
        fields: [Array2<f64>; 5],
    ) -> Result<Self> {
        let mut lookup = AHashMap::with_capacity(assets.len());
        for (j, asset) in assets.iter().enumerate() {
            if lookup.insert(asset.clone(), j).is_some() {
                return Err(BacktestError::config(format!("duplicate asset {asset}")));
            }
        }
        Ok(Self { index, assets, lookup, fields })
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn timestamp(&self, t: usize) -> DateTime<Utc> {
        self.index[t]
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.lookup.get(asset).copied()
    }

    /// Observation at (asset column `j`, step `t`); `None` when missing.
    pub fn get(&self, field: Field, j: usize, t: usize) -> Option<f64> {
        let v = self.fields[field.slot()][[t, j]];
        (!v.is_nan()).then_some(v)
    }

    pub fn close(&self, j: usize, t: usize) -> Option<f64> {
        self.get(Field::Close, j, t)
    }

    /// Full series of one field for one asset, NaN where missing.
    pub fn series(&self, field: Field, asset: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.asset_index(asset)?;
        Some(self.fields[field.slot()].column(j))
    }
}

/// A time index must be non-empty and strictly increasing.
pub(crate) fn check_index(index: &[DateTime<Utc>]) -> Result<()> {
    if index.is_empty() {
        return Err(BacktestError::config("time index is empty"));
    }
    if let Some(w) = index.windows(2).position(|w| w[1] <= w[0]) {
        return Err(BacktestError::config(format!(
            "time index is not strictly increasing at position {}: {} then {}",
            w + 1,
            index[w],
            index[w + 1]
        )));
    }
    Ok(())
}

pub(crate) fn parse_timestamps(col: &Column) -> Result<Vec<DateTime<Utc>>> {
    let s = col.as_materialized_series();
    match s.dtype() {
        DataType::String => s
            .str()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let raw = v.ok_or_else(|| BacktestError::config(format!("null timestamp at row {i}")))?;
                DateTime::parse_from_rfc3339(raw)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| BacktestError::config(format!("timestamp `{raw}` at row {i}: {e}")))
            })
            .collect(),
        DataType::Int64 => s
            .i64()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.and_then(DateTime::from_timestamp_millis)
                    .ok_or_else(|| BacktestError::config(format!("invalid epoch-ms timestamp at row {i}")))
            })
            .collect(),
        other => Err(BacktestError::config(format!("unsupported timestamp column type {other}"))),
    }
}

/// Column values as f64; nulls become NaN.
pub(crate) fn float_values(col: &Column) -> Result<Vec<f64>> {
    let cast = col.as_materialized_series().cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn days(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|d| DateTime::from_timestamp(1_577_836_800 + 86_400 * d as i64, 0).unwrap())
            .collect()
    }

    pub(crate) fn flat_bar(close: f64) -> Bar {
        Bar { open: close, high: close, low: close, close, volume: 1_000.0 }
    }

    /// Table from close paths; `None` entries are gaps.
    pub(crate) fn closes_table(paths: &[(&str, Vec<Option<f64>>)]) -> PriceTable {
        let n = paths[0].1.len();
        let series = paths
            .iter()
            .map(|(asset, closes)| {
                (asset.to_string(), closes.iter().map(|c| c.map(flat_bar)).collect())
            })
            .collect();
        PriceTable::from_bars(days(n), series).unwrap()
    }

    #[test]
    fn builds_from_bars() {
        let table = closes_table(&[
            ("AAPL", vec![Some(100.0), Some(101.0), None]),
            ("MSFT", vec![Some(50.0), Some(51.0), Some(52.0)]),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.assets(), ["AAPL", "MSFT"]);
        assert_eq!(table.close(0, 1), Some(101.0));
        assert_eq!(table.close(0, 2), None);
        assert_eq!(table.asset_index("MSFT"), Some(1));
        assert_eq!(table.series(Field::Close, "MSFT").unwrap().to_vec(), vec![50.0, 51.0, 52.0]);
    }

    #[test]
    fn rejects_non_monotonic_index() {
        let mut index = days(3);
        index.swap(1, 2);
        let bars = vec![Some(flat_bar(1.0)); 3];
        let err = PriceTable::from_bars(index, vec![("X".into(), bars)]).unwrap_err();
        assert!(matches!(err, BacktestError::Configuration(_)), "{err}");
    }

    #[test]
    fn rejects_empty_asset_set_and_length_mismatch() {
        assert!(PriceTable::from_bars(days(2), vec![]).is_err());
        let short = vec![Some(flat_bar(1.0))];
        assert!(PriceTable::from_bars(days(2), vec![("X".into(), short)]).is_err());
    }

    #[test]
    fn rejects_duplicate_assets() {
        let bars = vec![Some(flat_bar(1.0)); 2];
        let err = PriceTable::from_bars(days(2), vec![("X".into(), bars.clone()), ("X".into(), bars)]);
        assert!(err.is_err());
    }

    #[test]
    fn from_dataframe_requires_all_fields() {
        let df = df!(
            "timestamp"   => ["2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"],
            "AAPL.Open"   => [1.0, 2.0],
            "AAPL.High"   => [1.0, 2.0],
            "AAPL.Low"    => [1.0, 2.0],
            "AAPL.Close"  => [1.0, 2.0],
        )
        .unwrap();
        let err = PriceTable::from_dataframe(&df).unwrap_err();
        assert!(err.to_string().contains("Volume"), "{err}");
    }

    #[test]
    fn from_dataframe_reads_assets_and_gaps() {
        let df = df!(
            "timestamp"    => [1_577_836_800_000i64, 1_577_923_200_000],
            "BRK.B.Open"   => [Some(1.0), None],
            "BRK.B.High"   => [Some(1.0), None],
            "BRK.B.Low"    => [Some(1.0), None],
            "BRK.B.Close"  => [Some(1.0), None],
            "BRK.B.Volume" => [Some(10.0), None],
        )
        .unwrap();
        let table = PriceTable::from_dataframe(&df).unwrap();
        assert_eq!(table.assets(), ["BRK.B"]);
        assert_eq!(table.close(0, 0), Some(1.0));
        assert_eq!(table.close(0, 1), None);
        assert_eq!(table.timestamp(1), days(2)[1]);
    }
}
