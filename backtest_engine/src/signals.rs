/// signals.rs — Named signal columns aligned to the time index
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};

use crate::error::{BacktestError, Result};

/// Strategy-produced indicator columns.  Values are opaque to the engine;
/// NaN is allowed (e.g. during a rolling-window warm-up).
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    index:   Vec<DateTime<Utc>>,
    names:   Vec<String>,
    values:  Array2<f64>,
}

impl SignalFrame {
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        let n = index.len();
        Self { index, names: Vec::new(), values: Array2::zeros((n, 0)) }
    }

    /// Append a column; replaces an existing column of the same name.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(BacktestError::config(format!(
                "signal `{name}` has {} values for an index of {}",
                values.len(),
                self.index.len()
            )));
        }
        if name == "timestamp" {
            return Err(BacktestError::config("`timestamp` is reserved for the index"));
        }

        match self.names.iter().position(|n| *n == name) {
            Some(j) => {
                for (dst, v) in self.values.column_mut(j).iter_mut().zip(values) {
                    *dst = v;
                }
            }
            None => {
                let column = ArrayView1::from(&values);
                self.values
                    .push_column(column)
                    .map_err(|e| BacktestError::config(format!("signal `{name}`: {e}")))?;
                self.names.push(name);
            }
        }
        Ok(())
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

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.names.iter().position(|n| n == name)?;
        Some(self.values.column(j))
    }

    pub fn get(&self, name: &str, t: usize) -> Option<f64> {
        self.column(name).and_then(|c| c.get(t).copied())
    }

    /// Row-major view (time × column), columns ordered as `names()`.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
}
