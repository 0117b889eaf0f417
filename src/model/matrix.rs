//! Feature matrix over `aprender`'s row-major [`aprender::primitives::Matrix`].
//!
//! Training data stays in `f64`; estimators backed by `aprender`'s `f32`
//! models convert at the boundary with [`Matrix::to_f32`].

use aprender::primitives::Matrix as Dense;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Row-major feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix {
    inner: Dense<f64>,
}

impl Matrix {
    /// Create from row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if `data.len() != n_rows * n_cols`.
    pub fn new(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Result<Self> {
        let len = data.len();
        Dense::from_vec(n_rows, n_cols, data)
            .map(|inner| Self { inner })
            .map_err(|e| {
                Error::Computation(format!("Matrix shape {n_rows}x{n_cols} with {len} values: {e}"))
            })
    }

    /// All-zero matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the shape overflows.
    pub fn zeros(n_rows: usize, n_cols: usize) -> Result<Self> {
        let len = n_rows
            .checked_mul(n_cols)
            .ok_or_else(|| Error::Computation(format!("Matrix shape {n_rows}x{n_cols} overflows")))?;
        Self::new(n_rows, n_cols, vec![0.0; len])
    }

    /// Build from a slice of rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if rows have different lengths.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(Error::Computation(format!(
                    "Row {i} has {} values, expected {n_cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), n_cols, data)
    }

    /// Build from column vectors, each of length `n_rows`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if a column is shorter than `n_rows`.
    pub fn from_columns(columns: &[Vec<f64>], n_rows: usize) -> Result<Self> {
        if let Some((j, short)) = columns.iter().enumerate().find(|(_, c)| c.len() < n_rows) {
            return Err(Error::Computation(format!(
                "Column {j} has {} values, expected {n_rows}",
                short.len()
            )));
        }
        let data = (0..n_rows)
            .flat_map(|i| columns.iter().map(move |column| column[i]))
            .collect();
        Self::new(n_rows, columns.len(), data)
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.inner.n_rows()
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.inner.n_cols()
    }

    /// Element at (`row`, `col`).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.get(row, col)
    }

    /// Set element at (`row`, `col`).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner.set(row, col, value);
    }

    /// Borrow one row.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        let n_cols = self.n_cols();
        let start = row * n_cols;
        &self.inner.as_slice()[start..start + n_cols]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows()).map(move |i| self.row(i))
    }

    /// Copy one column.
    #[must_use]
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.inner.column(col).as_slice().to_vec()
    }

    /// New matrix holding the given rows, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if an index is out of range.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows()) {
            return Err(Error::Computation(format!(
                "row {bad} out of range for {} rows",
                self.n_rows()
            )));
        }
        let mut data = Vec::with_capacity(indices.len() * self.n_cols());
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self::new(indices.len(), self.n_cols(), data)
    }

    /// Single-precision copy for `aprender` estimators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the shape is inconsistent.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> Result<Dense<f32>> {
        let data = self.inner.as_slice().iter().map(|&v| v as f32).collect();
        Dense::from_vec(self.n_rows(), self.n_cols(), data)
            .map_err(|e| Error::Computation(format!("f32 feature matrix: {e}")))
    }

    /// Widen an `aprender` matrix back to `f64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Computation`] if the shape is inconsistent.
    pub fn from_f32(dense: &Dense<f32>) -> Result<Self> {
        let (n_rows, n_cols) = dense.shape();
        Self::new(
            n_rows,
            n_cols,
            dense.as_slice().iter().map(|&v| f64::from(v)).collect(),
        )
    }
}
