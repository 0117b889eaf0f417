//! Regression metrics backed by [`aprender::metrics`].
//!
//! All functions take `(y_true, y_pred)` and compare element-wise over the
//! shorter of the two slices. Empty input yields `NaN`. Values are scored in
//! single precision, as `aprender` does.

use aprender::metrics;
use aprender::primitives::Vector;
use serde::{Deserialize, Serialize};

/// Paired `(truth, prediction)` vectors, or `None` when there is nothing to score.
#[allow(clippy::cast_possible_truncation)]
fn paired(y_true: &[f64], y_pred: &[f64]) -> Option<(Vector<f32>, Vector<f32>)> {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return None;
    }
    let narrow = |values: &[f64]| Vector::from_vec(values[..n].iter().map(|&v| v as f32).collect());
    Some((narrow(y_true), narrow(y_pred)))
}

/// Mean squared error.
#[must_use]
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    paired(y_true, y_pred).map_or(f64::NAN, |(t, p)| f64::from(metrics::mse(&p, &t)))
}

/// Root mean squared error: `sqrt(mean((y_true - y_pred)^2))`.
///
/// # Examples
///
/// ```rust
/// use trueno_ml::validation::metrics::rmse;
///
/// let error = rmse(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]);
/// assert!((error - (4.0_f64 / 3.0).sqrt()).abs() < 1e-6);
/// ```
#[must_use]
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    paired(y_true, y_pred).map_or(f64::NAN, |(t, p)| f64::from(metrics::rmse(&p, &t)))
}

/// Mean absolute error.
#[must_use]
pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    paired(y_true, y_pred).map_or(f64::NAN, |(t, p)| f64::from(metrics::mae(&p, &t)))
}

/// Coefficient of determination. A constant `y_true` scores 0.0.
#[must_use]
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    paired(y_true, y_pred).map_or(f64::NAN, |(t, p)| f64::from(metrics::r_squared(&p, &t)))
}

/// Metrics reported per target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Root mean squared error
    pub rmse: f64,
    /// Mean absolute error
    pub mae: f64,
    /// Coefficient of determination
    pub r2: f64,
}

impl RegressionMetrics {
    /// Compute all metrics.
    #[must_use]
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            rmse: rmse(y_true, y_pred),
            mae: mae(y_true, y_pred),
            r2: r2(y_true, y_pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_prediction() {
        let y = [1.0, 2.0, 3.0];
        let m = RegressionMetrics::compute(&y, &y);
        assert!(m.rmse.abs() < 1e-6);
        assert!(m.mae.abs() < 1e-6);
        assert!((m.r2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_known_values() {
        let y_true = [3.0, -0.5, 2.0, 7.0];
        let y_pred = [2.5, 0.0, 2.0, 8.0];
        assert!((mse(&y_true, &y_pred) - 0.375).abs() < 1e-6);
        assert!((mae(&y_true, &y_pred) - 0.5).abs() < 1e-6);
        assert!((r2(&y_true, &y_pred) - 0.948_608_1).abs() < 1e-5);
    }

    #[test]
    fn test_argument_order_is_truth_first() {
        // R² uses the mean of y_true, so swapping the arguments changes it
        let y_true = [1.0, 2.0, 3.0, 4.0];
        let y_pred = [2.5, 2.5, 2.5, 2.5];
        assert!(r2(&y_true, &y_pred).abs() < 1e-6);
    }

    #[test]
    fn test_constant_truth_scores_zero() {
        assert!(r2(&[2.0, 2.0], &[1.0, 3.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_uneven_lengths_use_shorter() {
        assert!((rmse(&[1.0, 2.0, 9.0], &[1.0, 4.0]) - 2.0_f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(rmse(&[], &[]).is_nan());
        assert!(r2(&[1.0], &[]).is_nan());
    }
}
