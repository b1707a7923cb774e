//! Regression metrics reported by every training implementation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RMSE: &str = "rmse";
pub const R2: &str = "r2";
pub const MAE: &str = "mae";

/// The fixed metric record every training run must produce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub rmse: f64,
    pub r2: f64,
    pub mae: f64,
}

impl TrainingMetrics {
    /// Metric mapping for logging, keys optionally prefixed (e.g. `test_`).
    pub fn to_map(&self, prefix: &str) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (format!("{prefix}{RMSE}"), self.rmse),
            (format!("{prefix}{R2}"), self.r2),
            (format!("{prefix}{MAE}"), self.mae),
        ])
    }
}

/// Score predictions against ground truth.
///
/// R² of a constant target is 1.0 for a perfect fit and 0.0 otherwise.
/// Empty or mismatched inputs yield NaN metrics, which contract validation
/// rejects.
pub fn evaluate(y_true: &[f64], y_pred: &[f64]) -> TrainingMetrics {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return TrainingMetrics {
            rmse: f64::NAN,
            r2: f64::NAN,
            mae: f64::NAN,
        };
    }

    let n = y_true.len() as f64;
    let mean = y_true.iter().sum::<f64>() / n;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut abs_err = 0.0;
    for (t, p) in y_true.iter().zip(y_pred) {
        let err = t - p;
        ss_res += err * err;
        ss_tot += (t - mean) * (t - mean);
        abs_err += err.abs();
    }

    let r2 = if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    TrainingMetrics {
        rmse: (ss_res / n).sqrt(),
        r2,
        mae: abs_err / n,
    }
}
