//! Tabular feature data handed to training implementations

use crate::errors::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// Dense row-major feature matrix with named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build a matrix, checking that every row has one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(DispatchError::Data(format!(
                "row {idx} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Build a matrix with generated column names `f0..fn`.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let columns = (0..width).map(|i| format!("f{i}")).collect();
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.rows[idx]
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy out the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Check that features and targets line up and are usable for fitting.
pub fn check_training_inputs(features: &FeatureMatrix, targets: &[f64]) -> Result<()> {
    if features.is_empty() {
        return Err(DispatchError::Data("no training rows".to_string()));
    }
    if features.n_rows() != targets.len() {
        return Err(DispatchError::Data(format!(
            "{} feature rows but {} targets",
            features.n_rows(),
            targets.len()
        )));
    }
    if features.n_features() == 0 {
        return Err(DispatchError::Data("no feature columns".to_string()));
    }
    if targets.iter().any(|t| !t.is_finite()) {
        return Err(DispatchError::Data("targets contain non-finite values".to_string()));
    }
    Ok(())
}
