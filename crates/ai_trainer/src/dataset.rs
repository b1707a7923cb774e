//! CSV dataset loading, preprocessing and splitting
//!
//! The assay table carries one row per compound: fingerprint bit columns
//! (`PubchemFP*`), a docking score and the measured `pIC50` target. Rows
//! with a missing or non-numeric target or docking score are dropped.

use assay_ai_core::FeatureMatrix;
use std::path::Path;

use crate::deterministic::xxhash64;
use crate::errors::TrainerError;

pub const TARGET_COLUMN: &str = "pIC50";
pub const FINGERPRINT_PREFIX: &str = "PubchemFP";
pub const DOCKING_SCORE_COLUMN: &str = "docking_score";

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Which columns become features and which one is the target.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetSchema {
    pub target_column: String,
    /// Every column starting with this prefix is a feature, in file order.
    pub feature_prefix: String,
    /// Named feature columns appended after the prefixed ones; rows missing
    /// any of them are dropped.
    pub required_features: Vec<String>,
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self {
            target_column: TARGET_COLUMN.to_string(),
            feature_prefix: FINGERPRINT_PREFIX.to_string(),
            required_features: vec![DOCKING_SCORE_COLUMN.to_string()],
        }
    }
}

/// Preprocessed features and targets.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub features: FeatureMatrix,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn new(features: FeatureMatrix, targets: Vec<f64>) -> Result<Self, TrainerError> {
        if features.n_rows() != targets.len() {
            return Err(TrainerError::Dataset(format!(
                "{} feature rows but {} targets",
                features.n_rows(),
                targets.len()
            )));
        }
        Ok(Self { features, targets })
    }

    /// Load and preprocess a CSV file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P, schema: &DatasetSchema) -> Result<Self, TrainerError> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let find = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                TrainerError::Dataset(format!("{}: missing column '{name}'", path.display()))
            })
        };

        let target_idx = find(&schema.target_column)?;
        let mut feature_idx: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !schema.feature_prefix.is_empty() && h.trim().starts_with(&schema.feature_prefix))
            .map(|(i, _)| i)
            .collect();
        for name in &schema.required_features {
            let idx = find(name)?;
            if !feature_idx.contains(&idx) {
                feature_idx.push(idx);
            }
        }
        if feature_idx.is_empty() {
            return Err(TrainerError::Dataset(format!(
                "{}: no feature columns match prefix '{}'",
                path.display(),
                schema.feature_prefix
            )));
        }

        let columns = feature_idx
            .iter()
            .map(|&i| headers[i].trim().to_string())
            .collect();

        let mut rows = Vec::new();
        let mut targets = Vec::new();
        let mut dropped = 0usize;

        for record in reader.records() {
            let record = record?;
            let target = record.get(target_idx).and_then(parse_cell);
            let values: Option<Vec<f64>> = feature_idx
                .iter()
                .map(|&i| record.get(i).and_then(parse_cell))
                .collect();

            match (target, values) {
                (Some(t), Some(v)) => {
                    targets.push(t);
                    rows.push(v);
                }
                _ => dropped += 1,
            }
        }

        if rows.is_empty() {
            return Err(TrainerError::Dataset(format!(
                "{}: no usable rows ({dropped} dropped)",
                path.display()
            )));
        }

        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            features = feature_idx.len(),
            dropped,
            "Loaded dataset"
        );

        let features =
            FeatureMatrix::new(columns, rows).map_err(|e| TrainerError::Dataset(e.to_string()))?;
        Self::new(features, targets)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Deterministic train/test partition.
    ///
    /// Rows are ordered by a seeded hash of their index; the first
    /// `ceil(n * test_fraction)` rows form the test split. At least one row
    /// always stays in the training split.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> Result<DataSplit, TrainerError> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(TrainerError::Dataset(format!(
                "test fraction {test_fraction} must be in [0, 1)"
            )));
        }

        let n = self.len();
        let mut order: Vec<(u64, usize)> = (0..n).map(|i| (xxhash64(&[i as u64], seed), i)).collect();
        order.sort_unstable();

        let n_test = ((n as f64 * test_fraction).ceil() as usize).min(n.saturating_sub(1));
        let (test_idx, train_idx): (Vec<usize>, Vec<usize>) = {
            let indices: Vec<usize> = order.into_iter().map(|(_, i)| i).collect();
            let (test, train) = indices.split_at(n_test);
            (test.to_vec(), train.to_vec())
        };

        Ok(DataSplit {
            train: self.subset(&train_idx),
            test: self.subset(&test_idx),
        })
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select_rows(indices),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}

/// Train and holdout partitions.
#[derive(Clone, Debug)]
pub struct DataSplit {
    pub train: Dataset,
    pub test: Dataset,
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}
