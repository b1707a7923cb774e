//! Tree ensemble model
//!
//! Bagged forests and boosted ensembles share one representation: the
//! prediction is `base_score + Σ weight_i · tree_i(x)`. A forest of `n`
//! trees stores `weight = 1/n` and a zero base score; a boosted ensemble
//! stores the learning rate as the weight and the target mean as the base.

use super::tree::Tree;
use crate::serde_canon::{blake3_canonical_hex, to_canonical_json, CanonicalError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Ensemble validation failed: {0}")]
    ValidationFailed(String),

    #[error("Canonical serialization error: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Current serialized format version
pub const ENSEMBLE_VERSION: i32 = 1;

/// How the trees were combined during fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleKind {
    Bagged,
    Boosted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeEnsemble {
    pub version: i32,
    pub kind: EnsembleKind,
    pub feature_count: usize,
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn new(kind: EnsembleKind, feature_count: usize, base_score: f64, trees: Vec<Tree>) -> Self {
        Self {
            version: ENSEMBLE_VERSION,
            kind,
            feature_count,
            base_score,
            trees,
        }
    }

    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.version != ENSEMBLE_VERSION {
            return Err(EnsembleError::ValidationFailed(format!(
                "unsupported ensemble version: {}",
                self.version
            )));
        }
        if self.trees.is_empty() {
            return Err(EnsembleError::ValidationFailed("ensemble has no trees".into()));
        }
        if !self.base_score.is_finite() {
            return Err(EnsembleError::ValidationFailed("base score is not finite".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_count)
                .map_err(|e| EnsembleError::ValidationFailed(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn predict_row(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, tree| acc + tree.weight * tree.evaluate(features))
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total node count across all trees.
    pub fn num_nodes(&self) -> usize {
        self.trees.iter().map(Tree::len).sum()
    }

    pub fn to_canonical_json(&self) -> Result<String, EnsembleError> {
        Ok(to_canonical_json(self)?)
    }

    pub fn hash_hex(&self) -> Result<String, EnsembleError> {
        Ok(blake3_canonical_hex(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::tree::Node;

    fn two_stumps(kind: EnsembleKind, weight: f64, base: f64) -> TreeEnsemble {
        let t1 = Tree::new(
            vec![
                Node::internal(0, 0, 50.0, 1, 2),
                Node::leaf(1, 100.0),
                Node::leaf(2, 200.0),
            ],
            weight,
        );
        let t2 = Tree::new(
            vec![
                Node::internal(0, 1, 30.0, 1, 2),
                Node::leaf(1, -50.0),
                Node::leaf(2, 50.0),
            ],
            weight,
        );
        TreeEnsemble::new(kind, 2, base, vec![t1, t2])
    }

    #[test]
    fn test_bagged_prediction_is_mean() {
        let model = two_stumps(EnsembleKind::Bagged, 0.5, 0.0);
        assert!(model.validate().is_ok());
        // (100 + -50) / 2
        assert_eq!(model.predict_row(&[30.0, 20.0]), 25.0);
    }

    #[test]
    fn test_boosted_prediction_adds_base() {
        let model = two_stumps(EnsembleKind::Boosted, 0.1, 3.0);
        let p = model.predict_row(&[60.0, 40.0]);
        assert!((p - (3.0 + 0.1 * 200.0 + 0.1 * 50.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_ensemble_invalid() {
        let model = TreeEnsemble::new(EnsembleKind::Bagged, 2, 0.0, vec![]);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = two_stumps(EnsembleKind::Bagged, 0.5, 0.0);
        let b = two_stumps(EnsembleKind::Bagged, 0.5, 0.0);
        let c = two_stumps(EnsembleKind::Bagged, 0.5, 1.0);
        assert_eq!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
        assert_ne!(a.hash_hex().unwrap(), c.hash_hex().unwrap());

        let json = a.to_canonical_json().unwrap();
        assert!(json.starts_with("{\"base_score\""));
        assert!(!json.contains('\n'));
    }
}
