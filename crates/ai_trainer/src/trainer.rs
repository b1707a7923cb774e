//! Gradient boosted regression trees (`xgb`)
//!
//! Squared-error boosting: start from the target mean, then fit each tree
//! to the current residuals and add it scaled by the learning rate.

use assay_ai_core::contract::{ModelInfo, TrainingFunction, TrainingResult};
use assay_ai_core::ensemble::{EnsembleKind, TreeEnsemble};
use assay_ai_core::{evaluate, DispatchError, FeatureMatrix, ModelArtifact, Result, TrainingConfig};

use crate::cart::{CartBuilder, TreeConfig};
use crate::deterministic::LcgRng;

/// Boosting hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub reg_lambda: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            learning_rate: 0.3,
            max_depth: 6,
            min_samples_leaf: 1,
            reg_lambda: 1.0,
        }
    }
}

impl BoostingParams {
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let defaults = Self::default();
        let params = Self {
            n_estimators: config.usize_or("n_estimators", defaults.n_estimators)?,
            learning_rate: config.f64_or("learning_rate", defaults.learning_rate)?,
            max_depth: config.usize_or("max_depth", defaults.max_depth)?,
            min_samples_leaf: config.usize_or("min_samples_leaf", defaults.min_samples_leaf)?,
            reg_lambda: config.f64_or("reg_lambda", defaults.reg_lambda)?,
        };

        if params.n_estimators == 0 {
            return Err(DispatchError::Config("n_estimators must be at least 1".into()));
        }
        if params.learning_rate <= 0.0 {
            return Err(DispatchError::Config(format!(
                "learning_rate must be positive, got {}",
                params.learning_rate
            )));
        }
        if params.reg_lambda < 0.0 {
            return Err(DispatchError::Config("reg_lambda must be non-negative".into()));
        }
        Ok(params)
    }
}

/// Gradient boosting trainer
pub struct GbdtTrainer {
    params: BoostingParams,
}

impl GbdtTrainer {
    pub fn new(params: BoostingParams) -> Self {
        Self { params }
    }

    /// Fit a boosted ensemble
    pub fn fit(&self, features: &FeatureMatrix, targets: &[f64]) -> TreeEnsemble {
        let rows = features.rows();
        let n = rows.len();
        let base_score = if n == 0 {
            0.0
        } else {
            targets.iter().sum::<f64>() / n as f64
        };

        let mut predictions = vec![base_score; n];
        let mut residuals = vec![0.0; n];
        let indices: Vec<usize> = (0..n).collect();
        let mut rng = LcgRng::new(0);

        let tree_config = TreeConfig {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: None,
            reg_lambda: self.params.reg_lambda,
        };

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for tree_idx in 0..self.params.n_estimators {
            tracing::debug!("Training tree {}/{}", tree_idx + 1, self.params.n_estimators);

            for ((r, t), p) in residuals.iter_mut().zip(targets).zip(&predictions) {
                *r = t - p;
            }

            let mut tree = CartBuilder::new(rows, &residuals, tree_config.clone()).build(&indices, &mut rng);
            tree.weight = self.params.learning_rate;

            for (pred, row) in predictions.iter_mut().zip(rows) {
                *pred += tree.weight * tree.evaluate(row);
            }
            trees.push(tree);
        }

        TreeEnsemble::new(EnsembleKind::Boosted, features.n_features(), base_score, trees)
    }
}

/// `models.xgb.train`
#[derive(Debug, Default)]
pub struct GradientBoostingTrainer;

impl TrainingFunction for GradientBoostingTrainer {
    fn name(&self) -> &str {
        "models.xgb.train"
    }

    fn train(&self, features: &FeatureMatrix, targets: &[f64], config: &TrainingConfig) -> Result<TrainingResult> {
        let params = BoostingParams::from_config(config)?;
        let n_estimators = params.n_estimators;
        let model = GbdtTrainer::new(params).fit(features, targets);
        let metrics = evaluate(targets, &model.predict(features.rows()));

        let info = ModelInfo::new("xgb", "GradientBoostedTrees")
            .with_dims(features.n_features(), model.num_nodes())
            .with_extra("n_estimators", n_estimators.to_string());

        Ok(TrainingResult::new(ModelArtifact::TreeEnsemble(model), metrics, info))
    }
}
