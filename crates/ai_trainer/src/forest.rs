//! Bagged regression forest (`rf`)

use assay_ai_core::contract::{ModelInfo, TrainingFunction, TrainingResult};
use assay_ai_core::ensemble::{EnsembleKind, TreeEnsemble};
use assay_ai_core::{evaluate, DispatchError, FeatureMatrix, ModelArtifact, Result, TrainingConfig};

use crate::cart::{CartBuilder, TreeConfig};
use crate::deterministic::LcgRng;

/// Forest hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of features considered at each split, in `(0, 1]`.
    pub max_features: f64,
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            max_depth: 12,
            min_samples_leaf: 1,
            max_features: 1.0,
            bootstrap: true,
            random_state: 42,
        }
    }
}

impl ForestParams {
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let defaults = Self::default();
        let params = Self {
            n_estimators: config.usize_or("n_estimators", defaults.n_estimators)?,
            max_depth: config.usize_or("max_depth", defaults.max_depth)?,
            min_samples_leaf: config.usize_or("min_samples_leaf", defaults.min_samples_leaf)?,
            max_features: config.f64_or("max_features", defaults.max_features)?,
            bootstrap: match config.get("bootstrap") {
                None => defaults.bootstrap,
                Some(v) => v.as_bool().ok_or_else(|| {
                    DispatchError::Config(format!("hyperparameter 'bootstrap' must be a boolean, got {v}"))
                })?,
            },
            random_state: config.u64_or("random_state", defaults.random_state)?,
        };

        if params.n_estimators == 0 {
            return Err(DispatchError::Config("n_estimators must be at least 1".into()));
        }
        if !(params.max_features > 0.0 && params.max_features <= 1.0) {
            return Err(DispatchError::Config(format!(
                "max_features must be in (0, 1], got {}",
                params.max_features
            )));
        }
        Ok(params)
    }
}

/// Fit a forest with explicit parameters.
pub fn fit_forest(features: &FeatureMatrix, targets: &[f64], params: &ForestParams) -> TreeEnsemble {
    let n = features.n_rows();
    let n_features = features.n_features();
    let per_split = ((n_features as f64 * params.max_features).ceil() as usize).clamp(1, n_features.max(1));

    let tree_config = TreeConfig {
        max_depth: params.max_depth,
        min_samples_leaf: params.min_samples_leaf,
        max_features: Some(per_split),
        reg_lambda: 0.0,
    };
    let builder = CartBuilder::new(features.rows(), targets, tree_config);
    let mut rng = LcgRng::new(params.random_state);
    let weight = 1.0 / params.n_estimators as f64;

    let trees = (0..params.n_estimators)
        .map(|tree_idx| {
            tracing::debug!("Training tree {}/{}", tree_idx + 1, params.n_estimators);
            let sample: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.next_range(n)).collect()
            } else {
                (0..n).collect()
            };
            let mut tree = builder.build(&sample, &mut rng);
            tree.weight = weight;
            tree
        })
        .collect();

    TreeEnsemble::new(EnsembleKind::Bagged, n_features, 0.0, trees)
}

/// `models.rf.train`
#[derive(Debug, Default)]
pub struct RandomForestTrainer;

impl TrainingFunction for RandomForestTrainer {
    fn name(&self) -> &str {
        "models.rf.train"
    }

    fn train(&self, features: &FeatureMatrix, targets: &[f64], config: &TrainingConfig) -> Result<TrainingResult> {
        let params = ForestParams::from_config(config)?;
        let model = fit_forest(features, targets, &params);
        let metrics = evaluate(targets, &model.predict(features.rows()));

        let info = ModelInfo::new("rf", "RandomForestRegressor")
            .with_dims(features.n_features(), model.num_nodes())
            .with_extra("n_estimators", params.n_estimators.to_string());

        Ok(TrainingResult::new(ModelArtifact::TreeEnsemble(model), metrics, info))
    }
}
