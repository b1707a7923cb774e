//! Training Function Contract
//!
//! Every model implementation is called the same way:
//! `(features, targets, config) -> TrainingResult`. The orchestrator never
//! branches on model type beyond picking an implementation; instead each
//! result is validated here before anything is written to the registry.

use crate::artifact::ModelArtifact;
use crate::config::TrainingConfig;
use crate::errors::{DispatchError, Result};
use crate::metrics::{TrainingMetrics, MAE, R2, RMSE};
use crate::types::{check_training_inputs, FeatureMatrix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A model-training implementation.
pub trait TrainingFunction: Send + Sync {
    /// Reference name used in logs, e.g. `models.rf.train`.
    fn name(&self) -> &str;

    fn train(
        &self,
        features: &FeatureMatrix,
        targets: &[f64],
        config: &TrainingConfig,
    ) -> Result<TrainingResult>;
}

/// Descriptive metadata about a fitted model, logged as string tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub input_dim: usize,
    pub num_parameters: usize,
    pub architecture: String,
    /// Free-form extra entries.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ModelInfo {
    pub fn new(model_type: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            architecture: architecture.into(),
            ..Self::default()
        }
    }

    pub fn with_dims(mut self, input_dim: usize, num_parameters: usize) -> Self {
        self.input_dim = input_dim;
        self.num_parameters = num_parameters;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Flatten into string entries; extras cannot shadow the fixed keys.
    pub fn to_entries(&self) -> BTreeMap<String, String> {
        let mut entries = self.extra.clone();
        entries.insert("model_type".into(), self.model_type.clone());
        entries.insert("input_dim".into(), self.input_dim.to_string());
        entries.insert("num_parameters".into(), self.num_parameters.to_string());
        entries.insert("architecture".into(), self.architecture.clone());
        entries
    }
}

/// Raw output of a training implementation, before validation.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub model: ModelArtifact,
    pub metrics: BTreeMap<String, f64>,
    pub metadata: ModelInfo,
}

impl TrainingResult {
    pub fn new(model: ModelArtifact, metrics: TrainingMetrics, metadata: ModelInfo) -> Self {
        Self {
            model,
            metrics: metrics.to_map(""),
            metadata,
        }
    }
}

/// A result that passed contract validation.
#[derive(Debug, Clone)]
pub struct ValidatedResult {
    pub model: ModelArtifact,
    pub metrics: TrainingMetrics,
    /// Additional finite metrics reported by the implementation.
    pub extra_metrics: BTreeMap<String, f64>,
    pub metadata: ModelInfo,
}

impl ValidatedResult {
    /// Every metric, fixed and extra, for logging.
    pub fn all_metrics(&self) -> BTreeMap<String, f64> {
        let mut all = self.extra_metrics.clone();
        all.extend(self.metrics.to_map(""));
        all
    }
}

/// Check a raw result against the contract.
///
/// Fails with [`DispatchError::ContractViolation`] naming the first
/// missing or malformed field.
pub fn validate_result(result: TrainingResult) -> Result<ValidatedResult> {
    let TrainingResult {
        model,
        mut metrics,
        metadata,
    } = result;

    if model.is_empty() {
        return Err(violation("model", "artifact is empty"));
    }
    model.validate()?;

    let mut take = |key: &str| -> Result<f64> {
        let value = metrics
            .remove(key)
            .ok_or_else(|| violation(&format!("metrics.{key}"), "missing"))?;
        if !value.is_finite() {
            return Err(violation(&format!("metrics.{key}"), &format!("{value} is not finite")));
        }
        Ok(value)
    };
    let fixed = TrainingMetrics {
        rmse: take(RMSE)?,
        r2: take(R2)?,
        mae: take(MAE)?,
    };
    if fixed.rmse < 0.0 {
        return Err(violation("metrics.rmse", "must be non-negative"));
    }

    if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(violation(&format!("metrics.{key}"), &format!("{value} is not finite")));
    }
    if metadata.model_type.trim().is_empty() {
        return Err(violation("metadata.model_type", "missing"));
    }

    Ok(ValidatedResult {
        model,
        metrics: fixed,
        extra_metrics: metrics,
        metadata,
    })
}

/// Run a training implementation and validate what it returns.
///
/// A panic inside the implementation is reported as a training execution
/// failure rather than unwinding into the caller.
pub fn validate_training_function(
    func: &dyn TrainingFunction,
    features: &FeatureMatrix,
    targets: &[f64],
    config: &TrainingConfig,
) -> Result<ValidatedResult> {
    check_training_inputs(features, targets)?;

    let outcome = catch_unwind(AssertUnwindSafe(|| func.train(features, targets, config)));
    let result = match outcome {
        Ok(result) => result?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(DispatchError::TrainingExecution(format!(
                "{} panicked: {message}",
                func.name()
            )));
        }
    };

    validate_result(result)
}

fn violation(field: &str, problem: &str) -> DispatchError {
    DispatchError::ContractViolation(format!("{field}: {problem}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{EnsembleKind, Node, Tree, TreeEnsemble};

    fn stump_model() -> ModelArtifact {
        let tree = Tree::new(vec![Node::leaf(0, 1.0)], 1.0);
        ModelArtifact::TreeEnsemble(TreeEnsemble::new(EnsembleKind::Bagged, 1, 0.0, vec![tree]))
    }

    fn good_result() -> TrainingResult {
        TrainingResult::new(
            stump_model(),
            TrainingMetrics {
                rmse: 0.5,
                r2: 0.9,
                mae: 0.25,
            },
            ModelInfo::new("rf", "TreeEnsemble").with_dims(1, 1),
        )
    }

    struct Fixed(fn() -> Result<TrainingResult>);

    impl TrainingFunction for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn train(&self, _: &FeatureMatrix, _: &[f64], _: &TrainingConfig) -> Result<TrainingResult> {
            (self.0)()
        }
    }

    fn sample() -> (FeatureMatrix, Vec<f64>, TrainingConfig) {
        let x = FeatureMatrix::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        let cfg = TrainingConfig::new("rf", "models.rf.train", vec!["a.csv".into()]).unwrap();
        (x, vec![1.0, 2.0], cfg)
    }

    #[test]
    fn test_valid_result_passes() {
        let validated = validate_result(good_result()).unwrap();
        assert_eq!(validated.metrics.rmse, 0.5);
        assert!(validated.extra_metrics.is_empty());
        assert_eq!(validated.all_metrics().len(), 3);
    }

    #[test]
    fn test_missing_rmse_is_violation() {
        let mut result = good_result();
        result.metrics.remove("rmse");
        let err = validate_result(result).unwrap_err();
        assert!(matches!(&err, DispatchError::ContractViolation(m) if m.contains("metrics.rmse")));
    }

    #[test]
    fn test_non_finite_and_negative_metrics_rejected() {
        let mut nan = good_result();
        nan.metrics.insert("r2".into(), f64::NAN);
        assert!(matches!(validate_result(nan), Err(DispatchError::ContractViolation(_))));

        let mut negative = good_result();
        negative.metrics.insert("rmse".into(), -1.0);
        assert!(matches!(validate_result(negative), Err(DispatchError::ContractViolation(_))));
    }

    #[test]
    fn test_empty_model_rejected() {
        let mut result = good_result();
        result.model = ModelArtifact::Opaque(vec![]);
        let err = validate_result(result).unwrap_err();
        assert!(matches!(&err, DispatchError::ContractViolation(m) if m.starts_with("model")));
    }

    #[test]
    fn test_extra_metrics_kept() {
        let mut result = good_result();
        result.metrics.insert("oob_score".into(), 0.7);
        let validated = validate_result(result).unwrap();
        assert_eq!(validated.extra_metrics.get("oob_score"), Some(&0.7));
        assert_eq!(validated.all_metrics().len(), 4);
    }

    #[test]
    fn test_function_errors_pass_through() {
        let (x, y, cfg) = sample();
        let failing = Fixed(|| Err(DispatchError::TrainingExecution("boom".into())));
        assert!(matches!(
            validate_training_function(&failing, &x, &y, &cfg),
            Err(DispatchError::TrainingExecution(_))
        ));

        let ok = Fixed(|| Ok(good_result()));
        assert!(validate_training_function(&ok, &x, &y, &cfg).is_ok());
    }

    #[test]
    fn test_panic_becomes_execution_error() {
        let (x, y, cfg) = sample();
        let panicking = Fixed(|| panic!("diverged"));
        let err = validate_training_function(&panicking, &x, &y, &cfg).unwrap_err();
        assert!(matches!(&err, DispatchError::TrainingExecution(m) if m.contains("diverged")));
    }

    #[test]
    fn test_metadata_entries() {
        let info = ModelInfo::new("xgb", "TreeEnsemble")
            .with_dims(4, 30)
            .with_extra("model_type", "shadowed");
        let entries = info.to_entries();
        assert_eq!(entries["model_type"], "xgb");
        assert_eq!(entries["num_parameters"], "30");
    }
}
