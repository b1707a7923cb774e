//! Static lookup table from implementation references to trainers

use assay_ai_core::{DispatchError, Result, TrainingConfig, TrainingFunction};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::forest::RandomForestTrainer;
use crate::sequence::SequenceTrainer;
use crate::trainer::GradientBoostingTrainer;

/// Maps `model_script` / `model_type` references to training implementations.
#[derive(Clone, Default)]
pub struct TrainerCatalog {
    entries: BTreeMap<String, Arc<dyn TrainingFunction>>,
}

impl TrainerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the forest, boosting and sequence trainers.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(&["models.rf.train", "rf"], Arc::new(RandomForestTrainer));
        catalog.register(&["models.xgb.train", "xgb"], Arc::new(GradientBoostingTrainer));
        catalog.register(
            &["models.transformer.train", "transformer"],
            Arc::new(SequenceTrainer),
        );
        catalog
    }

    /// Register an implementation under one or more references.
    pub fn register(&mut self, references: &[&str], func: Arc<dyn TrainingFunction>) {
        for reference in references {
            self.entries.insert(normalize_reference(reference), Arc::clone(&func));
        }
    }

    /// Resolve the implementation for a config: `model_script` first, then `model_type`.
    pub fn resolve(&self, config: &TrainingConfig) -> Result<Arc<dyn TrainingFunction>> {
        [config.model_script(), config.model_type()]
            .into_iter()
            .find_map(|reference| self.entries.get(&normalize_reference(reference)))
            .cloned()
            .ok_or_else(|| {
                DispatchError::Config(format!(
                    "no training implementation for model_script '{}' or model_type '{}'",
                    config.model_script(),
                    config.model_type()
                ))
            })
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for TrainerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// `models/rf/train.py` and `models.rf.train` name the same implementation.
pub fn normalize_reference(reference: &str) -> String {
    let trimmed = reference.trim().trim_start_matches("./");
    let without_ext = trimmed.strip_suffix(".py").unwrap_or(trimmed);
    without_ext.replace(['/', '\\'], ".")
}
