//! Serialized model artifacts returned by training implementations

use crate::ensemble::TreeEnsemble;
use crate::errors::{DispatchError, Result};
use crate::sequence::SequenceModelState;
use crate::serde_canon::to_canonical_json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serialization flavour hint passed to the run registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    TreeEnsemble,
    SequenceModel,
    Opaque,
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactFormat::TreeEnsemble => "tree_ensemble",
            ArtifactFormat::SequenceModel => "sequence_model",
            ArtifactFormat::Opaque => "opaque",
        };
        f.write_str(s)
    }
}

/// A fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "model", rename_all = "snake_case")]
pub enum ModelArtifact {
    TreeEnsemble(TreeEnsemble),
    SequenceModel(SequenceModelState),
    /// Pre-serialized bytes from an implementation outside this crate.
    Opaque(Vec<u8>),
}

impl ModelArtifact {
    pub fn format(&self) -> ArtifactFormat {
        match self {
            ModelArtifact::TreeEnsemble(_) => ArtifactFormat::TreeEnsemble,
            ModelArtifact::SequenceModel(_) => ArtifactFormat::SequenceModel,
            ModelArtifact::Opaque(_) => ArtifactFormat::Opaque,
        }
    }

    /// An artifact with nothing in it: no trees, no parameters, or no bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            ModelArtifact::TreeEnsemble(m) => m.trees.is_empty(),
            ModelArtifact::SequenceModel(s) => s.parameter_count() == 0,
            ModelArtifact::Opaque(bytes) => bytes.is_empty(),
        }
    }

    /// Structural validation of the wrapped model.
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelArtifact::TreeEnsemble(m) => m
                .validate()
                .map_err(|e| DispatchError::ContractViolation(e.to_string())),
            ModelArtifact::SequenceModel(s) => s
                .validate()
                .map_err(|e| DispatchError::ContractViolation(e.to_string())),
            ModelArtifact::Opaque(_) => Ok(()),
        }
    }

    /// Bytes stored by the registry: canonical JSON for typed models.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            ModelArtifact::Opaque(bytes) => Ok(bytes.clone()),
            typed => to_canonical_json(typed)
                .map(String::into_bytes)
                .map_err(|e| DispatchError::ContractViolation(e.to_string())),
        }
    }

    /// BLAKE3 digest of [`ModelArtifact::to_bytes`], lowercase hex.
    pub fn digest_hex(&self) -> Result<String> {
        Ok(blake3::hash(&self.to_bytes()?).to_hex().to_string())
    }

    /// Predict one value per row. Opaque artifacts cannot predict.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        match self {
            ModelArtifact::TreeEnsemble(m) => Ok(m.predict(rows)),
            ModelArtifact::SequenceModel(s) => s
                .predict(rows)
                .map_err(|e| DispatchError::TrainingExecution(e.to_string())),
            ModelArtifact::Opaque(_) => Err(DispatchError::ContractViolation(
                "opaque artifacts do not support prediction".to_string(),
            )),
        }
    }

    pub fn supports_prediction(&self) -> bool {
        !matches!(self, ModelArtifact::Opaque(_))
    }
}
