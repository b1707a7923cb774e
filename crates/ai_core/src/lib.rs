//! Core types for idempotent training dispatch
//!
//! Modules:
//! - `config`: Validated training configuration documents
//! - `signature`: Content signatures and composite run keys
//! - `serde_canon`: Canonical (key-sorted) JSON and digests
//! - `revision`: Code revision probe
//! - `contract`: Training Function Contract and result validation
//! - `artifact`: Tagged model artifacts
//! - `ensemble`: Tree ensemble models
//! - `sequence`: Sequence regressor state and forward pass
//! - `metrics`: Regression metrics
//! - `types`: Feature matrices
//! - `errors`: Error taxonomy

pub mod artifact;
pub mod config;
pub mod contract;
pub mod ensemble;
pub mod errors;
pub mod metrics;
pub mod revision;
pub mod sequence;
pub mod serde_canon;
pub mod signature;
pub mod types;

pub use artifact::{ArtifactFormat, ModelArtifact};
pub use config::TrainingConfig;
pub use contract::{
    validate_result, validate_training_function, ModelInfo, TrainingFunction, TrainingResult,
    ValidatedResult,
};
pub use ensemble::{EnsembleKind, TreeEnsemble};
pub use errors::{DispatchError, Result};
pub use metrics::{evaluate, TrainingMetrics};
pub use revision::detect_code_revision;
pub use sequence::{SequenceArchitecture, SequenceModelState};
pub use signature::{compute_composite_run_key, compute_identity, CompositeRunKey};
pub use types::FeatureMatrix;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
