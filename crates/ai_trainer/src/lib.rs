//! Assay AI Trainer - dataset loading and built-in training implementations
//!
//! Every trainer satisfies the Training Function Contract from
//! `assay-ai-core` and is reachable through [`TrainerCatalog`].

pub mod cart;
pub mod catalog;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod forest;
pub mod sequence;
pub mod trainer;

pub use catalog::TrainerCatalog;
pub use dataset::{DataSplit, Dataset, DatasetSchema};
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::TrainerError;
pub use forest::{ForestParams, RandomForestTrainer};
pub use sequence::{SequenceParams, SequenceTrainer};
pub use trainer::{BoostingParams, GbdtTrainer, GradientBoostingTrainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
