//! Tree ensembles produced by the forest and boosting trainers
//!
//! Trees are stored as flat node arrays with index links, serialized as
//! canonical JSON and hashed with BLAKE3 for artifact digests.

pub mod model;
pub mod tree;

pub use model::{EnsembleError, EnsembleKind, TreeEnsemble, ENSEMBLE_VERSION};
pub use tree::{Node, Tree};
