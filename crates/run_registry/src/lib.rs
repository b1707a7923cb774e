//! Run registry: an append-only store of tagged training runs
//!
//! The core question it answers is "does a finished run with tag T = v
//! already exist?". Writes happen through [`RunScope`], which always closes
//! its run, as `FINISHED` on success or `FAILED` when dropped early.

pub mod client;
pub mod errors;
pub mod storage;
pub mod store;
pub mod types;

pub use client::{RunRegistryClient, RunScope, MODEL_ARTIFACT};
pub use errors::{RegistryError, Result};
pub use storage::RunStorage;
pub use store::RunStore;
pub use types::{ArtifactRecord, RunHandle, RunRecord, RunStatus, TagFilter};
