//! Assay Dispatch - idempotent training dispatcher
//!
//! Discovers training configs, derives a content identity for each, skips
//! identities that already have a finished run in the registry, and trains
//! and records the rest. One config's failure never aborts the batch.

pub mod discovery;
pub mod lease;
pub mod orchestrator;
pub mod settings;
pub mod summary;

pub use discovery::{discover_configs, DiscoveredConfig, Discovery, RejectedConfig};
pub use lease::IdentityLease;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use settings::{DispatchSettings, FailurePolicy, KeyMode, LogFormat, SettingsOverrides};
pub use summary::{ConfigOutcome, ConfigReport, DispatchSummary};
