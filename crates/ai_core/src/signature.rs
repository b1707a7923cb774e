//! Content signatures and composite run keys
//!
//! Two identities are derived for a training config:
//!
//! - the **signature**: SHA-256 over the canonical (key-sorted) config fields,
//!   followed by the full bytes of every signature file in the order given.
//!   This is the exact deduplication key.
//! - the **composite run key**: `<revision>:<config hash>:<data hash>`, built
//!   from cheap proxies (code revision, truncated config hash, dataset mtime).
//!   It is weaker: a dataset rewritten with an identical mtime is treated as
//!   unchanged, and a touch without an edit forces a retrain.

use crate::config::{TrainingConfig, COMPOSITE_RUN_KEY, MODEL_SCRIPT, MODEL_TYPE, SIGNATURE, SIGNATURE_FILES};
use crate::errors::{DispatchError, Result};
use crate::serde_canon::{sha256_canonical_hex, to_canonical_json};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Execution-environment fields never hashed into the signature.
pub const EXCLUDED_FIELDS: [&str; 3] = ["data_path", COMPOSITE_RUN_KEY, SIGNATURE];

/// Fields the normalization step requires.
pub const REQUIRED_FIELDS: [&str; 3] = [MODEL_TYPE, MODEL_SCRIPT, SIGNATURE_FILES];

/// Revision placeholder when no git checkout is available
pub const NO_GIT: &str = "no-git";
/// Data placeholder when the dataset cannot be stat'ed
pub const NO_DATA: &str = "no-data";

/// Length of each truncated component of the composite run key
pub const SHORT_HASH_LEN: usize = 8;

/// Drop excluded fields and check that every required field is present.
pub fn normalized_fields(fields: &Map<String, Value>) -> Result<Map<String, Value>> {
    for required in REQUIRED_FIELDS {
        if !fields.contains_key(required) {
            return Err(DispatchError::Config(format!(
                "cannot compute signature: field '{required}' is missing"
            )));
        }
    }

    Ok(fields
        .iter()
        .filter(|(key, _)| !EXCLUDED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect())
}

/// Compute the signature of a config-like mapping and an ordered file list.
///
/// Every file must exist and be readable; a missing file aborts the
/// computation with [`DispatchError::FileRead`] instead of being skipped.
pub fn compute_identity_from_fields<P: AsRef<Path>>(
    fields: &Map<String, Value>,
    file_paths: &[P],
) -> Result<String> {
    let normalized = normalized_fields(fields)?;
    let canonical = to_canonical_json(&normalized)
        .map_err(|e| DispatchError::Config(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());

    for path in file_paths {
        let path = path.as_ref();
        let file_read = |source| DispatchError::FileRead {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(file_read)?;
        std::io::copy(&mut file, &mut hasher).map_err(file_read)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the signature of a config against the given (already resolved) files.
pub fn compute_identity<P: AsRef<Path>>(config: &TrainingConfig, file_paths: &[P]) -> Result<String> {
    compute_identity_from_fields(&config.fields(), file_paths)
}

/// Three-part cheap identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeRunKey {
    pub code_revision: String,
    pub config_hash: String,
    pub data_hash: String,
}

impl fmt::Display for CompositeRunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.code_revision, self.config_hash, self.data_hash)
    }
}

/// Build the composite run key for a config.
///
/// `revision` is the full code revision when known. The config hash covers
/// every document field; the data component hashes only the dataset mtime.
pub fn compute_composite_run_key(
    config: &TrainingConfig,
    revision: Option<&str>,
    data_path: Option<&Path>,
) -> Result<CompositeRunKey> {
    let code_revision = revision
        .map(str::trim)
        .filter(|rev| !rev.is_empty())
        .map(|rev| truncate(rev))
        .unwrap_or_else(|| NO_GIT.to_string());

    let config_hash = sha256_canonical_hex(&config.fields())
        .map_err(|e| DispatchError::Config(e.to_string()))?;

    let data_hash = data_path
        .and_then(data_snapshot_proxy)
        .map(|proxy| hex::encode(Sha256::digest(proxy.as_bytes())))
        .map(|hash| truncate(&hash))
        .unwrap_or_else(|| NO_DATA.to_string());

    Ok(CompositeRunKey {
        code_revision,
        config_hash: truncate(&config_hash),
        data_hash,
    })
}

/// Dataset modification time in nanoseconds since the epoch.
fn data_snapshot_proxy(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_nanos().to_string())
}

fn truncate(value: &str) -> String {
    value.chars().take(SHORT_HASH_LEN).collect()
}
