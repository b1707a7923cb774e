//! Identity leases
//!
//! Advisory file locks that make check-then-train exclusive across
//! concurrent dispatch processes sharing a lease directory.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Held lock on one identity. Released on drop.
#[derive(Debug)]
pub struct IdentityLease {
    file: File,
    path: PathBuf,
}

impl IdentityLease {
    /// Try to take the lease for `identity` without blocking.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(lease_dir: &Path, identity: &str) -> io::Result<Option<Self>> {
        fs::create_dir_all(lease_dir)?;
        let path = lease_dir.join(format!("{}.lock", lease_file_stem(identity)));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(lease = %path.display(), "Acquired identity lease");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lease = %self.path.display(), error = %e, "Failed to release identity lease");
        }
    }
}

/// File-name-safe form of an identity (`:` and other separators become `_`).
fn lease_file_stem(identity: &str) -> String {
    identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
