//! Code revision probe for composite run keys

use std::path::Path;
use std::process::Command;

/// Env override, checked before asking git (CI exports it).
pub const REVISION_ENV: &str = "GIT_COMMIT_HASH";

/// Best-effort lookup of the current code revision.
///
/// Order: `GIT_COMMIT_HASH`, then `git rev-parse HEAD` run in `repo_dir`.
/// Returns `None` when neither source yields a value.
pub fn detect_code_revision(repo_dir: &Path) -> Option<String> {
    if let Ok(sha) = std::env::var(REVISION_ENV) {
        let sha = sha.trim().to_string();
        if !sha.is_empty() {
            return Some(sha);
        }
    }

    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .ok()?;

    if !output.status.success() {
        tracing::debug!(dir = %repo_dir.display(), "git rev-parse failed, no code revision");
        return None;
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
