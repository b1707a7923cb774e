//! Training config discovery

use assay_ai_core::{DispatchError, TrainingConfig};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// A parsed config and the file it came from.
#[derive(Debug, Clone)]
pub struct DiscoveredConfig {
    pub path: PathBuf,
    pub config: TrainingConfig,
}

/// A config file that was excluded from the batch.
#[derive(Debug)]
pub struct RejectedConfig {
    pub path: PathBuf,
    pub error: DispatchError,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub configs: Vec<DiscoveredConfig>,
    pub rejected: Vec<RejectedConfig>,
}

/// Parse every `*.yaml` / `*.yml` file in `dir`, in file-name order.
///
/// A malformed file is logged and excluded; the rest are still parsed.
/// Only a directory that cannot be listed is an error.
pub fn discover_configs(dir: &Path) -> std::io::Result<Discovery> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_config_extension(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut discovery = Discovery::default();
    for path in paths {
        match load_config(&path) {
            Ok(config) => {
                tracing::info!(
                    config = %path.display(),
                    model_type = %config.model_type(),
                    state = "DISCOVERED",
                    "Loaded training config"
                );
                discovery.configs.push(DiscoveredConfig { path, config });
            }
            Err(error) => {
                tracing::warn!(config = %path.display(), error = %error, "Skipping malformed config");
                discovery.rejected.push(RejectedConfig { path, error });
            }
        }
    }
    Ok(discovery)
}

/// Read and parse a single config file.
pub fn load_config(path: &Path) -> Result<TrainingConfig, DispatchError> {
    let source = fs::read_to_string(path).map_err(|source| DispatchError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    TrainingConfig::from_yaml_str(&source)
}

fn has_config_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
