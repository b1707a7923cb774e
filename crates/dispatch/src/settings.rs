//! Dispatcher settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `ASSAY_*` environment variables. Command-line flags are
//! applied last by the binary through [`SettingsOverrides`].

use clap::ValueEnum;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings file picked up from the working directory when present
pub const DEFAULT_SETTINGS_FILE: &str = "dispatch.toml";
/// Prefix of environment overrides, e.g. `ASSAY_TRACKING_URI`
pub const ENV_PREFIX: &str = "ASSAY";
/// Legacy tracking endpoint variable, used as the default tracking URI
pub const LEGACY_TRACKING_ENV: &str = "MLFLOW_TRACKING_URI";

/// Which identity is used for the existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Composite run key (code revision, config hash, data mtime)
    Composite,
    /// Content signature only
    Signature,
}

/// What happens to the rest of the batch after a config fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Continue,
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DispatchSettings {
    /// Directory scanned for `*.yaml` / `*.yml` training configs
    pub configs_dir: PathBuf,
    /// Dataset loaded once per dispatch
    pub data_path: PathBuf,
    /// Run registry location (`memory://`, `sled://…`, `file://…` or a path)
    pub tracking_uri: String,
    /// Base for relative `signature_files` entries and the git revision probe
    pub project_root: PathBuf,
    pub mode: KeyMode,
    pub failure_policy: FailurePolicy,
    /// Directory for identity lease files; leases are off when unset
    pub lease_dir: Option<PathBuf>,
    pub force_retrain: bool,
    pub dry_run: bool,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub target_column: String,
    pub feature_prefix: String,
    pub extra_features: Vec<String>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl DispatchSettings {
    /// Load settings. An explicit `path` must exist; otherwise
    /// [`DEFAULT_SETTINGS_FILE`] is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let tracking_default =
            std::env::var(LEGACY_TRACKING_ENV).unwrap_or_else(|_| "mlruns".to_string());

        let mut builder = Config::builder()
            .set_default("configs_dir", "configs")?
            .set_default("data_path", "data/data_200.csv")?
            .set_default("tracking_uri", tracking_default)?
            .set_default("project_root", ".")?
            .set_default("mode", "composite")?
            .set_default("failure_policy", "continue")?
            .set_default("force_retrain", false)?
            .set_default("dry_run", false)?
            .set_default("test_fraction", 0.2)?
            .set_default("split_seed", 42)?
            .set_default("target_column", "pIC50")?
            .set_default("feature_prefix", "PubchemFP")?
            .set_default("extra_features", vec!["docking_score"])?
            .set_default("log_level", "info")?
            .set_default("log_format", "pretty")?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
            None => builder.add_source(
                File::from(Path::new(DEFAULT_SETTINGS_FILE))
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extra_features"),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(ConfigError::Message(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.tracking_uri.trim().is_empty() {
            return Err(ConfigError::Message("tracking_uri is empty".to_string()));
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, overrides: SettingsOverrides) -> Self {
        if let Some(dir) = overrides.configs_dir {
            self.configs_dir = dir;
        }
        if let Some(data) = overrides.data_path {
            self.data_path = data;
        }
        if let Some(uri) = overrides.tracking_uri {
            self.tracking_uri = uri;
        }
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(dir) = overrides.lease_dir {
            self.lease_dir = Some(dir);
        }
        self.force_retrain |= overrides.force_retrain;
        self.dry_run |= overrides.dry_run;
        if overrides.fail_fast {
            self.failure_policy = FailurePolicy::FailFast;
        }
        if overrides.verbose {
            self.log_level = "debug".to_string();
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        self
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub configs_dir: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub tracking_uri: Option<String>,
    pub mode: Option<KeyMode>,
    pub lease_dir: Option<PathBuf>,
    pub force_retrain: bool,
    pub dry_run: bool,
    pub fail_fast: bool,
    pub verbose: bool,
    pub log_format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "configs_dir = \"cfg\"").unwrap();
        writeln!(file, "mode = \"signature\"").unwrap();
        writeln!(file, "failure_policy = \"fail_fast\"").unwrap();
        writeln!(file, "lease_dir = \"/tmp/leases\"").unwrap();
        file.flush().unwrap();

        let settings = DispatchSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.configs_dir, PathBuf::from("cfg"));
        assert_eq!(settings.mode, KeyMode::Signature);
        assert_eq!(settings.failure_policy, FailurePolicy::FailFast);
        assert_eq!(settings.lease_dir, Some(PathBuf::from("/tmp/leases")));
        assert_eq!(settings.test_fraction, 0.2);
        assert_eq!(settings.extra_features, vec!["docking_score".to_string()]);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(DispatchSettings::load(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn test_invalid_test_fraction() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "test_fraction = 1.5").unwrap();
        file.flush().unwrap();
        assert!(DispatchSettings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tracking_uri = \"sled:///var/runs\"").unwrap();
        file.flush().unwrap();

        let settings = DispatchSettings::load(Some(file.path()))
            .unwrap()
            .with_overrides(SettingsOverrides {
                tracking_uri: Some("memory://".into()),
                fail_fast: true,
                verbose: true,
                ..SettingsOverrides::default()
            });
        assert_eq!(settings.tracking_uri, "memory://");
        assert_eq!(settings.failure_policy, FailurePolicy::FailFast);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.mode, KeyMode::Composite);
    }
}
