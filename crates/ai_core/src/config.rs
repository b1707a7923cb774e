//! Declarative training configuration
//!
//! One [`TrainingConfig`] is built per discovered configuration document.
//! The three required fields are validated at construction; every other key
//! is preserved verbatim as a hyperparameter and takes part in both the
//! content signature and the logged run parameters.

use crate::errors::{DispatchError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Experiment namespace key
pub const MODEL_TYPE: &str = "model_type";
/// Training implementation reference key
pub const MODEL_SCRIPT: &str = "model_script";
/// Ordered list of files hashed into the signature
pub const SIGNATURE_FILES: &str = "signature_files";
/// Tag / field name of the cheap three-part identity
pub const COMPOSITE_RUN_KEY: &str = "composite_run_key";
/// Tag / field name of the content signature
pub const SIGNATURE: &str = "signature";

/// Fields set by the orchestrator; a document may not supply them.
pub const RESERVED_FIELDS: [&str; 2] = [COMPOSITE_RUN_KEY, SIGNATURE];

/// Fields that select and identify the implementation but are not logged as params.
pub const INTERNAL_FIELDS: [&str; 2] = [MODEL_SCRIPT, SIGNATURE_FILES];

/// A validated training configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingConfig {
    model_type: String,
    model_script: String,
    signature_files: Vec<String>,
    #[serde(flatten)]
    hyperparameters: BTreeMap<String, Value>,
    #[serde(skip)]
    composite_run_key: Option<String>,
    #[serde(skip)]
    signature: Option<String>,
}

impl TrainingConfig {
    /// Create a config from its required fields, failing fast on empty values.
    pub fn new(
        model_type: impl Into<String>,
        model_script: impl Into<String>,
        signature_files: Vec<String>,
    ) -> Result<Self> {
        let config = Self {
            model_type: model_type.into(),
            model_script: model_script.into(),
            signature_files,
            hyperparameters: BTreeMap::new(),
            composite_run_key: None,
            signature: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Add a hyperparameter, rejecting required and reserved keys.
    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let key = key.into();
        check_extra_key(&key)?;
        self.hyperparameters.insert(key, value.into());
        Ok(self)
    }

    /// Build a config from a parsed key/value document.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(DispatchError::Config(
                "configuration document must be a mapping".to_string(),
            ));
        };

        let model_type = take_string(&mut map, MODEL_TYPE)?;
        let model_script = take_string(&mut map, MODEL_SCRIPT)?;
        let signature_files = take_string_list(&mut map, SIGNATURE_FILES)?;

        let mut config = Self::new(model_type, model_script, signature_files)?;
        for (key, value) in map {
            check_extra_key(&key)?;
            config.hyperparameters.insert(key, value);
        }
        Ok(config)
    }

    /// Parse a YAML document.
    ///
    /// `.nan` and `.inf` have no JSON form and are rejected rather than
    /// collapsed to null.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(source)
            .map_err(|e| DispatchError::Config(format!("invalid YAML: {e}")))?;
        Self::from_value(yaml_to_json(value, "")?)
    }

    /// Parse a JSON document.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| DispatchError::Config(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    fn validate(&self) -> Result<()> {
        if self.model_type.trim().is_empty() {
            return Err(missing(MODEL_TYPE));
        }
        if self.model_script.trim().is_empty() {
            return Err(missing(MODEL_SCRIPT));
        }
        if self.signature_files.is_empty() {
            return Err(missing(SIGNATURE_FILES));
        }
        if let Some(pos) = self.signature_files.iter().position(|p| p.trim().is_empty()) {
            return Err(DispatchError::Config(format!(
                "'{SIGNATURE_FILES}' entry {pos} is an empty path"
            )));
        }
        Ok(())
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn model_script(&self) -> &str {
        &self.model_script
    }

    pub fn signature_files(&self) -> &[String] {
        &self.signature_files
    }

    pub fn hyperparameters(&self) -> &BTreeMap<String, Value> {
        &self.hyperparameters
    }

    pub fn composite_run_key(&self) -> Option<&str> {
        self.composite_run_key.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Attach the composite run key computed for this dispatch.
    pub fn attach_composite_run_key(&mut self, key: impl Into<String>) {
        self.composite_run_key = Some(key.into());
    }

    /// Attach the content signature computed for this dispatch.
    pub fn attach_signature(&mut self, signature: impl Into<String>) {
        self.signature = Some(signature.into());
    }

    /// Every document field (required + hyperparameters) as a JSON mapping.
    ///
    /// Attached identities are not included.
    pub fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(MODEL_TYPE.to_string(), Value::from(self.model_type.clone()));
        map.insert(MODEL_SCRIPT.to_string(), Value::from(self.model_script.clone()));
        map.insert(
            SIGNATURE_FILES.to_string(),
            Value::from(self.signature_files.clone()),
        );
        for (key, value) in &self.hyperparameters {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// Parameters logged with a run: everything except the internal fields.
    pub fn logged_params(&self) -> BTreeMap<String, String> {
        self.fields()
            .into_iter()
            .filter(|(key, _)| !INTERNAL_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key, render_param(&value)))
            .collect()
    }

    /// Raw hyperparameter lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.hyperparameters.get(key)
    }

    /// Floating-point hyperparameter, or `default` when absent or null.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| type_mismatch(key, "a finite number", value)),
        }
    }

    /// Unsigned hyperparameter, or `default` when absent or null.
    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self.opt_u64(key)?.unwrap_or(default))
    }

    /// `usize` hyperparameter, or `default` when absent or null.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.opt_usize(key)?.unwrap_or(default))
    }

    /// Optional `usize` hyperparameter; an explicit null reads as `None`.
    pub fn opt_usize(&self, key: &str) -> Result<Option<usize>> {
        self.opt_u64(key)?
            .map(|v| usize::try_from(v).map_err(|_| type_mismatch(key, "a usize", &Value::from(v))))
            .transpose()
    }

    fn opt_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| type_mismatch(key, "a non-negative integer", value)),
        }
    }
}

fn missing(field: &str) -> DispatchError {
    DispatchError::Config(format!("Required field '{field}' is missing"))
}

fn type_mismatch(key: &str, expected: &str, value: &Value) -> DispatchError {
    DispatchError::Config(format!("hyperparameter '{key}' must be {expected}, got {value}"))
}

fn check_extra_key(key: &str) -> Result<()> {
    if RESERVED_FIELDS.contains(&key) {
        return Err(DispatchError::Config(format!(
            "'{key}' is set by the dispatcher and cannot appear in a config"
        )));
    }
    if [MODEL_TYPE, MODEL_SCRIPT, SIGNATURE_FILES].contains(&key) {
        return Err(DispatchError::Config(format!("'{key}' is a required field, not a hyperparameter")));
    }
    Ok(())
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String> {
    match map.remove(key) {
        None | Some(Value::Null) => Err(missing(key)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(DispatchError::Config(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

fn take_string_list(map: &mut Map<String, Value>, key: &str) -> Result<Vec<String>> {
    match map.remove(key) {
        None | Some(Value::Null) => Err(missing(key)),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(DispatchError::Config(format!(
                    "'{key}' entries must be strings, got {other}"
                ))),
            })
            .collect(),
        Some(other) => Err(DispatchError::Config(format!(
            "'{key}' must be a list of paths, got {other}"
        ))),
    }
}

/// Convert a YAML tree to JSON. `path` is the dotted key of `value`.
fn yaml_to_json(value: serde_yaml::Value, path: &str) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                let number = serde_json::Number::from_f64(f).ok_or_else(|| {
                    DispatchError::Config(format!("'{}' must be a finite number, got {n}", display_path(path)))
                })?;
                Value::Number(number)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| yaml_to_json(item, &format!("{path}[{idx}]")))
                .collect::<Result<_>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, item) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Number(n) => n.to_string(),
                    other => {
                        return Err(DispatchError::Config(format!(
                            "mapping keys under '{}' must be scalars, got {other:?}",
                            display_path(path)
                        )))
                    }
                };
                let child = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                map.insert(key, yaml_to_json(item, &child)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value, path)?,
    })
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<document>"
    } else {
        path
    }
}

fn render_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
