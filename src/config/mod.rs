//! Configuration management for `specsync`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`SPECSYNC_*`)
//! 3. Project config (.specfact/config.yaml)
//! 4. User config (~/.config/specsync/config.yaml)
//! 5. Defaults
//!
//! Every layer is a flat map of dotted keys (`sync.priority.memory`). Keys are
//! normalized so that `sync.read_workers`, `sync.read-workers` and the env
//! form `SPECSYNC_SYNC_READ_WORKERS` all land on the same entry.

use crate::compare::EnforcementPolicy;
use crate::error::{Result, SyncError};
use crate::model::{ArtifactCategory, Resolution};
use crate::sync::resolve::PriorityTable;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the internal plan bundle and engine state.
pub const SPECFACT_DIR: &str = ".specfact";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SPECSYNC_";

const PRIORITY_PREFIX: &str = "sync.priority.";

/// A flat configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Build a layer from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let mut flat = HashMap::new();
        flatten_yaml(&value, "", &mut flat);

        let mut layer = Self::default();
        for (key, value) in flat {
            layer.set(&key, value);
        }
        Ok(layer)
    }

    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_vars(env::vars())
    }

    /// Build a layer from `(name, value)` pairs, keeping `SPECSYNC_*` names.
    #[must_use]
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layer.set(stripped, value);
            }
        }
        layer
    }

    /// Insert a value under its normalized key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// Look up a value by any spelling of its key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub external_root: Option<PathBuf>,
    pub bidirectional: Option<bool>,
    pub interval_secs: Option<u64>,
    pub policy: Option<String>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(root) = &self.external_root {
            layer.set("sync.external_root", root.to_string_lossy());
        }
        if let Some(bidirectional) = self.bidirectional {
            layer.set("sync.bidirectional", bidirectional.to_string());
        }
        if let Some(interval) = self.interval_secs {
            layer.set("sync.interval", interval.to_string());
        }
        if let Some(policy) = &self.policy {
            layer.set("compare.policy", policy.clone());
        }

        layer
    }
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    layer.set("sync.bidirectional", "false");
    layer.set("sync.interval", "5");
    layer.set("sync.debounce_ms", "500");
    layer.set("sync.read_workers", "4");
    layer.set("compare.policy", "balanced");
    layer
}

/// Load project config (.specfact/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(repo_root: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&repo_root.join(SPECFACT_DIR).join("config.yaml"))
}

/// Load user config (~/.config/specsync/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("specsync")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load configuration with the standard precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(repo_root: &Path, cli: &CliOverrides) -> Result<ConfigLayer> {
    let defaults = default_config_layer();
    let user = load_user_config()?;
    let project = load_project_config(repo_root)?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[
        defaults, user, project, env_layer, cli_layer,
    ]))
}

/// Typed engine settings resolved from a merged layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the external tool tree. `None` means the repository root.
    pub external_root: Option<PathBuf>,
    pub bidirectional: bool,
    pub interval: Duration,
    pub debounce: Duration,
    pub read_workers: usize,
    pub priority: PriorityTable,
    pub policy: EnforcementPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            external_root: None,
            bidirectional: false,
            interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            read_workers: 4,
            priority: PriorityTable::default(),
            policy: EnforcementPolicy::balanced(),
        }
    }
}

impl SyncConfig {
    /// Resolve typed settings from a merged layer.
    ///
    /// Priority entries are layered over the default table, so a project only
    /// has to name the categories it wants to change.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for malformed values.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let defaults = Self::default();

        let external_root = layer
            .get("sync.external_root")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let bidirectional = match layer.get("sync.bidirectional") {
            Some(raw) => parse_bool(raw).ok_or_else(|| invalid("sync.bidirectional", raw))?,
            None => defaults.bidirectional,
        };

        let interval = match layer.get("sync.interval") {
            Some(raw) => Duration::from_secs(parse_u64("sync.interval", raw)?.max(1)),
            None => defaults.interval,
        };

        let debounce = match layer.get("sync.debounce_ms") {
            Some(raw) => Duration::from_millis(parse_u64("sync.debounce_ms", raw)?),
            None => defaults.debounce,
        };

        let read_workers = match layer.get("sync.read_workers") {
            Some(raw) => usize::try_from(parse_u64("sync.read_workers", raw)?)
                .map_err(|_| invalid("sync.read_workers", raw))?
                .max(1),
            None => defaults.read_workers,
        };

        let mut priority = defaults.priority;
        let mut entries: Vec<(&String, &String)> = layer
            .values
            .iter()
            .filter(|(key, _)| key.starts_with(PRIORITY_PREFIX))
            .collect();
        entries.sort();
        for (key, raw) in entries {
            let category = &key[PRIORITY_PREFIX.len()..];
            if category.is_empty() {
                continue;
            }
            let resolution: Resolution = raw.parse()?;
            priority.set(ArtifactCategory::new(category), resolution);
        }

        let policy = match layer.get("compare.policy") {
            Some(raw) => EnforcementPolicy::preset(raw)?,
            None => defaults.policy,
        };

        Ok(Self {
            external_root,
            bidirectional,
            interval,
            debounce,
            read_workers,
            priority,
            policy,
        })
    }

    /// External tool root for a repository.
    #[must_use]
    pub fn external_root_for(&self, repo_root: &Path) -> PathBuf {
        match &self.external_root {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => repo_root.join(path),
            None => repo_root.to_path_buf(),
        }
    }
}

fn invalid(key: &str, raw: &str) -> SyncError {
    SyncError::Config(format!("invalid value for {key}: {raw:?}"))
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| invalid(key, raw))
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(['_', '-'], ".")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
