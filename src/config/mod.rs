//! Configuration management for `tracker_attachments`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`TA_*`)
//! 3. Project config (`.tracker/config.yaml`)
//! 4. User config (`~/.config/ta/config.yaml`)
//! 5. Defaults
//!
//! Keys are flattened from YAML (`dedup: { min-file-size: 10 }` becomes
//! `dedup.min-file-size`) and compared after normalizing `_` to `-`.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dedup::DeduplicationPolicy;
use crate::error::{AttachError, Result};
use crate::model::HashAlgorithm;

/// Name of the project directory found by discovery.
pub const PROJECT_DIR_NAME: &str = ".tracker";

/// Project config filename inside the project directory.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Environment variable naming the project directory explicitly.
pub const DIR_ENV_VAR: &str = "TRACKER_DIR";

const ENV_PREFIX: &str = "TA_";

const KEY_ENABLED: &str = "dedup.enabled";
const KEY_ALGORITHM: &str = "dedup.hash-algorithm";
const KEY_MIN_SIZE: &str = "dedup.min-file-size";
const KEY_MAX_SIZE: &str = "dedup.max-file-size";
const KEY_EXCLUDED: &str = "dedup.excluded-content-types";

/// Discover the active project directory.
///
/// Honors `TRACKER_DIR` when set, otherwise walks up from `start` (or CWD)
/// looking for `.tracker/`.
///
/// # Errors
///
/// Returns `NotInitialized` if no project directory is found.
pub fn discover_project_dir(start: Option<&Path>) -> Result<PathBuf> {
    discover_project_dir_with_env(start, None)
}

fn discover_project_dir_with_env(
    start: Option<&Path>,
    env_override: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = env_override {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
    } else if let Ok(value) = env::var(DIR_ENV_VAR) {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(path);
            }
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(PROJECT_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    Err(AttachError::NotInitialized)
}

/// Resolve the project directory, preferring an explicit `--dir`.
///
/// # Errors
///
/// Returns `NotInitialized` if the explicit directory is missing or
/// discovery finds nothing.
pub fn resolve_project_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) if dir.is_dir() => Ok(dir.to_path_buf()),
        Some(_) => Err(AttachError::NotInitialized),
        None => discover_project_dir(None),
    }
}

/// Create a project directory with a starter config.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if a config exists and `force` is false.
pub fn init_project(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        return Err(AttachError::AlreadyInitialized {
            path: dir.to_path_buf(),
        });
    }
    fs::create_dir_all(dir)?;

    let defaults = DeduplicationPolicy::default();
    let config = format!(
        r"# Tracker attachment configuration
dedup:
  enabled: {}
  hash-algorithm: {}
  min-file-size: {}
  # 0 means unlimited
  max-file-size: {}
  excluded-content-types: []
",
        defaults.enabled, defaults.hash_algorithm, defaults.min_file_size, defaults.max_file_size
    );
    fs::write(&config_path, config)?;

    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(&gitignore_path, "# Upload staging\ntmp/\n*.tmp\n")?;
    }

    info!(path = %dir.display(), force, "Initialized project directory");
    Ok(())
}

/// One source of configuration values, keyed by normalized dotted path.
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
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `TA_*` environment variables.
    ///
    /// `TA_DEDUP_MIN_FILE_SIZE` is accepted as `dedup.min-file-size`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                for variant in env_key_variants(stripped) {
                    layer.insert(&variant, value.clone());
                }
            }
        }
        layer
    }

    fn insert(&mut self, key: &str, value: String) {
        self.values.insert(normalize_key(key), value);
    }

    /// Look up the first of `keys` that is set.
    #[must_use]
    pub fn get(&self, keys: &[&str]) -> Option<&String> {
        keys.iter()
            .find_map(|key| self.values.get(&normalize_key(key)))
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dedup_enabled: Option<bool>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        if let Some(enabled) = self.dedup_enabled {
            layer.insert(KEY_ENABLED, enabled.to_string());
        }
        layer
    }
}

/// Path of the user config file (`~/.config/ta/config.yaml`), if `HOME` is set.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    let home = env::var("HOME").ok()?;
    Some(
        Path::new(&home)
            .join(".config")
            .join("ta")
            .join(CONFIG_FILENAME),
    )
}

/// Load project config (`<dir>/config.yaml`).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(dir: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&dir.join(CONFIG_FILENAME))
}

/// Load user config.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    match user_config_path() {
        Some(path) => ConfigLayer::from_yaml(&path),
        None => Ok(ConfigLayer::default()),
    }
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let defaults = DeduplicationPolicy::default();
    let mut layer = ConfigLayer::default();
    layer.insert(KEY_ENABLED, defaults.enabled.to_string());
    layer.insert(KEY_ALGORITHM, defaults.hash_algorithm.to_string());
    layer.insert(KEY_MIN_SIZE, defaults.min_file_size.to_string());
    layer.insert(KEY_MAX_SIZE, defaults.max_file_size.to_string());
    layer
}

/// Load configuration with full precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(dir: &Path, cli: &CliOverrides) -> Result<ConfigLayer> {
    let merged = ConfigLayer::merge_layers(&[
        default_config_layer(),
        load_user_config()?,
        load_project_config(dir)?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]);
    debug!(keys = merged.values.len(), "Loaded configuration");
    Ok(merged)
}

/// Build the dedup policy from a merged layer.
///
/// # Errors
///
/// Returns `Config` for values that do not parse.
pub fn dedup_policy_from_layer(layer: &ConfigLayer) -> Result<DeduplicationPolicy> {
    let mut policy = DeduplicationPolicy::default();

    if let Some(value) = layer.get(&[KEY_ENABLED]) {
        policy.enabled = parse_bool(value)
            .ok_or_else(|| AttachError::Config(format!("{KEY_ENABLED}: invalid boolean '{value}'")))?;
    }
    if let Some(value) = layer.get(&[KEY_ALGORITHM]) {
        policy.hash_algorithm = value
            .parse::<HashAlgorithm>()
            .map_err(|err| AttachError::Config(format!("{KEY_ALGORITHM}: {err}")))?;
    }
    if let Some(value) = layer.get(&[KEY_MIN_SIZE]) {
        policy.min_file_size = parse_size(KEY_MIN_SIZE, value)?;
    }
    if let Some(value) = layer.get(&[KEY_MAX_SIZE]) {
        policy.max_file_size = parse_size(KEY_MAX_SIZE, value)?;
    }
    if let Some(value) = layer.get(&[KEY_EXCLUDED]) {
        policy.excluded_content_types = value
            .split(',')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(policy)
}

/// Load the effective dedup policy for a project directory.
///
/// # Errors
///
/// Returns an error if config cannot be read or holds invalid values.
pub fn load_dedup_policy(dir: &Path, cli: &CliOverrides) -> Result<DeduplicationPolicy> {
    dedup_policy_from_layer(&load_config(dir, cli)?)
}

/// Write `policy` into the project config's `dedup:` mapping.
///
/// Other keys in the file are preserved.
///
/// # Errors
///
/// Returns an error if the config cannot be read, parsed or written.
pub fn save_dedup_policy(dir: &Path, policy: &DeduplicationPolicy) -> Result<()> {
    let path = dir.join(CONFIG_FILENAME);
    let mut config = if path.exists() {
        let contents = fs::read_to_string(&path)?;
        serde_yaml::from_str::<serde_yaml::Value>(&contents)?
    } else {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::default())
    };
    if config.is_null() {
        config = serde_yaml::Value::Mapping(serde_yaml::Mapping::default());
    }

    set_yaml_value(&mut config, &["dedup", "enabled"], policy.enabled.into());
    set_yaml_value(
        &mut config,
        &["dedup", "hash-algorithm"],
        policy.hash_algorithm.as_str().into(),
    );
    set_yaml_value(&mut config, &["dedup", "min-file-size"], policy.min_file_size.into());
    set_yaml_value(&mut config, &["dedup", "max-file-size"], policy.max_file_size.into());
    set_yaml_value(
        &mut config,
        &["dedup", "excluded-content-types"],
        serde_yaml::Value::Sequence(
            policy
                .excluded_content_types
                .iter()
                .map(|pattern| pattern.as_str().into())
                .collect(),
        ),
    );

    fs::write(&path, serde_yaml::to_string(&config)?)?;
    info!(path = %path.display(), "Saved dedup policy");
    Ok(())
}

fn set_yaml_value(config: &mut serde_yaml::Value, parts: &[&str], value: serde_yaml::Value) {
    if parts.is_empty() {
        return;
    }

    if !matches!(config, serde_yaml::Value::Mapping(_)) {
        *config = serde_yaml::Value::Mapping(serde_yaml::Mapping::default());
    }

    if let serde_yaml::Value::Mapping(map) = config {
        let key = serde_yaml::Value::String(parts[0].to_string());
        if parts.len() == 1 {
            map.insert(key, value);
            return;
        }
        let entry = map
            .entry(key)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::default()));
        set_yaml_value(entry, &parts[1..], value);
    }
}

fn parse_size(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| AttachError::Config(format!("{key}: expected a byte count, got '{value}'")))
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

/// `DEDUP_MIN_FILE_SIZE` could mean `dedup.min-file-size` or
/// `dedup-min.file-size`; only the first segment is treated as a section.
fn env_key_variants(raw: &str) -> Vec<String> {
    let lower = raw.to_lowercase();
    let mut variants = vec![lower.clone()];
    if let Some((section, rest)) = lower.split_once('_') {
        variants.push(format!("{section}.{}", rest.replace('_', "-")));
    }
    variants
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    for (key, value) in flat {
        layer.insert(&key, value);
    }

    layer
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
