//! Configuration loading and management

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Prefix for `ROOMCAST__SECTION__FIELD=value` overrides
const ENV_PREFIX: &str = "ROOMCAST__";

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".roomcast"))
            .unwrap_or_else(|| PathBuf::from(".roomcast"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let config_path = self.config_path();
        let mut merged = serde_json::to_value(Config::default())?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content)?;
            merge_values(&mut merged, file_value);
        }

        for (path, value) in env_overrides() {
            set_path_value(&mut merged, &path, value);
        }

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay `overlay` onto `base`; objects merge key by key, anything else
/// replaces
fn merge_values(base: &mut Value, overlay: Value) {
    let Value::Object(overlay_map) = overlay else {
        *base = overlay;
        return;
    };
    match base {
        Value::Object(base_map) => {
            for (key, value) in overlay_map {
                merge_values(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        other => *other = Value::Object(overlay_map),
    }
}

/// Booleans in any case, then JSON (numbers, objects), then a plain string
fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(trimmed.eq_ignore_ascii_case("true"));
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_path_value(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        set_path_value(map.entry(head.clone()).or_insert(Value::Null), rest, value);
    }
}

/// Environment overrides in the order they apply: aliases first, so an
/// explicit `ROOMCAST__...` path wins over its alias
fn env_overrides() -> Vec<(Vec<String>, Value)> {
    const ALIASES: [(&str, &str); 2] = [
        ("ROOMCAST_DEFAULT_IDENTITY", "identity.default_identity"),
        ("ROOMCAST_ENCRYPTION", "encryption.enabled"),
    ];

    let mut overrides: Vec<(Vec<String>, Value)> = ALIASES
        .iter()
        .filter_map(|(key, target)| {
            let raw = std::env::var(key).ok()?;
            let path = target.split('.').map(str::to_string).collect();
            Some((path, parse_env_value(&raw)))
        })
        .collect();

    let mut paths: Vec<(String, String)> = std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    paths.sort();
    for (key, raw) in paths {
        let path: Vec<String> = key[ENV_PREFIX.len()..]
            .split("__")
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if !path.is_empty() {
            overrides.push((path, parse_env_value(&raw)));
        }
    }
    overrides
}
