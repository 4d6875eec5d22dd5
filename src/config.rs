//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Value};

use crate::errors::{AppError, AppResult};

/// String-keyed property lookup, the only configuration the engine consumes
pub trait PropertySource {
    /// Value of `key` rendered as a string, `None` when absent
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Typed settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    pub panels: PanelsConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when TWINCOM_LOG is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Start locations of the two panels (URI or native path)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelsConfig {
    pub left: Option<String>,
    pub right: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// File name of archives created by the compress command
    pub name: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            name: crate::ops::DEFAULT_ARCHIVE_NAME.to_string(),
        }
    }
}

/// Loaded configuration: typed settings plus the raw document for property lookup
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    document: DocumentMut,
    path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            document: default_config().parse().unwrap_or_default(),
            path: None,
        }
    }
}

/// Get the config directory path for the current platform
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // Windows: %APPDATA%\twincom
        std::env::var("APPDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("twincom"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        // $XDG_CONFIG_HOME/twincom, falling back to ~/.config/twincom
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
            .map(|p| p.join("twincom"))
    }
}

/// Get the config file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

fn default_config() -> String {
    format!(
        r##"# Twincom Configuration
# This file is auto-generated. Edit as needed.

[thread.pool]
# Worker threads running long operations (copy, compress, size calculation)
size = 5

[log]
# Log filter used when TWINCOM_LOG is not set (error, warn, info, debug, trace)
level = "warn"

[panels]
# Start locations of the panels, as a path or URI (e.g. "mem:/")
# left = "/home/user"
# right = "file:///tmp"

[archive]
# Name of archives created by the compress command
name = "{archive}"
"##,
        archive = crate::ops::DEFAULT_ARCHIVE_NAME
    )
}

impl Config {
    /// Load configuration from the platform config file, creating it if missing
    pub fn load() -> Self {
        let Some(config_path) = config_file() else {
            eprintln!("Warning: Could not determine config directory");
            return Config::default();
        };
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, creating a default file if missing.
    /// Problems are reported and the defaults used instead.
    pub fn load_from(config_path: &Path) -> Self {
        // Create config directory if it doesn't exist
        if let Some(config_dir) = config_path.parent()
            && !config_dir.as_os_str().is_empty()
            && !config_dir.exists()
            && let Err(e) = fs::create_dir_all(config_dir)
        {
            eprintln!("Warning: Could not create config directory: {}", e);
            return Config::default();
        }

        // Create default config if it doesn't exist
        if !config_path.exists()
            && let Err(e) = fs::write(config_path, default_config())
        {
            eprintln!("Warning: Could not create config file: {}", e);
            return Config::default();
        }

        match fs::read_to_string(config_path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(mut config) => {
                    config.path = Some(config_path.to_path_buf());
                    config
                }
                Err(e) => {
                    eprintln!("Warning: {}", e);
                    eprintln!("Using default configuration");
                    Config::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Could not read config file: {}", e);
                Config::default()
            }
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let document: DocumentMut = content
            .parse()
            .map_err(|e| AppError::Config(format!("Could not parse config file: {}", e)))?;
        let settings: Settings = toml_edit::de::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid config values: {}", e)))?;
        Ok(Self {
            settings,
            document,
            path: None,
        })
    }

    /// File this configuration was read from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl PropertySource for Config {
    /// Dotted keys walk nested tables: `thread.pool.size` reads `[thread.pool] size`
    fn property(&self, key: &str) -> Option<String> {
        let mut item = self.document.as_item();
        for segment in key.split('.') {
            item = item.get(segment)?;
        }
        match item {
            Item::Value(value) => Some(render_value(value)),
            _ => None,
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.value().clone(),
        Value::Integer(i) => i.value().to_string(),
        Value::Float(f) => f.value().to_string(),
        Value::Boolean(b) => b.value().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml_str(&default_config()).unwrap();
        assert_eq!(config.property("thread.pool.size").as_deref(), Some("5"));
        assert_eq!(config.settings.log.level, "warn");
        assert_eq!(config.settings.archive.name, "compressed.zip");
        assert!(config.settings.panels.left.is_none());
    }

    #[test]
    fn test_property_lookup_walks_tables() {
        let config = Config::from_toml_str(
            r#"
thread.pool.size = 3

[panels]
left = "mem:/"

[extra]
enabled = true
ratio = 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.property("thread.pool.size").as_deref(), Some("3"));
        assert_eq!(config.property("panels.left").as_deref(), Some("mem:/"));
        assert_eq!(config.property("extra.enabled").as_deref(), Some("true"));
        assert_eq!(config.property("extra.ratio").as_deref(), Some("0.5"));
        // Tables and missing keys are not properties
        assert_eq!(config.property("panels"), None);
        assert_eq!(config.property("thread.pool.count"), None);
        assert_eq!(config.settings.panels.left.as_deref(), Some("mem:/"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[thread.pool\nsize = ").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_from_writes_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.toml");

        let config = Config::load_from(&path);
        assert!(path.exists());
        assert_eq!(config.path(), Some(path.as_path()));
        assert_eq!(config.property("thread.pool.size").as_deref(), Some("5"));
    }

    #[test]
    fn test_load_from_broken_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "log = [unterminated").unwrap();

        let config = Config::load_from(&path);
        assert!(config.path().is_none());
        assert_eq!(config.settings.log.level, "warn");
    }

    #[test]
    fn test_hashmap_is_a_property_source() {
        let props = HashMap::from([("thread.pool.size".to_string(), "7".to_string())]);
        assert_eq!(props.property("thread.pool.size").as_deref(), Some("7"));
        assert_eq!(props.property("missing"), None);
    }
}
