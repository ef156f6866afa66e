use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::repository::DEFAULT_KEY;

const DEFAULT_ENV_PREFIX: &str = "STORY_REEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_key")]
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            key: default_key(),
        }
    }
}

fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionConfig {
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            tick_rate: default_tick_rate(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(50)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("story-reel").join("story-reel.log"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = apply_env(cfg, &collect_env(prefix));

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }
    if !other.storage.key.is_empty() {
        base.storage.key = other.storage.key;
    }

    if !other.sync.poll_interval.is_zero() {
        base.sync.poll_interval = other.sync.poll_interval;
    }

    if other.acquisition.max_size_bytes != 0 {
        base.acquisition.max_size_bytes = other.acquisition.max_size_bytes;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }
    if !other.ui.tick_rate.is_zero() {
        base.ui.tick_rate = other.ui.tick_rate;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn collect_env(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

// Environment values override the file field by field, so unset variables
// never reset something the file configured.
fn apply_env(mut cfg: Config, vars: &HashMap<String, String>) -> Config {
    for (key, value) in vars {
        apply_env_value(&mut cfg, key, value.clone());
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "storage.key" => {
            if !value.is_empty() {
                cfg.storage.key = value;
            }
        }
        "sync.poll_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.sync.poll_interval = duration;
            }
        }
        "acquisition.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.acquisition.max_size_bytes = parsed;
            }
        }
        "ui.theme" => cfg.ui.theme = value,
        "ui.tick_rate" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.tick_rate = duration;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("story-reel").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_sensible() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.key, "stories");
        assert_eq!(cfg.sync.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.acquisition.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.ui.theme, "default");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "storage:\n  path: /tmp/reel.db\nsync:\n  poll_interval: 1s\nui:\n  theme: dracula\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("STORY_REEL_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.storage.path, Some(PathBuf::from("/tmp/reel.db")));
        assert_eq!(cfg.storage.key, "stories");
        assert_eq!(cfg.sync.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.ui.theme, "dracula");
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "storage: [unterminated").unwrap();
        assert!(load(LoadOptions {
            config_file: Some(path),
            env_prefix: None,
        })
        .is_err());
    }

    #[test]
    fn env_overrides_single_fields() {
        let mut vars = HashMap::new();
        vars.insert("storage.path".to_string(), "/tmp/other.db".to_string());
        vars.insert("sync.poll_interval".to_string(), "2s".to_string());
        vars.insert("acquisition.max_size_bytes".to_string(), "oops".to_string());
        let mut base = Config::default();
        base.ui.theme = "dracula".into();
        let cfg = apply_env(base, &vars);
        assert_eq!(cfg.storage.path, Some(PathBuf::from("/tmp/other.db")));
        assert_eq!(cfg.sync.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.acquisition.max_size_bytes, default_max_size_bytes());
        assert_eq!(cfg.ui.theme, "dracula");
    }

    #[test]
    fn env_prefix_is_read_from_process() {
        env::set_var("STORY_REEL_TEST_ENV_UI__THEME", "nord");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("STORY_REEL_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "nord");
        env::remove_var("STORY_REEL_TEST_ENV_UI__THEME");
    }
}
