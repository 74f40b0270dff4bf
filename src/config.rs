use std::{env, path::PathBuf, time::Duration};

use directories::BaseDirs;
use lazy_static::lazy_static;
use serde::Deserialize;

use crate::services::{AutoSaveOptions, Session};
use crate::state::DEFAULT_HISTORY_CAPACITY;

const CONFIG: &str = include_str!("../.config/config.json5");

/// Prefix for environment overrides, e.g. `CROSSTAB_API__TOKEN`
pub const ENV_PREFIX: &str = "CROSSTAB";

const CONFIG_FILE_NAME: &str = "config.json5";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn session(&self) -> Session {
        Session::new(self.token.clone(), self.base_url.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub interval_ms: u64,
}

impl AutoSaveConfig {
    pub fn options(&self) -> AutoSaveOptions {
        AutoSaveOptions {
            enabled: self.enabled,
            debounce: Duration::from_millis(self.debounce_ms),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub auto_save: AutoSaveConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub config_dir: PathBuf,
}

lazy_static! {
    pub static ref CONFIG_FOLDER: Option<PathBuf> = env::var(format!("{ENV_PREFIX}_CONFIG"))
        .ok()
        .map(PathBuf::from);
}

impl Config {
    /// Layer the embedded defaults, a config file and the environment.
    ///
    /// An explicit `config_path` must exist. Without one, `config.json5` in
    /// the config directory is read if present.
    pub fn from_path(config_path: Option<&PathBuf>) -> Result<Self, config::ConfigError> {
        let config_dir = get_config_dir();
        let (file, required) = match config_path {
            Some(path) => (expand_tilde(path), true),
            None => (config_dir.join(CONFIG_FILE_NAME), false),
        };

        let cfg = config::Config::builder()
            .add_source(config::File::from_str(CONFIG, config::FileFormat::Json5))
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .add_source(
                config::File::from(file)
                    .format(config::FileFormat::Json5)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(cfg)
    }
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix('~')) {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest.trim_start_matches('/'));
        }
    }
    path.clone()
}

pub fn get_config_dir() -> PathBuf {
    if let Some(s) = CONFIG_FOLDER.clone() {
        s
    } else {
        PathBuf::from(".").join(".config")
    }
}
