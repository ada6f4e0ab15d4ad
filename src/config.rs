use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{error, info};

use crate::logger::{LogConfig, LogFormat};

pub const IDLE_TEARDOWN_KEY: &str = "DISCORD_IDLE_TEARDOWN_SECS";
pub const CORRELATION_TTL_KEY: &str = "DISCORD_CORRELATION_TTL_SECS";
pub const GRANT_TTL_KEY: &str = "DISCORD_GRANT_TTL_SECS";
pub const TOKEN_KEY: &str = "DISCORD_TOKEN";
pub const LOG_LEVEL_KEY: &str = "LOG_LEVEL";
pub const LOG_DIR_KEY: &str = "LOG_DIR";
pub const LOG_FORMAT_KEY: &str = "LOG_FORMAT";

/// A source of string settings. Backends are typetag-serialized so the choice
/// of source can live in a config file.
#[async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, seeded from a `.env` file when present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(e) => error!("could not parse .env at {}: {}", env_file.display(), e),
            }
        } else {
            info!("no .env at {}, using the process environment", env_file.display());
        }

        Box::new(Self { env_file })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// Fixed in-memory settings, for embedding hosts that already hold their
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Box::new(Self { map })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value} is not valid: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Runtime knobs for the Discord services, resolved from a [`ConfigManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    pub idle_teardown_secs: u64,
    pub correlation_ttl_secs: u64,
    pub grant_ttl_secs: u64,
    pub log: LogConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_teardown_secs: 300,
            correlation_ttl_secs: 300,
            grant_ttl_secs: 300,
            log: LogConfig::default(),
        }
    }
}

impl Settings {
    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let log_format = match config.get(LOG_FORMAT_KEY).await {
            Some(raw) => raw.parse::<LogFormat>().map_err(|reason| ConfigError::Invalid {
                key: LOG_FORMAT_KEY.to_string(),
                value: raw,
                reason,
            })?,
            None => defaults.log.format,
        };
        Ok(Self {
            idle_teardown_secs: secs(config, IDLE_TEARDOWN_KEY, defaults.idle_teardown_secs).await?,
            correlation_ttl_secs: secs(config, CORRELATION_TTL_KEY, defaults.correlation_ttl_secs).await?,
            grant_ttl_secs: secs(config, GRANT_TTL_KEY, defaults.grant_ttl_secs).await?,
            log: LogConfig {
                level: config.get(LOG_LEVEL_KEY).await.unwrap_or(defaults.log.level),
                dir: config.get(LOG_DIR_KEY).await.map(PathBuf::from),
                format: log_format,
            },
        })
    }

    pub fn idle_teardown(&self) -> Duration {
        Duration::from_secs(self.idle_teardown_secs)
    }

    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }

    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_secs)
    }
}

async fn secs(config: &ConfigManager, key: &str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = config.get(key).await else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            reason: "must be at least one second".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
    }
}
