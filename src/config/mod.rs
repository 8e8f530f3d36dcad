//! Typed settings loaded from `env/<environment>.env`, overlaid by the process environment.
//!
//! The environment name comes from `APP_ENV` (default `debug`). Values set in the process
//! environment win over the file. Settings are built once at startup and passed explicitly.

use crate::error::ConfigError;
use crate::event::RetryPolicy;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const APP_ENV: &str = "APP_ENV";
pub const DEFAULT_ENVIRONMENT: &str = "debug";
pub const ENV_DIR: &str = "env";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub listen_addr: String,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageSettings {
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub use_ssl: bool,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySettings {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettings {
    pub buffer: usize,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl EventSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_count,
            delay: self.retry_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub environment: String,
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub identity: IdentitySettings,
    pub http: HttpSettings,
    pub events: EventSettings,
}

impl Settings {
    /// Fails when the env file for the selected environment cannot be read.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(ENV_DIR), true)
    }

    /// Like [`Settings::load`], but a missing or unreadable env file is logged and skipped.
    pub fn load_lenient() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(ENV_DIR), false)
    }

    pub fn load_from(dir: &Path, strict: bool) -> Result<Self, ConfigError> {
        load_with(dir, strict, std::env::vars().collect())
    }

    /// Build from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup(environment: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Ok(Settings {
            environment: environment.to_string(),
            database: DatabaseSettings {
                url: get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost/bedrock".into()),
                max_connections: parsed(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
                query_timeout: Duration::from_secs(parsed(&get, "QUERY_TIMEOUT_SECS", 30)?),
            },
            server: ServerSettings {
                listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:3000".into()),
            },
            storage: StorageSettings {
                endpoint: get("S3_ENDPOINT"),
                access_key_id: get("S3_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: get("S3_SECRET_ACCESS_KEY").unwrap_or_default(),
                region: get("S3_REGION").unwrap_or_else(|| crate::storage::DEFAULT_REGION.into()),
                use_ssl: flag(&get, "S3_USE_SSL")?,
            },
            identity: IdentitySettings {
                base_url: get("IDENTITY_BASE_URL"),
            },
            http: HttpSettings {
                timeout: Duration::from_secs(parsed(&get, "HTTP_TIMEOUT_SECS", 10)?),
            },
            events: EventSettings {
                buffer: parsed(&get, "EVENT_BUFFER", crate::event::BUFFER_LIMIT)?,
                retry_count: parsed(&get, "EVENT_RETRY_COUNT", crate::event::RETRY_COUNT)?,
                retry_delay: Duration::from_millis(parsed(&get, "EVENT_RETRY_DELAY_MS", 5000)?),
            },
        })
    }

    pub fn is_release(&self) -> bool {
        self.environment == "release"
    }
}

fn load_with(dir: &Path, strict: bool, process: HashMap<String, String>) -> Result<Settings, ConfigError> {
    let environment = process
        .get(APP_ENV)
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_ENVIRONMENT)
        .to_string();
    let path = dir.join(format!("{environment}.env"));
    let mut values = match read_env_file(&path) {
        Ok(values) => values,
        Err(e) if strict => return Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "continuing without env file");
            HashMap::new()
        }
    };
    values.extend(process);
    tracing::debug!(environment = %environment, path = %path.display(), "settings loaded");
    Settings::from_lookup(&environment, |key| values.get(key).cloned())
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let load = |e: dotenvy::Error| ConfigError::Load(format!("{}: {e}", path.display()));
    dotenvy::from_path_iter(path)
        .map_err(load)?
        .map(|item| item.map_err(load))
        .collect()
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(value) => Err(ConfigError::Invalid { key, value }),
    }
}
