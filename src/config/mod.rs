//! Configuration loading for the job store.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `JOBSTORE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "JOBSTORE_";

/// Application configuration derived from `JOBSTORE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Worker loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Host name matched against a job's `exec_host`
    #[serde(default = "default_worker_host")]
    pub host: String,
    /// Node names matched against a job's `exec_node`.
    ///
    /// Read from a comma-separated `JOBSTORE_WORKER_NODES`; in `.env` files a
    /// value containing spaces must be quoted.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Milliseconds between polls of the readiness query
    #[serde(default = "default_worker_tick_ms")]
    pub tick_ms: u64,
    /// Upper bound of the random delay added to each tick
    #[serde(default = "default_worker_jitter_ms")]
    pub jitter_ms: u64,
    /// Maximum number of jobs executed at once
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Maximum number of tickets fetched per poll
    #[serde(default = "default_worker_fetch_limit")]
    pub fetch_limit: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_worker_host(),
            nodes: Vec::new(),
            tick_ms: default_worker_tick_ms(),
            jitter_ms: default_worker_jitter_ms(),
            concurrency: default_worker_concurrency(),
            fetch_limit: default_worker_fetch_limit(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (database credentials are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url_credentials(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DB_MAX_CONNECTIONS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        self.worker.validate()
    }
}

impl WorkerConfig {
    /// Validate worker bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_HOST".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.tick_ms < 100 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_TICK_MS".to_string(),
                message: format!("{} is below the 100ms minimum", self.tick_ms),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.fetch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_FETCH_LIMIT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn redact_url_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    match rest.rfind('@') {
        Some(at) => format!("{}[REDACTED]{}", &url[..scheme_end + 3], &rest[at..]),
        None => url.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://jobstore.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_worker_host() -> String {
    "localhost".to_string()
}

fn default_worker_tick_ms() -> u64 {
    5000
}

fn default_worker_jitter_ms() -> u64 {
    500
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_fetch_limit() -> u64 {
    20
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid log format '{value}'; expected 'json' or 'pretty'")]
    InvalidLogFormat { value: String },
    #[error("database url is missing; set JOBSTORE_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("invalid value for JOBSTORE_{key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Loads configuration using layered `.env` files and `JOBSTORE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`
    /// and finally the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.trim().is_empty());

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            host: take("WORKER_HOST").unwrap_or(worker_defaults.host),
            nodes: take("WORKER_NODES")
                .map(|nodes| {
                    nodes
                        .split(',')
                        .map(|node| node.trim().to_string())
                        .filter(|node| !node.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            tick_ms: parse_or("WORKER_TICK_MS", take("WORKER_TICK_MS"), worker_defaults.tick_ms)?,
            jitter_ms: parse_or(
                "WORKER_JITTER_MS",
                take("WORKER_JITTER_MS"),
                worker_defaults.jitter_ms,
            )?,
            concurrency: parse_or(
                "WORKER_CONCURRENCY",
                take("WORKER_CONCURRENCY"),
                worker_defaults.concurrency,
            )?,
            fetch_limit: parse_or(
                "WORKER_FETCH_LIMIT",
                take("WORKER_FETCH_LIMIT"),
                worker_defaults.fetch_limit,
            )?,
        };

        let config = AppConfig {
            profile: take("PROFILE").unwrap_or(profile_hint),
            api_bind_addr: take("API_BIND_ADDR").unwrap_or_else(default_api_bind_addr),
            log_level: take("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take("LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: take("DATABASE_URL").unwrap_or_else(default_database_url),
            db_max_connections: parse_or(
                "DB_MAX_CONNECTIONS",
                take("DB_MAX_CONNECTIONS"),
                default_db_max_connections(),
            )?,
            db_acquire_timeout_ms: parse_or(
                "DB_ACQUIRE_TIMEOUT_MS",
                take("DB_ACQUIRE_TIMEOUT_MS"),
                default_db_acquire_timeout_ms(),
            )?,
            worker,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", raw, err),
        }),
    }
}
