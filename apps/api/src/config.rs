//! API server configuration.
//!
//! ## Configuration Sources (Priority Order)
//! 1. Environment variables (`MERCATO_*`)
//! 2. Config file (`MERCATO_CONFIG`, else `mercato.toml` in the platform config dir)
//! 3. Defaults (this file)
//!
//! ```toml
//! log_filter = "info,mercato_engine=debug"
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! path = "/var/lib/mercato/mercato.db"
//! max_connections = 5
//!
//! [auth]
//! jwt_secret = "..."
//!
//! [idempotency]
//! in_progress_timeout_secs = 120
//! retention_days = 30
//! store_business_rejections = false
//!
//! [day_close]
//! force_close_mode = "auto_close"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use mercato_core::machines::day_close::ForceCloseMode;
use mercato_db::DbConfig;
use mercato_engine::EngineConfig;

/// Development-only signing secret; `validate()` refuses it outside debug builds.
pub const DEV_JWT_SECRET: &str = "mercato-dev-secret-change-in-production";

const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("mercato.db"),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
    /// Lifetime of tokens minted by [`crate::auth::JwtManager::issue`].
    pub token_lifetime_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_lifetime_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub log_filter: String,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    /// `[idempotency]` and `[day_close]` sections.
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            log_filter: "info".to_string(),
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            auth: AuthSettings::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Defaults, then the config file if one exists, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => ApiConfig::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `MERCATO_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(filter) = var("MERCATO_LOG") {
            self.log_filter = filter;
        }
        if let Some(addr) = var("MERCATO_BIND_ADDR") {
            self.server.bind_addr = parse("MERCATO_BIND_ADDR", &addr)?;
        }
        if let Some(port) = var("MERCATO_PORT") {
            self.server.port = parse("MERCATO_PORT", &port)?;
        }
        if let Some(path) = var("MERCATO_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(max) = var("MERCATO_MAX_CONNECTIONS") {
            self.database.max_connections = parse("MERCATO_MAX_CONNECTIONS", &max)?;
        }
        if let Some(secret) = var("MERCATO_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(secs) = var("MERCATO_IN_PROGRESS_TIMEOUT_SECS") {
            self.engine.idempotency.in_progress_timeout_secs =
                parse("MERCATO_IN_PROGRESS_TIMEOUT_SECS", &secs)?;
        }
        if let Some(days) = var("MERCATO_RETENTION_DAYS") {
            self.engine.idempotency.retention_days = parse("MERCATO_RETENTION_DAYS", &days)?;
        }
        if let Some(flag) = var("MERCATO_STORE_BUSINESS_REJECTIONS") {
            self.engine.idempotency.store_business_rejections =
                parse("MERCATO_STORE_BUSINESS_REJECTIONS", &flag)?;
        }
        if let Some(mode) = var("MERCATO_FORCE_CLOSE_MODE") {
            self.engine.day_close.force_close_mode = match mode.as_str() {
                "auto_close" => ForceCloseMode::AutoClose,
                "ignore" => ForceCloseMode::Ignore,
                _ => return Err(ConfigError::InvalidValue("MERCATO_FORCE_CLOSE_MODE".to_string())),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue("database.max_connections".to_string()));
        }
        if self.auth.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        if self.auth.token_lifetime_secs <= 0 {
            return Err(ConfigError::InvalidValue("auth.token_lifetime_secs".to_string()));
        }
        if !cfg!(debug_assertions) && self.auth.jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::MissingRequired("MERCATO_JWT_SECRET".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_addr, self.server.port)
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone()).max_connections(self.database.max_connections)
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MERCATO_CONFIG") {
        return Some(PathBuf::from(path));
    }
    ProjectDirs::from("com", "Mercato", "mercato").map(|dirs| dirs.config_dir().join("mercato.toml"))
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("JWT secret must be at least 16 characters")]
    WeakSecret,

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
