//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The API and admin keys come from POOL_API_KEY / POOL_ADMIN_KEY or from
//! key files, never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const API_KEY_ENV: &str = "POOL_API_KEY";
const ADMIN_KEY_ENV: &str = "POOL_ADMIN_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Resolved keys. Both are set after a successful `load`.
    #[serde(skip)]
    pub keys: Option<Keys>,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// External lease API, /health and /metrics
    pub listen_addr: SocketAddr,
    /// Admin API, separate listener
    pub admin_listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Largest accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub request_body_limit: usize,
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(default)]
    pub admin_key_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    /// Append-only JSON lines file. Unset disables the file sink.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Entries kept in memory for the admin log view
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file: None,
            recent_capacity: default_recent_capacity(),
        }
    }
}

/// Shared keys checked by the auth layer.
#[derive(Debug)]
pub struct Keys {
    pub api: Secret<String>,
    pub admin: Secret<String>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_recent_capacity() -> usize {
    500
}

/// Env var first, then the key file. A blank file yields no key.
fn resolve_key(env: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(key) = std::env::var(env) {
        let key = key.trim().to_owned();
        if !key.is_empty() {
            return Ok(Some(Secret::new(key)));
        }
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let key = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read key file {}: {e}", file.display()))
    })?;
    let key = key.trim().to_owned();
    Ok((!key.is_empty()).then(|| Secret::new(key)))
}

impl Config {
    /// Load configuration from a TOML file and resolve both keys.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.server.request_body_limit == 0 {
            return Err(common::Error::Config(
                "request_body_limit must be greater than 0".into(),
            ));
        }
        if config.audit.recent_capacity == 0 {
            return Err(common::Error::Config(
                "recent_capacity must be greater than 0".into(),
            ));
        }
        if config.store.path.as_os_str().is_empty() {
            return Err(common::Error::Config("store.path must not be empty".into()));
        }
        if config.server.listen_addr == config.server.admin_listen_addr {
            return Err(common::Error::Config(
                "listen_addr and admin_listen_addr must differ".into(),
            ));
        }

        let api = resolve_key(API_KEY_ENV, config.server.api_key_file.as_deref())?.ok_or_else(
            || common::Error::Config(format!("API key missing: set {API_KEY_ENV} or api_key_file")),
        )?;
        let admin = resolve_key(ADMIN_KEY_ENV, config.server.admin_key_file.as_deref())?
            .ok_or_else(|| {
                common::Error::Config(format!(
                    "admin key missing: set {ADMIN_KEY_ENV} or admin_key_file"
                ))
            })?;
        config.keys = Some(Keys { api, admin });

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("email-pool-api.toml")
    }
}
