use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Path to the SQLite database file
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
    /// Address the HTTP endpoint binds to
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: SocketAddr,
    /// Realm announced in the Basic auth challenge
    #[serde(default = "defaults::auth_realm")]
    pub auth_realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            database_path: defaults::database_path(),
            listen_addr: defaults::listen_addr(),
            auth_realm: defaults::auth_realm(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: the config file if present, then environment
    /// variable overrides on top.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let path = Self::config_file_path()?;
                if path.exists() {
                    tracing::debug!("loading gitvault config from {:?}", path);
                    Self::load_from_file(&path)?
                } else {
                    ServerConfig::default()
                }
            }
        };

        if let Ok(db) = env::var("GITVAULT_DB") {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(addr) = env::var("GITVAULT_LISTEN") {
            config.listen_addr = addr
                .parse()
                .context("Failed to parse GITVAULT_LISTEN as a socket address")?;
        }
        if let Ok(realm) = env::var("GITVAULT_REALM") {
            config.auth_realm = realm;
        }
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/gitvault/config.yaml"))
            .context("Could not determine home directory for config file")
    }
}

mod defaults {
    use std::net::SocketAddr;
    use std::path::PathBuf;

    pub(crate) fn database_path() -> PathBuf {
        PathBuf::from("gitvault.db")
    }

    pub(crate) fn listen_addr() -> SocketAddr {
        "127.0.0.1:8417".parse().expect("static address parses")
    }

    pub(crate) fn auth_realm() -> String {
        "gitvault".to_string()
    }
}
