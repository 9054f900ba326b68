use anyhow::{anyhow, Context, Result};
use rp_chain::ContractRunner;
use rp_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::oracle::DEFAULT_PRICE;

/// Main configuration for a republic process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: GatewayConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity used when a command does not name a user
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Users hosted by `republic run`, in addition to the default user
    #[serde(default)]
    pub users: Vec<String>,
}

fn default_user() -> String {
    "guest_node".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Lmdb,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Wall-clock limit for one contract execution
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    500
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Fallback price in USD per gram
    #[serde(default = "default_price")]
    pub price: f64,
}

fn default_price() -> f64 {
    DEFAULT_PRICE
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            price: default_price(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms)
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }

        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Every user `run` should host, default user first, without duplicates.
    pub fn hosted_users(&self) -> Vec<String> {
        let mut users = vec![rp_chain::normalize_user_id(&self.node.default_user)];
        for user in &self.node.users {
            let user = rp_chain::normalize_user_id(user);
            if !users.contains(&user) {
                users.push(user);
            }
        }
        users
    }

    pub fn runner(&self) -> ContractRunner {
        ContractRunner::new(Duration::from_millis(self.contract.timeout_ms))
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".republic"))
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join("config.toml"))
}

/// Document store directory next to the config file
pub fn store_path_from_config(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or(config_path)
        .join("documents")
}
