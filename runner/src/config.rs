//! Layered configuration: explicit `--config` path, then `<brainDir>/config.yaml`,
//! then the user config directory, then built-in defaults — each layer
//! optional, with environment variables applied last.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_brain_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".brain")
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub brain: BrainConfig,
    pub concurrency: ConcurrencyConfig,
    pub git: GitConfig,
    pub agent: AgentConfig,
    pub oauth: OAuthConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brain: BrainConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            git: GitConfig::default(),
            agent: AgentConfig::default(),
            oauth: OAuthConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration through the fallback chain, then apply
    /// environment variable overrides.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_layered(config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_layered(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let brain_dir_local = default_brain_dir();
        let project_local = brain_dir_local.join("config.yaml");
        if project_local.exists() {
            match Self::load_from_file(&project_local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("Failed to load config from {}: {e}", project_local.display()),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("runner").join("config.yaml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("Failed to load config from {}: {e}", user_config.display()),
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Read just the log level out of a config file, without requiring the
    /// rest of the file to parse cleanly — used before full config load so
    /// logging can be initialized as early as possible.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = config_path.cloned().unwrap_or_else(|| default_brain_dir().join("config.yaml"));
        let content = fs::read_to_string(path).ok()?;
        let value: serde_yaml::Value = serde_yaml::from_str(&content).ok()?;
        value.get("log_level")?.as_str().map(String::from)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("BRAIN_API_URL") {
            self.brain.api_url = url;
        }
        if let Some(port) = std::env::var("BRAIN_PORT").ok().and_then(|v| v.parse().ok()) {
            self.brain.port = port;
        }
        if let Ok(host) = std::env::var("BRAIN_HOST") {
            self.brain.host = host;
        }
        if let Ok(dir) = std::env::var("BRAIN_DIR") {
            self.brain.dir = PathBuf::from(dir);
        }
        if let Ok(enabled) = std::env::var("ENABLE_AUTH") {
            self.oauth.enabled = matches!(enabled.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub api_url: String,
    pub port: u16,
    pub host: String,
    pub dir: PathBuf,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3333".to_string(),
            port: 3333,
            host: "localhost".to_string(),
            dir: default_brain_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
    pub poll_interval_secs: u64,
    pub max_spawn_failures: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval_secs: 15,
            max_spawn_failures: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub worktree_subdir: String,
    pub branch_prefix: String,
    pub min_disk_space_gb: u64,
    pub setup_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_subdir: ".worktrees".to_string(),
            branch_prefix: String::new(),
            min_disk_space_gb: 1,
            setup_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub default_agent: String,
    pub default_model: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_agent: "claude".to_string(),
            default_model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub enabled: bool,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub auth_code_ttl_secs: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            auth_code_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
    pub oauth_db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let brain_dir = default_brain_dir();
        Self {
            state_dir: brain_dir.join("state"),
            oauth_db_path: brain_dir.join("brain.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.concurrency.max_concurrent, 3);
        assert_eq!(config.brain.api_url, "http://localhost:3333");
        assert!(config.oauth.enabled);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let yaml = "concurrency:\n  max_concurrent: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.concurrency.max_concurrent, 7);
        assert_eq!(config.concurrency.poll_interval_secs, 15);
        assert_eq!(config.agent.default_agent, "claude");
    }

    #[test]
    fn env_override_wins_over_file_defaults() {
        // SAFETY: test-local env var scoped to this test's thread of execution.
        unsafe {
            std::env::set_var("BRAIN_PORT", "9999");
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("BRAIN_PORT");
        }
        assert_eq!(config.brain.port, 9999);
    }
}
