//! Manager configuration
//!
//! Stored in ~/.pitunnel-manager/config.json. Missing fields fall back to
//! their defaults, so an empty `{}` file is valid.

use anyhow::{Context, Result};
use pitunnel_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Tool binary, bare name (looked up on PATH) or absolute path
    pub tool_binary: String,
    /// Upper bound on a single tool invocation
    pub invocation_timeout_secs: u64,
    /// How long to look for a newly started tunnel
    pub settle_delay_ms: u64,
    /// How long to wait for a stopped tunnel to exit
    pub removal_grace_ms: u64,
    /// Look up boot registrations before removing a tunnel
    pub check_registrations: bool,
    /// Tunnel output logs; defaults to ~/.pitunnel-manager/logs
    pub log_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tool_binary: "pitunnel".to_string(),
            invocation_timeout_secs: 5,
            settle_delay_ms: 1500,
            removal_grace_ms: 3000,
            check_registrations: true,
            log_dir: None,
        }
    }
}

impl ManagerConfig {
    /// Orchestrator settings for this configuration
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            tool: self.tool_binary.clone(),
            invocation_timeout: Duration::from_secs(self.invocation_timeout_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            removal_grace: Duration::from_millis(self.removal_grace_ms),
            check_registrations: self.check_registrations,
            log_dir: self
                .log_dir
                .clone()
                .or_else(|| ConfigManager::default_dir().ok().map(|dir| dir.join("logs"))),
            ..OrchestratorConfig::default()
        }
    }
}

/// Loads and saves the configuration file
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for ~/.pitunnel-manager/config.json
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: Self::default_dir()?.join("config.json"),
        })
    }

    /// Manager for an explicit file (used by tests)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// ~/.pitunnel-manager
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".pitunnel-manager"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, or defaults if the file does not exist
    pub fn load(&self) -> Result<ManagerConfig> {
        if !self.path.exists() {
            return Ok(ManagerConfig::default());
        }

        let json = fs::read_to_string(&self.path)
            .context(format!("Failed to read config file: {:?}", self.path))?;

        let config: ManagerConfig = serde_json::from_str(&json)
            .context(format!("Failed to parse config file: {:?}", self.path))?;

        Ok(config)
    }

    pub fn save(&self, config: &ManagerConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.path, json)
            .context(format!("Failed to write config file: {:?}", self.path))?;

        Ok(())
    }

    pub fn set_tool(&self, tool: String) -> Result<()> {
        if tool.trim().is_empty() {
            anyhow::bail!("Tool path cannot be empty");
        }
        let mut config = self.load()?;
        config.tool_binary = tool;
        self.save(&config)
    }

    pub fn set_timeout(&self, secs: u64) -> Result<()> {
        if secs == 0 {
            anyhow::bail!("Timeout must be at least one second");
        }
        let mut config = self.load()?;
        config.invocation_timeout_secs = secs;
        self.save(&config)
    }

    /// Put every setting back to its default
    pub fn reset(&self) -> Result<()> {
        self.save(&ManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ConfigManager {
        ConfigManager::with_path(dir.path().join("nested").join("config.json"))
    }

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.tool_binary, "pitunnel");
        assert_eq!(config.invocation_timeout_secs, 5);
        assert!(config.check_registrations);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(manager(&dir).load().unwrap(), ManagerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"tool_binary": "/opt/pitunnel/pitunnel"}"#).unwrap();

        let config = ConfigManager::with_path(path).load().unwrap();
        assert_eq!(config.tool_binary, "/opt/pitunnel/pitunnel");
        assert_eq!(config.removal_grace_ms, 3000);
    }

    #[test]
    fn test_set_tool_and_timeout_persist() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.set_tool("/usr/local/bin/pitunnel".to_string()).unwrap();
        manager.set_timeout(12).unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.tool_binary, "/usr/local/bin/pitunnel");
        assert_eq!(config.invocation_timeout_secs, 12);

        assert!(manager.set_timeout(0).is_err());
        assert!(manager.set_tool("  ".to_string()).is_err());

        manager.reset().unwrap();
        assert_eq!(manager.load().unwrap(), ManagerConfig::default());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(ConfigManager::with_path(path).load().is_err());
    }

    #[test]
    fn test_orchestrator_config_conversion() {
        let config = ManagerConfig {
            tool_binary: "pt".to_string(),
            invocation_timeout_secs: 9,
            settle_delay_ms: 10,
            removal_grace_ms: 20,
            check_registrations: false,
            log_dir: Some(PathBuf::from("/var/log/pitunnel")),
        };

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.tool, "pt");
        assert_eq!(orchestrator.invocation_timeout, Duration::from_secs(9));
        assert_eq!(orchestrator.settle_delay, Duration::from_millis(10));
        assert_eq!(orchestrator.removal_grace, Duration::from_millis(20));
        assert!(!orchestrator.check_registrations);
        assert_eq!(orchestrator.log_dir, Some(PathBuf::from("/var/log/pitunnel")));
    }
}
