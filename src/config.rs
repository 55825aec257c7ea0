use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "BGPROC_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fallback filter when RUST_LOG is unset
    pub log_level: String,
    pub manager: ManagerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Per-stream byte cap for requests that set none
    pub default_output_limit: Option<usize>,
    /// How long to keep draining pipes after the child exits
    pub drain_timeout_ms: u64,
    /// How long cleanup waits for each killed process
    pub cleanup_grace_ms: u64,
    /// Shell override for shell-mode commands, e.g. "bash -c"
    pub shell: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            manager: ManagerConfig::default(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_output_limit: None,
            drain_timeout_ms: 2000,
            cleanup_grace_ms: 500,
            shell: None,
        }
    }
}

impl Config {
    /// Load from the first config file found, or defaults
    pub fn load() -> Self {
        for path in Self::search_paths() {
            if !path.exists() {
                continue;
            }
            match Self::from_path(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring config {}: {e:#}", path.display()),
            }
        }

        Config::default()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Candidate files, highest priority first
    pub fn search_paths() -> Vec<PathBuf> {
        let paths = [
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            dirs::config_dir().map(|p| p.join("bgproc/config.toml")),
            dirs::home_dir().map(|p| p.join(".bgproc.toml")),
            Some(PathBuf::from("bgproc.toml")),
        ];
        paths.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.manager.drain_timeout_ms, 2000);
        assert_eq!(config.manager.cleanup_grace_ms, 500);
        assert!(config.manager.default_output_limit.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [manager]
            default_output_limit = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.manager.default_output_limit, Some(1024));
        assert_eq!(config.manager.cleanup_grace_ms, 500);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("manager = 3").is_err());
    }
}
