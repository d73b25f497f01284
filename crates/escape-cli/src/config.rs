// ABOUTME: Configuration management for the escape CLI
// ABOUTME: Persists the ship URL, name, and session cookie after login

use anyhow::{Context, Result};
use escape_airlock::AirlockConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Saved connection to one ship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscapeConfig {
    /// Ship URL (e.g., "https://sampel-palnet.arvo.network")
    pub ship_url: String,

    /// Ship name without the leading `~`
    pub ship: String,

    /// Session cookie from login
    pub cookie: String,

    /// Desk threads run from by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desk: Option<String>,
}

impl EscapeConfig {
    /// Returns the config directory path (~/.config/escape)
    pub fn config_dir() -> Result<PathBuf> {
        // Use XDG-style path on all platforms for consistency
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("escape"))
    }

    /// Returns the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Saves the configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Loads the configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("Failed to parse config")?;
        Ok(config)
    }

    /// Checks if configuration exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Channel client settings for this ship.
    pub fn to_airlock_config(&self) -> AirlockConfig {
        let config =
            AirlockConfig::new(&self.ship_url, &self.ship).with_cookie(self.cookie.clone());
        match &self.desk {
            Some(desk) => config.with_desk(desk.clone()),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EscapeConfig {
        EscapeConfig {
            ship_url: "https://sampel-palnet.arvo.network".into(),
            ship: "sampel-palnet".into(),
            cookie: "urbauth-~sampel-palnet=0v3.abcde".into(),
            desk: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = sample();
        config.save_to(&path).unwrap();
        assert_eq!(EscapeConfig::load_from(&path).unwrap(), config);

        // No desk key is written when unset
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("desk"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = EscapeConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_to_airlock_config() {
        let mut config = sample();
        config.desk = Some("landscape".into());

        let airlock = config.to_airlock_config();
        assert_eq!(airlock.base_url, "https://sampel-palnet.arvo.network");
        assert_eq!(airlock.ship, "sampel-palnet");
        assert_eq!(
            airlock.cookie.as_deref(),
            Some("urbauth-~sampel-palnet=0v3.abcde")
        );
        assert_eq!(airlock.desk.as_deref(), Some("landscape"));
        assert!(airlock.validate().is_ok());
    }
}
