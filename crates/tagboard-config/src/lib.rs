//! Tagboard Configuration
//!
//! TOML configuration loading with environment variable overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DB_FILE: &str = "mentions.db";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    /// Database file; resolved under `data_dir` when relative.
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    pub poll_timeout_secs: Option<u64>,
    pub client_recreate_interval_secs: Option<u64>,
    #[serde(default)]
    pub allowed_chats: Option<Vec<i64>>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, the default path, or the environment
    /// alone when no config file exists (TELEGRAM_BOT_TOKEN is enough to run).
    /// Callers that need the transport must still `validate()`.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(path);
            }
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tagboard").join("config.toml"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!(
                "Telegram bot token is not set (telegram.bot_token in config or TELEGRAM_BOT_TOKEN)"
            );
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(token) = non_empty_env("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(db_path) = non_empty_env("TAGBOARD_DB") {
            self.core.db_path = Some(db_path);
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.core.data_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tagboard"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        let configured = self
            .core
            .db_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_DB_FILE);
        let path = PathBuf::from(configured);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [core]
            data_dir = "/tmp/tagboard"
            log_level = "debug"
            db_path = "counts.db"

            [telegram]
            bot_token = "123456:TESTTOKEN"
            poll_timeout_secs = 30
            allowed_chats = [-1001234, 42]
        "#;
        let config: Config = toml::from_str(toml).expect("parse");
        assert_eq!(config.telegram.bot_token, "123456:TESTTOKEN");
        assert_eq!(config.telegram.poll_timeout_secs, Some(30));
        assert_eq!(
            config.telegram.allowed_chats,
            Some(vec![-1001234i64, 42i64])
        );
        assert_eq!(config.db_path(), PathBuf::from("/tmp/tagboard/counts.db"));
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let toml = r#"
            [telegram]
            bot_token = "123456:TESTTOKEN"
        "#;
        let config: Config = toml::from_str(toml).expect("parse");
        assert!(config.validate().is_ok());
        assert!(config.telegram.allowed_chats.is_none());
        assert!(config.db_path().ends_with("mentions.db"));
    }

    #[test]
    fn validate_rejects_missing_token() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn absolute_db_path_is_kept() {
        let mut config = Config::default();
        config.core.db_path = Some("/var/lib/tagboard/mentions.db".to_string());
        assert_eq!(
            config.db_path(),
            PathBuf::from("/var/lib/tagboard/mentions.db")
        );
    }
}
