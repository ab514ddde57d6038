//! Process configuration
//!
//! Read once at startup from the environment. A `.env` file in the working
//! directory is loaded first if present.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const DATA_DIR_VAR: &str = "WARDEN_DATA_DIR";
pub const LOG_DIR_VAR: &str = "WARDEN_LOG_DIR";

/// Where guild settings files live unless overridden
pub const DEFAULT_DATA_DIR: &str = "data/guilds";
/// Where log files are written unless overridden
pub const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Settings the bot process needs before it can connect
#[derive(Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("discord_token", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl BotConfig {
    /// Load from the process environment, after applying `.env`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the Discord token is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the Discord token is not set or blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let discord_token = non_empty(TOKEN_VAR).ok_or(ConfigError::Missing(TOKEN_VAR))?;
        let data_dir = non_empty(DATA_DIR_VAR).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let log_dir = non_empty(LOG_DIR_VAR).unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

        Ok(Self {
            discord_token: discord_token.trim().to_string(),
            data_dir: data_dir.into(),
            log_dir: log_dir.into(),
        })
    }
}
