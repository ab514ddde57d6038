//! Error types for the moderation engine
//!
//! This module defines the errors that can occur while configuring guilds,
//! applying punishments, and persisting settings.

use thiserror::Error;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// A setting, rule, or override failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The setting key is not recognised
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// Neither a command nor a category with this name exists
    #[error("Unknown command or category: {0}")]
    UnknownCommand(String),

    /// The command can never be disabled or overridden
    #[error("Command cannot be disabled: {0}")]
    ExemptCommand(String),

    /// A referenced role, channel, or member no longer exists
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// The settings store failed
    #[error("Settings persistence error: {0}")]
    Persistence(String),

    /// Settings could not be (de)serialised
    #[error("Settings serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

impl ModerationError {
    /// Shorthand for a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error was caused by bad input from whoever made the request
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::UnknownSetting(_)
                | Self::UnknownCommand(_)
                | Self::ExemptCommand(_)
                | Self::EntityNotFound(_)
        )
    }
}

impl From<poise::serenity_prelude::Error> for ModerationError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for ModerationError {
    fn from(error: String) -> Self {
        Self::Other(error)
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
