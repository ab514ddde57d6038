//! Settings persistence
//!
//! Guild settings are stored as one YAML file per guild. Saves are queued
//! and written in the background so command handlers never wait on disk.

use crate::MODERATION_TARGET;
use crate::moderation::{GuildSettings, ModerationResult};
use async_trait::async_trait;
use poise::serenity_prelude::GuildId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error};

/// Loads and stores guild settings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsPersistence: Send + Sync {
    /// Stored settings for the guild, or `None` if there are none yet
    async fn load(&self, guild_id: GuildId) -> ModerationResult<Option<GuildSettings>>;

    async fn save(&self, settings: &GuildSettings) -> ModerationResult<()>;
}

/// [`SettingsPersistence`] writing `<guild id>.yaml` files into a directory
#[derive(Debug, Clone)]
pub struct YamlSettingsStore {
    dir: PathBuf,
}

impl YamlSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, guild_id: GuildId) -> PathBuf {
        self.dir.join(format!("{guild_id}.yaml"))
    }
}

#[async_trait]
impl SettingsPersistence for YamlSettingsStore {
    async fn load(&self, guild_id: GuildId) -> ModerationResult<Option<GuildSettings>> {
        let content = match tokio::fs::read_to_string(self.path_for(guild_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut settings: GuildSettings = serde_yaml::from_str(&content)?;
        settings.guild_id = guild_id;
        Ok(Some(settings))
    }

    async fn save(&self, settings: &GuildSettings) -> ModerationResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let yaml = serde_yaml::to_string(settings)?;

        // Write then rename so a crash never leaves a half-written file behind.
        let path = self.path_for(settings.guild_id);
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Background writer for settings snapshots.
///
/// Snapshots are written in the order they are enqueued. Failures are logged
/// and do not affect the in-memory settings.
#[derive(Clone)]
pub struct SaveQueue {
    tx: UnboundedSender<Arc<GuildSettings>>,
}

impl SaveQueue {
    /// Spawn the writer task. It stops once every queue handle is dropped.
    pub fn spawn(persistence: Arc<dyn SettingsPersistence>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<GuildSettings>>();

        tokio::spawn(async move {
            while let Some(settings) = rx.recv().await {
                match persistence.save(&settings).await {
                    Ok(()) => debug!(
                        target: MODERATION_TARGET,
                        guild_id = %settings.guild_id,
                        "Saved guild settings"
                    ),
                    Err(e) => error!(
                        target: MODERATION_TARGET,
                        guild_id = %settings.guild_id,
                        error = %e,
                        "Failed to save guild settings"
                    ),
                }
            }
        });

        Self { tx }
    }

    pub fn enqueue(&self, settings: Arc<GuildSettings>) {
        if self.tx.send(settings).is_err() {
            error!(target: MODERATION_TARGET, "Settings writer has stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::{ModerationError, PunishmentKind, SpamRule};
    use poise::serenity_prelude::RoleId;
    use std::time::Duration;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guild-warden-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let store = YamlSettingsStore::new(temp_dir());
        assert!(store.load(GuildId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = temp_dir();
        let store = YamlSettingsStore::new(&dir);

        let mut settings = GuildSettings::new(GuildId::new(42));
        settings.mute_role_id = Some(RoleId::new(7));
        settings.spam.message.enabled = true;
        settings.spam.message.rules.push(SpamRule {
            interval_secs: 10,
            required_instances: 5,
            required_votes: 1,
            punishment: PunishmentKind::RoleMute,
            duration_secs: Some(600),
        });
        store.save(&settings).await.unwrap();

        assert!(store.path_for(GuildId::new(42)).exists());
        let loaded = store.load(GuildId::new(42)).await.unwrap();
        assert_eq!(loaded, Some(settings));

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = temp_dir();
        let store = YamlSettingsStore::new(&dir);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(store.path_for(GuildId::new(3)), "spam: [not, a, map")
            .await
            .unwrap();

        let result = store.load(GuildId::new(3)).await;
        assert!(matches!(result, Err(ModerationError::Serialization(_))));

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_saves_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut persistence = MockSettingsPersistence::new();
        persistence.expect_save().times(2).returning(move |settings| {
            let _ = tx.send(settings.mute_role_id);
            Ok(())
        });

        let queue = SaveQueue::spawn(Arc::new(persistence));
        let mut settings = GuildSettings::new(GuildId::new(1));
        settings.mute_role_id = Some(RoleId::new(1));
        queue.enqueue(Arc::new(settings.clone()));
        settings.mute_role_id = Some(RoleId::new(2));
        queue.enqueue(Arc::new(settings));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(Some(RoleId::new(1))));
        assert_eq!(second, Some(Some(RoleId::new(2))));
    }

    #[tokio::test]
    async fn test_queue_survives_failed_saves() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut persistence = MockSettingsPersistence::new();
        let mut calls = 0;
        persistence.expect_save().times(2).returning(move |_| {
            calls += 1;
            let _ = tx.send(calls);
            if calls == 1 {
                Err(ModerationError::Persistence("disk full".to_string()))
            } else {
                Ok(())
            }
        });

        let queue = SaveQueue::spawn(Arc::new(persistence));
        queue.enqueue(Arc::new(GuildSettings::new(GuildId::new(1))));
        queue.enqueue(Arc::new(GuildSettings::new(GuildId::new(1))));

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
