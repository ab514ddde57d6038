//! In-memory collaborators for tests that need to observe spawned work

use crate::moderation::{
    EntityRef, EntityResolver, GuildSettings, ModerationResult, PunishmentApplier, PunishmentKind,
    PunishmentTarget, ResolvedEntity, SettingsPersistence,
};
use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedAction {
    Apply {
        user_id: UserId,
        kind: PunishmentKind,
        duration: Option<Duration>,
        mute_role: Option<RoleId>,
    },
    Reverse {
        user_id: UserId,
        kind: PunishmentKind,
        mute_role: Option<RoleId>,
    },
}

/// Applier that reports every call on a channel
pub struct RecordingApplier {
    tx: UnboundedSender<AppliedAction>,
}

impl RecordingApplier {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<AppliedAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl PunishmentApplier for RecordingApplier {
    async fn apply(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        duration: Option<Duration>,
        _reason: &str,
    ) -> ModerationResult<()> {
        let _ = self.tx.send(AppliedAction::Apply {
            user_id: target.user_id,
            kind,
            duration,
            mute_role: target.mute_role,
        });
        Ok(())
    }

    async fn reverse(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        _reason: &str,
    ) -> ModerationResult<()> {
        let _ = self.tx.send(AppliedAction::Reverse {
            user_id: target.user_id,
            kind,
            mute_role: target.mute_role,
        });
        Ok(())
    }
}

/// Settings kept in a map; every save is also published to subscribers
#[derive(Default)]
pub struct MemoryPersistence {
    stored: Mutex<HashMap<GuildId, GuildSettings>>,
    subscribers: Mutex<Vec<UnboundedSender<GuildSettings>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: GuildSettings) -> Self {
        let persistence = Self::new();
        persistence
            .stored
            .lock()
            .unwrap()
            .insert(settings.guild_id, settings);
        persistence
    }

    pub fn subscribe(&self) -> UnboundedReceiver<GuildSettings> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn stored(&self, guild_id: GuildId) -> Option<GuildSettings> {
        self.stored.lock().unwrap().get(&guild_id).cloned()
    }
}

#[async_trait]
impl SettingsPersistence for MemoryPersistence {
    async fn load(&self, guild_id: GuildId) -> ModerationResult<Option<GuildSettings>> {
        Ok(self.stored(guild_id))
    }

    async fn save(&self, settings: &GuildSettings) -> ModerationResult<()> {
        self.stored
            .lock()
            .unwrap()
            .insert(settings.guild_id, settings.clone());
        for subscriber in self.subscribers.lock().unwrap().iter() {
            let _ = subscriber.send(settings.clone());
        }
        Ok(())
    }
}

/// Resolver that finds every entity
pub struct AcceptingResolver;

#[async_trait]
impl EntityResolver for AcceptingResolver {
    async fn resolve(
        &self,
        _guild_id: GuildId,
        entity: EntityRef,
    ) -> ModerationResult<Option<ResolvedEntity>> {
        Ok(Some(ResolvedEntity {
            entity,
            name: "present".to_string(),
        }))
    }
}
