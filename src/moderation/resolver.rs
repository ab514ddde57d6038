//! Entity resolution
//!
//! Settings refer to roles, channels and members by id. Those can be deleted
//! while the bot is offline, so references are checked when a guild's
//! settings are loaded.

use crate::MODERATION_TARGET;
use crate::moderation::{GuildSettings, ModerationResult, OverrideScope};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, Http, RoleId, UserId};
use serenity::http::HttpError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A reference stored in guild settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Role(RoleId),
    Channel(ChannelId),
    User(UserId),
}

impl From<OverrideScope> for EntityRef {
    fn from(scope: OverrideScope) -> Self {
        match scope {
            OverrideScope::User(id) => Self::User(id),
            OverrideScope::Role(id) => Self::Role(id),
            OverrideScope::Channel(id) => Self::Channel(id),
        }
    }
}

/// A reference that still exists, with its display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub entity: EntityRef,
    pub name: String,
}

/// Looks up whether a referenced entity still exists in a guild
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// `Ok(None)` means the entity is gone; an error means it could not be
    /// checked right now.
    async fn resolve(
        &self,
        guild_id: GuildId,
        entity: EntityRef,
    ) -> ModerationResult<Option<ResolvedEntity>>;
}

fn is_not_found(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

/// [`EntityResolver`] backed by the Discord HTTP API
pub struct DiscordEntityResolver {
    http: Arc<Http>,
}

impl DiscordEntityResolver {
    #[must_use]
    pub const fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EntityResolver for DiscordEntityResolver {
    async fn resolve(
        &self,
        guild_id: GuildId,
        entity: EntityRef,
    ) -> ModerationResult<Option<ResolvedEntity>> {
        let name = match entity {
            EntityRef::Role(role_id) => {
                let roles = guild_id.roles(&self.http).await?;
                roles.get(&role_id).map(|role| role.name.clone())
            }
            EntityRef::Channel(channel_id) => match self.http.get_channel(channel_id).await {
                Ok(channel) => channel
                    .guild()
                    .filter(|channel| channel.guild_id == guild_id)
                    .map(|channel| channel.name),
                Err(e) if is_not_found(&e) => None,
                Err(e) => return Err(e.into()),
            },
            EntityRef::User(user_id) => match guild_id.member(self.http.as_ref(), user_id).await {
                Ok(member) => Some(member.display_name().to_string()),
                Err(e) if is_not_found(&e) => None,
                Err(e) => return Err(e.into()),
            },
        };

        Ok(name.map(|name| ResolvedEntity { entity, name }))
    }
}

/// Whether `entity` is known to be gone. Lookup failures count as present.
async fn is_stale(resolver: &dyn EntityResolver, guild_id: GuildId, entity: EntityRef) -> bool {
    match resolver.resolve(guild_id, entity).await {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(e) => {
            warn!(
                target: MODERATION_TARGET,
                guild_id = %guild_id,
                entity = ?entity,
                error = %e,
                "Could not check reference, keeping it"
            );
            false
        }
    }
}

/// Drop the mute role and role/channel overrides that no longer exist.
///
/// User overrides are kept; a member who left may come back. Returns how
/// many references were removed.
pub async fn prune_stale_references(
    settings: &mut GuildSettings,
    resolver: &dyn EntityResolver,
) -> usize {
    let guild_id = settings.guild_id;
    let mut removed = 0;

    if let Some(role_id) = settings.mute_role_id {
        if is_stale(resolver, guild_id, EntityRef::Role(role_id)).await {
            info!(
                target: MODERATION_TARGET,
                guild_id = %guild_id,
                role_id = %role_id,
                "Mute role no longer exists"
            );
            settings.mute_role_id = None;
            removed += 1;
        }
    }

    let mut stale = HashSet::new();
    for scope in settings.commands.overrides.scopes() {
        if matches!(scope, OverrideScope::User(_)) {
            continue;
        }
        if is_stale(resolver, guild_id, scope.into()).await {
            stale.insert(scope);
        }
    }

    if !stale.is_empty() {
        let pruned = settings
            .commands
            .overrides
            .retain(|_, scope| !stale.contains(scope));
        debug!(
            target: MODERATION_TARGET,
            guild_id = %guild_id,
            pruned,
            "Removed overrides for deleted roles and channels"
        );
        removed += pruned;
    }

    removed
}
