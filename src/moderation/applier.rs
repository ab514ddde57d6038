//! Punishment applier
//!
//! Turns a punishment kind into Discord API calls. Each kind has its own
//! handler registered in [`DiscordPunishmentApplier`].

use crate::MODERATION_TARGET;
use crate::moderation::{ModerationError, ModerationResult, PunishmentKind, PunishmentTarget};
use async_trait::async_trait;
use poise::serenity_prelude::{Http, builder::EditMember};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Discord rejects audit log reasons longer than this
const MAX_REASON_CHARS: usize = 512;
/// Days of message history removed with a ban
const BAN_DELETE_MESSAGE_DAYS: u8 = 1;

/// Applies and reverses punishments
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PunishmentApplier: Send + Sync {
    /// Apply `kind` to the target. The duration is informational; expiry is
    /// scheduled separately.
    async fn apply(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        duration: Option<Duration>,
        reason: &str,
    ) -> ModerationResult<()>;

    /// Undo `kind`. Kinds that cannot be undone succeed without doing anything.
    async fn reverse(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        reason: &str,
    ) -> ModerationResult<()>;
}

#[async_trait]
trait ActionHandler: Send + Sync {
    async fn execute(&self, http: &Http, target: &PunishmentTarget, reason: &str)
    -> ModerationResult<()>;

    async fn reverse(&self, http: &Http, target: &PunishmentTarget, reason: &str)
    -> ModerationResult<()>;
}

fn truncate_reason(reason: &str) -> &str {
    match reason.char_indices().nth(MAX_REASON_CHARS) {
        Some((end, _)) => &reason[..end],
        None => reason,
    }
}

/// [`PunishmentApplier`] backed by the Discord HTTP API
pub struct DiscordPunishmentApplier {
    http: Arc<Http>,
    handlers: HashMap<PunishmentKind, Box<dyn ActionHandler>>,
}

impl DiscordPunishmentApplier {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        let mut applier = Self {
            http,
            handlers: HashMap::new(),
        };

        applier.register(PunishmentKind::Nothing, Box::new(NoopHandler));
        applier.register(PunishmentKind::RoleMute, Box::new(RoleMuteHandler));
        applier.register(PunishmentKind::Deafen, Box::new(VoiceStateHandler::Deafen));
        applier.register(PunishmentKind::VoiceMute, Box::new(VoiceStateHandler::Mute));
        applier.register(PunishmentKind::Kick, Box::new(KickHandler));
        // The member was already kicked once; what remains is the ban.
        applier.register(PunishmentKind::KickThenBan, Box::new(BanHandler));
        applier.register(PunishmentKind::Ban, Box::new(BanHandler));

        applier
    }

    fn register(&mut self, kind: PunishmentKind, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    fn handler(&self, kind: PunishmentKind) -> ModerationResult<&dyn ActionHandler> {
        self.handlers
            .get(&kind)
            .map(AsRef::as_ref)
            .ok_or_else(|| ModerationError::Other(format!("No handler registered for {kind}")))
    }
}

#[async_trait]
impl PunishmentApplier for DiscordPunishmentApplier {
    async fn apply(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        duration: Option<Duration>,
        reason: &str,
    ) -> ModerationResult<()> {
        info!(
            target: MODERATION_TARGET,
            guild_id = %target.guild_id,
            user_id = %target.user_id,
            punishment = %kind,
            duration_secs = ?duration.map(|d| d.as_secs()),
            "Applying punishment"
        );
        self.handler(kind)?
            .execute(&self.http, target, truncate_reason(reason))
            .await
    }

    async fn reverse(
        &self,
        target: &PunishmentTarget,
        kind: PunishmentKind,
        reason: &str,
    ) -> ModerationResult<()> {
        if !kind.is_reversible() {
            return Ok(());
        }
        info!(
            target: MODERATION_TARGET,
            guild_id = %target.guild_id,
            user_id = %target.user_id,
            punishment = %kind,
            "Reversing punishment"
        );
        self.handler(kind)?
            .reverse(&self.http, target, truncate_reason(reason))
            .await
    }
}

struct NoopHandler;

#[async_trait]
impl ActionHandler for NoopHandler {
    async fn execute(
        &self,
        _http: &Http,
        _target: &PunishmentTarget,
        _reason: &str,
    ) -> ModerationResult<()> {
        Ok(())
    }

    async fn reverse(
        &self,
        _http: &Http,
        _target: &PunishmentTarget,
        _reason: &str,
    ) -> ModerationResult<()> {
        Ok(())
    }
}

/// Adds or removes the guild's configured mute role
struct RoleMuteHandler;

impl RoleMuteHandler {
    fn mute_role(target: &PunishmentTarget) -> ModerationResult<poise::serenity_prelude::RoleId> {
        target.mute_role.ok_or_else(|| {
            ModerationError::invalid_config(format!(
                "Guild {} has no mute role configured",
                target.guild_id
            ))
        })
    }
}

#[async_trait]
impl ActionHandler for RoleMuteHandler {
    async fn execute(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        let role_id = Self::mute_role(target)?;
        http.add_member_role(target.guild_id, target.user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }

    async fn reverse(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        let role_id = Self::mute_role(target)?;
        http.remove_member_role(target.guild_id, target.user_id, role_id, Some(reason))
            .await?;
        Ok(())
    }
}

/// Server-side voice mute or deafen
enum VoiceStateHandler {
    Mute,
    Deafen,
}

impl VoiceStateHandler {
    async fn set(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
        enabled: bool,
    ) -> ModerationResult<()> {
        let builder = match self {
            Self::Mute => EditMember::new().mute(enabled),
            Self::Deafen => EditMember::new().deafen(enabled),
        };
        target
            .guild_id
            .edit_member(http, target.user_id, builder.audit_log_reason(reason))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ActionHandler for VoiceStateHandler {
    async fn execute(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        self.set(http, target, reason, true).await
    }

    async fn reverse(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        // The member may have left the guild since; there is nothing left to undo.
        if let Err(e) = self.set(http, target, reason, false).await {
            warn!(
                target: MODERATION_TARGET,
                guild_id = %target.guild_id,
                user_id = %target.user_id,
                error = %e,
                "Could not restore voice state"
            );
        }
        Ok(())
    }
}

struct KickHandler;

#[async_trait]
impl ActionHandler for KickHandler {
    async fn execute(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        target
            .guild_id
            .kick_with_reason(http, target.user_id, reason)
            .await?;
        Ok(())
    }

    async fn reverse(
        &self,
        _http: &Http,
        _target: &PunishmentTarget,
        _reason: &str,
    ) -> ModerationResult<()> {
        Ok(())
    }
}

struct BanHandler;

#[async_trait]
impl ActionHandler for BanHandler {
    async fn execute(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        reason: &str,
    ) -> ModerationResult<()> {
        target
            .guild_id
            .ban_with_reason(http, target.user_id, BAN_DELETE_MESSAGE_DAYS, reason)
            .await?;
        Ok(())
    }

    async fn reverse(
        &self,
        http: &Http,
        target: &PunishmentTarget,
        _reason: &str,
    ) -> ModerationResult<()> {
        target.guild_id.unban(http, target.user_id).await?;
        Ok(())
    }
}
