use crate::EVENT_TARGET;
use crate::moderation::{GuildModerationStore, JoinEvent, MessageEvent, PunishmentKind};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, GuildMemberUpdateEvent, Member,
    Message, Ready, RoleId, Timestamp, UnavailableGuild, UserId, VoiceState,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Feeds gateway events into the moderation store
pub struct Handler {
    store: Arc<GuildModerationStore>,
}

impl Handler {
    #[must_use]
    pub const fn new(store: Arc<GuildModerationStore>) -> Self {
        Self { store }
    }

    /// A moderator undid a punishment by hand; its reversal has nothing left to do
    fn punishment_lifted(&self, guild_id: GuildId, user_id: UserId, kind: PunishmentKind) {
        if self.store.cancel_punishment(guild_id, user_id, kind) {
            info!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                user_id = %user_id,
                punishment = %kind,
                "Punishment lifted by hand, reversal cancelled"
            );
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.store.attach(guild.id).await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage also arrives as a delete; keep the guild's state until we are actually removed
        if incomplete.unavailable {
            debug!(target: EVENT_TARGET, guild_id = %incomplete.id, "Guild unavailable");
            return;
        }
        self.store.detach(incomplete.id);
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let event = message_event(&msg);
        let decisions = self.store.on_message(guild_id, &event).await;
        if !decisions.is_empty() {
            debug!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                message_id = %msg.id,
                decisions = decisions.len(),
                "Message triggered punishment"
            );
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let event = JoinEvent {
            user_id: new_member.user.id,
            joined_at: new_member.joined_at.map_or_else(Utc::now, to_utc),
        };
        self.store.on_user_joined(new_member.guild_id, event).await;
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        // Without the cached member there is nothing to compare against
        let Some(old) = old_if_available else {
            return;
        };
        let Some(state) = self.store.get(event.guild_id) else {
            return;
        };
        if mute_role_removed(state.settings().mute_role_id, &old.roles, &event.roles) {
            self.punishment_lifted(event.guild_id, event.user.id, PunishmentKind::RoleMute);
        }
    }

    async fn voice_state_update(&self, _ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let (Some(guild_id), Some(old)) = (new.guild_id, old) else {
            return;
        };
        // Leaving a channel is not a moderator lifting anything
        if new.channel_id.is_none() {
            return;
        }
        for kind in voice_punishments_lifted(VoiceFlags::of(&old), VoiceFlags::of(&new)) {
            self.punishment_lifted(guild_id, new.user_id, kind);
        }
    }
}

/// Whether an update took the mute role away from a member
fn mute_role_removed(mute_role: Option<RoleId>, before: &[RoleId], after: &[RoleId]) -> bool {
    mute_role.is_some_and(|role| before.contains(&role) && !after.contains(&role))
}

/// Server-side voice restrictions on a member
#[derive(Debug, Clone, Copy, Default)]
struct VoiceFlags {
    mute: bool,
    deaf: bool,
}

impl VoiceFlags {
    const fn of(state: &VoiceState) -> Self {
        Self {
            mute: state.mute,
            deaf: state.deaf,
        }
    }
}

fn voice_punishments_lifted(before: VoiceFlags, after: VoiceFlags) -> Vec<PunishmentKind> {
    let mut lifted = Vec::new();
    if before.mute && !after.mute {
        lifted.push(PunishmentKind::VoiceMute);
    }
    if before.deaf && !after.deaf {
        lifted.push(PunishmentKind::Deafen);
    }
    lifted
}

/// Convert a gateway message into what the detectors look at
#[must_use]
pub fn message_event(msg: &Message) -> MessageEvent {
    MessageEvent {
        message_id: msg.id,
        author_id: msg.author.id,
        channel_id: msg.channel_id,
        author_is_bot: msg.author.bot,
        content: msg.content.clone(),
        mention_count: msg.mentions.len()
            + msg.mention_roles.len()
            + usize::from(msg.mention_everyone),
        image_count: msg
            .attachments
            .iter()
            .filter(|attachment| is_image(attachment.content_type.as_deref(), &attachment.filename))
            .count(),
        sent_at: to_utc(msg.timestamp),
    }
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

/// Whether an attachment is an image, by MIME type or failing that by extension
#[must_use]
pub fn is_image(content_type: Option<&str>, filename: &str) -> bool {
    const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

    if let Some(content_type) = content_type {
        return content_type.starts_with("image/");
    }
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_is_image_by_content_type() {
        assert!(is_image(Some("image/png"), "upload"));
        assert!(!is_image(Some("video/mp4"), "clip.png"));
    }

    #[test]
    fn test_is_image_by_extension() {
        assert!(is_image(None, "cat.JPG"));
        assert!(is_image(None, "a.b.webp"));
        assert!(!is_image(None, "notes.txt"));
        assert!(!is_image(None, "png"));
    }

    #[test]
    fn test_mute_role_removed() {
        let muted = RoleId::new(55);
        let other = RoleId::new(56);
        assert!(mute_role_removed(Some(muted), &[muted, other], &[other]));
        assert!(!mute_role_removed(Some(muted), &[other], &[other]));
        assert!(!mute_role_removed(Some(muted), &[muted], &[muted, other]));
        assert!(!mute_role_removed(None, &[muted], &[]));
    }

    #[test]
    fn test_voice_punishments_lifted() {
        let both = VoiceFlags {
            mute: true,
            deaf: true,
        };
        let deaf_only = VoiceFlags {
            mute: false,
            deaf: true,
        };
        assert_eq!(
            voice_punishments_lifted(both, VoiceFlags::default()),
            vec![PunishmentKind::VoiceMute, PunishmentKind::Deafen]
        );
        assert_eq!(
            voice_punishments_lifted(both, deaf_only),
            vec![PunishmentKind::VoiceMute]
        );
        assert!(voice_punishments_lifted(deaf_only, both).is_empty());
    }

    #[test]
    fn test_to_utc_keeps_seconds() {
        let timestamp = Timestamp::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(to_utc(timestamp).timestamp(), 1_700_000_000);
    }
}
