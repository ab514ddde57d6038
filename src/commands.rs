//! Slash and prefix commands
//!
//! Every command runs through [`gate_check`] first, which asks the guild's
//! command gate whether the invocation may proceed.

use crate::logging;
use crate::moderation::{
    ActorRole, BannedPhrase, BannedPhraseTier, CommandInfo, CommandInvocation, ExpiryPayload,
    GateVerdict, ModerationError, OverrideScope, PunishmentKind, ReportOutcome, SpamCategory,
    SpamRule,
};
use crate::{Context, Data, Error};
use poise::serenity_prelude::{self as serenity, Member, Permissions, RoleId};
use chrono::{DateTime, Utc};
use poise::{CreateReply, FrameworkError};
use std::time::Duration;
use tracing::error;

/// How long a confirmation prompt waits for a button press
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the command gate needs to know about the commands below
pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("ping", "utility"),
    CommandInfo::new("toggle", "config")
        .all_of(Permissions::MANAGE_GUILD)
        .exempt(),
    CommandInfo::new("override", "config")
        .all_of(Permissions::MANAGE_GUILD)
        .exempt(),
    CommandInfo::new("setting", "config").all_of(Permissions::MANAGE_GUILD),
    CommandInfo::new("spamrule", "config").all_of(Permissions::MANAGE_GUILD),
    CommandInfo::new("phrase", "config").all_of(Permissions::MANAGE_GUILD),
    CommandInfo::new("permission", "config")
        .all_of(Permissions::ADMINISTRATOR)
        .exempt(),
    CommandInfo::new("report", "moderation").any_of(
        Permissions::MODERATE_MEMBERS
            .union(Permissions::KICK_MEMBERS)
            .union(Permissions::BAN_MEMBERS),
    ),
    CommandInfo::new("unpunish", "moderation").any_of(
        Permissions::MODERATE_MEMBERS
            .union(Permissions::KICK_MEMBERS)
            .union(Permissions::BAN_MEMBERS),
    ),
    CommandInfo::new("punishments", "moderation").any_of(
        Permissions::MODERATE_MEMBERS
            .union(Permissions::KICK_MEMBERS)
            .union(Permissions::BAN_MEMBERS),
    ),
];

/// Permissions that can be granted on top of a member's roles
const GRANTABLE: &[(&str, Permissions)] = &[
    ("moderate-members", Permissions::MODERATE_MEMBERS),
    ("kick-members", Permissions::KICK_MEMBERS),
    ("ban-members", Permissions::BAN_MEMBERS),
    ("manage-guild", Permissions::MANAGE_GUILD),
];

#[must_use]
pub fn commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        ping(),
        toggle(),
        override_(),
        setting(),
        spamrule(),
        phrase(),
        permission(),
        report(),
        unpunish(),
        punishments(),
    ]
}

/// Check if the bot is responsive
#[poise::command(prefix_command, slash_command, guild_only, category = "utility")]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Enable or disable a command or category for the whole server
#[poise::command(prefix_command, slash_command, guild_only, category = "config")]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
    #[description = "Whether it should be usable"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .moderation
        .set_command_enabled(guild_id, &name, enabled)
        .await?;
    reply(ctx, format!("`{name}` is now {}.", on_off(enabled))).await
}

/// Enable or disable a command for one user, role or channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "config",
    rename = "override",
    subcommands(
        "override_user",
        "override_role",
        "override_channel",
        "override_remove",
        "override_clear"
    )
)]
pub async fn override_(ctx: Context<'_>) -> Result<(), Error> {
    reply(
        ctx,
        "Use `override user`, `override role`, `override channel`, `override remove` or \
         `override clear`."
            .to_string(),
    )
    .await
}

/// Override a command for a member
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "user")]
pub async fn override_user(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
    #[description = "Member the override applies to"] user: serenity::User,
    #[description = "Whether it should be usable"] enabled: bool,
) -> Result<(), Error> {
    set_override(ctx, &name, OverrideScope::User(user.id), enabled).await
}

/// Override a command for a role
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "role")]
pub async fn override_role(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
    #[description = "Role the override applies to"] role: serenity::Role,
    #[description = "Whether it should be usable"] enabled: bool,
) -> Result<(), Error> {
    set_override(ctx, &name, OverrideScope::Role(role.id), enabled).await
}

/// Override a command in a channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "config",
    rename = "channel"
)]
pub async fn override_channel(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
    #[description = "Channel the override applies to"] channel: serenity::Channel,
    #[description = "Whether it should be usable"] enabled: bool,
) -> Result<(), Error> {
    set_override(ctx, &name, OverrideScope::Channel(channel.id()), enabled).await
}

/// Remove a single override
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "remove")]
pub async fn override_remove(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
    #[description = "Member whose override to remove"] user: Option<serenity::User>,
    #[description = "Role whose override to remove"] role: Option<serenity::Role>,
    #[description = "Channel whose override to remove"] channel: Option<serenity::Channel>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let scope = match (user, role, channel) {
        (Some(user), None, None) => OverrideScope::User(user.id),
        (None, Some(role), None) => OverrideScope::Role(role.id),
        (None, None, Some(channel)) => OverrideScope::Channel(channel.id()),
        _ => return Err("Name exactly one member, role or channel.".into()),
    };
    let existed = ctx
        .data()
        .moderation
        .clear_override(guild_id, &name, scope)
        .await?;
    let content = if existed {
        format!("Removed the `{name}` override for that {}.", scope.kind())
    } else {
        format!("There was no `{name}` override for that {}.", scope.kind())
    };
    reply(ctx, content).await
}

/// Remove every override for a command or category, after confirmation
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "clear")]
pub async fn override_clear(
    ctx: Context<'_>,
    #[description = "Command or category name"] name: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let store = &ctx.data().moderation;
    let name = store.registry().configurable_name(&name)?;

    let confirm_id = format!("{}_confirm", ctx.id());
    let decline_id = format!("{}_decline", ctx.id());
    let handle = ctx
        .send(
            CreateReply::default()
                .content(format!("Remove every override for `{name}`?"))
                .components(vec![serenity::CreateActionRow::Buttons(vec![
                    serenity::CreateButton::new(&confirm_id)
                        .label("Confirm")
                        .style(serenity::ButtonStyle::Danger),
                    serenity::CreateButton::new(&decline_id)
                        .label("Decline")
                        .style(serenity::ButtonStyle::Secondary),
                ])]),
        )
        .await?;
    let message = handle.message().await?.into_owned();

    let prompt_id = message.id.get();
    let expires_at = Utc::now() + chrono::Duration::from_std(CONFIRM_TIMEOUT)?;
    store.open_prompt(guild_id, prompt_id, expires_at).await;

    let interaction = message
        .await_component_interaction(ctx)
        .author_id(ctx.author().id)
        .timeout(CONFIRM_TIMEOUT)
        .await;

    // A press that lands after the prompt expired is not honoured.
    let still_open = store.is_prompt_open(guild_id, prompt_id);
    store.close_prompt(guild_id, prompt_id);
    let Some(interaction) = interaction.filter(|_| still_open) else {
        message
            .channel_id
            .edit_message(
                ctx.http(),
                message.id,
                serenity::EditMessage::new()
                    .content("Confirmation timed out, nothing was removed.")
                    .components(vec![]),
            )
            .await?;
        return Ok(());
    };

    let content = if interaction.data.custom_id == confirm_id {
        let removed = store.clear_overrides(guild_id, &name).await?;
        format!("Removed {removed} override(s) for `{name}`.")
    } else {
        "Nothing was removed.".to_string()
    };
    interaction
        .create_response(
            ctx.http(),
            serenity::CreateInteractionResponse::UpdateMessage(
                serenity::CreateInteractionResponseMessage::new()
                    .content(content)
                    .components(vec![]),
            ),
        )
        .await?;
    Ok(())
}

async fn set_override(
    ctx: Context<'_>,
    name: &str,
    scope: OverrideScope,
    enabled: bool,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .moderation
        .set_override(guild_id, name, scope, enabled)
        .await?;
    reply(
        ctx,
        format!("`{name}` is now {} for that {}.", on_off(enabled), scope.kind()),
    )
    .await
}

/// Change a moderation setting, e.g. `spam.link.threshold 2`
#[poise::command(prefix_command, slash_command, guild_only, category = "config")]
pub async fn setting(
    ctx: Context<'_>,
    #[description = "Setting key, e.g. raid.rapid-join.enabled"] key: String,
    #[description = "New value"] value: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .moderation
        .set_setting(guild_id, &key, &value)
        .await?;
    reply(ctx, format!("`{key}` set to `{value}`.")).await
}

/// Add or remove spam rules
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "config",
    subcommands("spamrule_add", "spamrule_remove")
)]
pub async fn spamrule(ctx: Context<'_>) -> Result<(), Error> {
    reply(ctx, "Use `spamrule add` or `spamrule remove`.".to_string()).await
}

/// Add a rule to a spam category
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "add")]
pub async fn spamrule_add(
    ctx: Context<'_>,
    #[description = "Spam category, e.g. link or mention"] category: String,
    #[description = "Look-back window in seconds"] interval_secs: u64,
    #[description = "Events within the window that flag a member"] required_instances: u32,
    #[description = "Votes needed before punishing"] required_votes: u32,
    #[description = "Punishment, e.g. mute, kick or ban"] punishment: String,
    #[description = "How long a reversible punishment lasts, in seconds"] duration_secs: Option<u64>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let category: SpamCategory = category.parse()?;
    let rule = SpamRule {
        interval_secs,
        required_instances,
        required_votes,
        punishment: punishment.parse()?,
        duration_secs,
    };
    ctx.data()
        .moderation
        .add_spam_rule(guild_id, category, rule)
        .await?;
    reply(ctx, format!("Added a {category} spam rule.")).await
}

/// Remove a spam rule by its position, starting at 0
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "remove")]
pub async fn spamrule_remove(
    ctx: Context<'_>,
    #[description = "Spam category, e.g. link or mention"] category: String,
    #[description = "Position of the rule"] index: usize,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let category: SpamCategory = category.parse()?;
    let removed = ctx
        .data()
        .moderation
        .remove_spam_rule(guild_id, category, index)
        .await?;
    reply(
        ctx,
        format!("Removed {category} spam rule #{index} ({}).", removed.punishment),
    )
    .await
}

/// Add or remove banned phrases
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "config",
    subcommands("phrase_add", "phrase_remove")
)]
pub async fn phrase(ctx: Context<'_>) -> Result<(), Error> {
    reply(ctx, "Use `phrase add` or `phrase remove`.".to_string()).await
}

/// Ban a phrase at a strike tier
#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "add")]
pub async fn phrase_add(
    ctx: Context<'_>,
    #[description = "Strike tier: role, kick or ban"] tier: String,
    #[description = "Phrase to ban"] phrase: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let tier: BannedPhraseTier = tier.parse()?;
    ctx.data()
        .moderation
        .add_banned_phrase(guild_id, BannedPhrase { phrase, tier })
        .await?;
    reply(ctx, format!("Phrase banned at the {tier} tier.")).await
}

#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "remove")]
pub async fn phrase_remove(
    ctx: Context<'_>,
    #[description = "Phrase to allow again"] phrase: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .moderation
        .remove_banned_phrase(guild_id, &phrase)
        .await?;
    reply(ctx, "Phrase removed.".to_string()).await
}

/// Grant or revoke permissions on top of a member's roles
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "config",
    subcommands("permission_grant", "permission_revoke")
)]
pub async fn permission(ctx: Context<'_>) -> Result<(), Error> {
    reply(ctx, "Use `permission grant` or `permission revoke`.".to_string()).await
}

#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "grant")]
pub async fn permission_grant(
    ctx: Context<'_>,
    #[description = "Member to grant to"] user: serenity::User,
    #[description = "e.g. moderate-members or manage-guild"] permission: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let permissions = grantable(&permission)?;
    ctx.data()
        .moderation
        .grant_permissions(guild_id, user.id, permissions)
        .await?;
    reply(ctx, format!("{} now has `{permission}`.", user.name)).await
}

#[poise::command(prefix_command, slash_command, guild_only, category = "config", rename = "revoke")]
pub async fn permission_revoke(
    ctx: Context<'_>,
    #[description = "Member to revoke from"] user: serenity::User,
    #[description = "e.g. moderate-members or manage-guild"] permission: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let permissions = grantable(&permission)?;
    ctx.data()
        .moderation
        .revoke_permissions(guild_id, user.id, permissions)
        .await?;
    reply(ctx, format!("{} no longer has a granted `{permission}`.", user.name)).await
}

/// Vote that a flagged member is spamming
#[poise::command(prefix_command, slash_command, guild_only, category = "moderation")]
pub async fn report(
    ctx: Context<'_>,
    #[description = "Member to report"] user: serenity::User,
    #[description = "Spam category, e.g. link or mention"] category: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let category: SpamCategory = category.parse()?;
    let outcome = ctx
        .data()
        .moderation
        .report(guild_id, user.id, category, ctx.author().id)
        .await;
    reply(ctx, describe_report(&outcome, &user.name, category)).await
}

/// Lift every reversible punishment in force for a member
#[poise::command(prefix_command, slash_command, guild_only, category = "moderation")]
pub async fn unpunish(
    ctx: Context<'_>,
    #[description = "Member to release"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let lifted = ctx
        .data()
        .moderation
        .lift_punishments(guild_id, user.id)
        .await;
    reply(ctx, describe_lifted(&lifted, &user.name)).await
}

/// Show when a member's timed punishments run out
#[poise::command(prefix_command, slash_command, guild_only, category = "moderation")]
pub async fn punishments(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let pending: Vec<_> = ctx
        .data()
        .moderation
        .pending_expiries(guild_id)
        .into_iter()
        .filter_map(|entry| match entry.payload {
            ExpiryPayload::ReversePunishment { target, kind, .. } if target.user_id == user.id => {
                Some((kind, entry.due_at))
            }
            _ => None,
        })
        .collect();
    reply(ctx, describe_pending(&pending, &user.name)).await
}

fn describe_report(outcome: &ReportOutcome, name: &str, category: SpamCategory) -> String {
    match outcome {
        ReportOutcome::Ignored => format!("{category} spam reports are not being taken."),
        ReportOutcome::NotFlagged => format!("{name} has not been flagged for {category} spam."),
        ReportOutcome::DuplicateVote { votes, required } => {
            format!("You already reported {name} ({votes}/{required} votes).")
        }
        ReportOutcome::Counted { votes, required } => {
            format!("Report counted against {name} ({votes}/{required} votes).")
        }
        ReportOutcome::Punished(decision) => {
            format!("{name} has been punished: {}.", decision.kind)
        }
        ReportOutcome::NotApplied(decision) => format!(
            "Votes reached, but {name} is already under something more severe than {}.",
            decision.kind
        ),
    }
}

fn describe_pending(pending: &[(PunishmentKind, DateTime<Utc>)], name: &str) -> String {
    let lines: Vec<String> = pending
        .iter()
        .map(|(kind, due_at)| format!("{kind} until <t:{}:f>", due_at.timestamp()))
        .collect();
    if lines.is_empty() {
        return format!("{name} has no timed punishments.");
    }
    format!("{name}: {}.", lines.join(", "))
}

fn grantable(name: &str) -> Result<Permissions, ModerationError> {
    let normalized = name.trim().to_lowercase().replace('_', "-");
    GRANTABLE
        .iter()
        .find(|(grantable, _)| *grantable == normalized)
        .map(|(_, permissions)| *permissions)
        .ok_or_else(|| {
            let names: Vec<&str> = GRANTABLE.iter().map(|(name, _)| *name).collect();
            ModerationError::invalid_config(format!(
                "`{name}` cannot be granted; use one of {}",
                names.join(", ")
            ))
        })
}

fn describe_lifted(lifted: &[PunishmentKind], name: &str) -> String {
    if lifted.is_empty() {
        return format!("{name} has no punishments that can be lifted.");
    }
    let kinds: Vec<String> = lifted.iter().map(ToString::to_string).collect();
    format!("Lifted for {name}: {}.", kinds.join(", "))
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn require_guild(ctx: Context<'_>) -> Result<serenity::GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| "This command can only be used in a server.".into())
}

async fn reply(ctx: Context<'_>, content: String) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Run before every command; asks the guild's gate about the invocation
///
/// Suppressed invocations fail the check without an error so nothing is
/// shown to the invoker.
pub async fn gate_check(ctx: Context<'_>) -> Result<bool, Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(true);
    };

    let command = ctx.command();
    let root = command
        .qualified_name
        .split_whitespace()
        .next()
        .unwrap_or(command.name.as_str())
        .to_string();

    let member = ctx.author_member().await;
    let (roles, permissions) = member
        .as_deref()
        .map(|member| actor_context(ctx, member))
        .unwrap_or_else(|| (Vec::new(), Permissions::empty()));

    let invocation = CommandInvocation {
        actor: ctx.author().id,
        command: root,
        category: command.category.clone(),
        channel: ctx.channel_id(),
        roles,
        permissions,
    };

    match ctx
        .data()
        .moderation
        .check_command(guild_id, &invocation)
        .await
    {
        GateVerdict::Allowed => Ok(true),
        GateVerdict::Suppressed => Ok(false),
        GateVerdict::Rejected(rejection) => Err(rejection.to_string().into()),
    }
}

/// Role positions and guild-level permissions, from the cache when it has the guild
fn actor_context(ctx: Context<'_>, member: &Member) -> (Vec<ActorRole>, Permissions) {
    if let Some(guild) = ctx.guild() {
        let roles = member
            .roles
            .iter()
            .filter_map(|id| {
                guild.roles.get(id).map(|role| ActorRole {
                    id: *id,
                    position: role.position,
                })
            })
            .collect();
        if guild.owner_id == member.user.id {
            return (roles, Permissions::all());
        }
        let everyone = RoleId::new(guild.id.get());
        let permissions = guild
            .roles
            .values()
            .filter(|role| role.id == everyone || member.roles.contains(&role.id))
            .fold(Permissions::empty(), |acc, role| acc | role.permissions);
        return (roles, permissions);
    }

    let roles = member
        .roles
        .iter()
        .map(|id| ActorRole {
            id: *id,
            position: 0,
        })
        .collect();
    (roles, member.permissions.unwrap_or_else(Permissions::empty))
}

/// Log every framework error and tell the invoker what they can act on
pub async fn on_error(error: FrameworkError<'_, Data, Error>) {
    logging::log_command_error(&error);

    match error {
        FrameworkError::CommandCheckFailed {
            error: Some(error),
            ctx,
            ..
        } => {
            let _ = reply(ctx, error.to_string()).await;
        }
        FrameworkError::CommandCheckFailed { error: None, .. } => {}
        FrameworkError::Command { error, ctx, .. } => {
            let message = match error.downcast_ref::<ModerationError>() {
                Some(err) if err.is_user_error() => err.to_string(),
                _ => "Something went wrong while running this command.".to_string(),
            };
            let _ = reply(ctx, message).await;
        }
        other => {
            if let Err(err) = poise::builtins::on_error(other).await {
                error!(target: crate::ERROR_TARGET, error = %err, "Failed to report framework error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::{CommandRegistry, DecisionSource, PunishmentDecision};
    use poise::serenity_prelude::UserId;

    #[test]
    fn test_registry_matches_commands() {
        let commands = commands();
        assert_eq!(commands.len(), COMMANDS.len());
        for command in &commands {
            let info = COMMANDS
                .iter()
                .find(|info| info.name == command.name)
                .unwrap_or_else(|| panic!("{} missing from COMMANDS", command.name));
            assert_eq!(command.category.as_deref(), Some(info.category));
            assert!(command.guild_only, "{} should be guild only", command.name);
        }
    }

    #[test]
    fn test_override_subcommands() {
        let command = override_();
        assert_eq!(command.name, "override");
        let names: Vec<_> = command
            .subcommands
            .iter()
            .map(|sub| sub.name.as_str())
            .collect();
        assert_eq!(names, ["user", "role", "channel", "remove", "clear"]);
    }

    #[test]
    fn test_grantable_permissions() {
        assert_eq!(grantable("moderate-members").unwrap(), Permissions::MODERATE_MEMBERS);
        assert_eq!(grantable(" Kick_Members ").unwrap(), Permissions::KICK_MEMBERS);
        assert!(matches!(
            grantable("administrator"),
            Err(ModerationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_describe_pending() {
        assert_eq!(describe_pending(&[], "eve"), "eve has no timed punishments.");
        let due = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            describe_pending(&[(PunishmentKind::RoleMute, due)], "eve"),
            "eve: Role Mute until <t:1700000000:f>."
        );
    }

    #[test]
    fn test_configuration_commands_cannot_be_disabled() {
        let registry = CommandRegistry::new(COMMANDS);
        assert!(matches!(
            registry.configurable_name("toggle"),
            Err(ModerationError::ExemptCommand(_))
        ));
        assert!(matches!(
            registry.configurable_name("override"),
            Err(ModerationError::ExemptCommand(_))
        ));
        assert_eq!(registry.configurable_name("Report").unwrap(), "report");
        assert_eq!(registry.configurable_name("moderation").unwrap(), "moderation");
    }

    #[test]
    fn test_moderators_can_report() {
        let info = CommandRegistry::new(COMMANDS).get("report").copied().unwrap();
        assert!(info.check_capability(Permissions::KICK_MEMBERS).is_ok());
        assert!(info.check_capability(Permissions::SEND_MESSAGES).is_err());
    }

    #[test]
    fn test_describe_report() {
        let decision = PunishmentDecision::new(
            UserId::new(7),
            PunishmentKind::RoleMute,
            None,
            DecisionSource::Spam(SpamCategory::Link),
        );
        assert_eq!(
            describe_report(&ReportOutcome::Punished(decision.clone()), "eve", SpamCategory::Link),
            "eve has been punished: Role Mute."
        );
        assert_eq!(
            describe_report(&ReportOutcome::NotApplied(decision), "eve", SpamCategory::Link),
            "Votes reached, but eve is already under something more severe than Role Mute."
        );
        assert_eq!(
            describe_report(
                &ReportOutcome::Counted {
                    votes: 1,
                    required: 2
                },
                "eve",
                SpamCategory::Link
            ),
            "Report counted against eve (1/2 votes)."
        );
    }

    #[test]
    fn test_describe_lifted() {
        assert_eq!(
            describe_lifted(&[], "eve"),
            "eve has no punishments that can be lifted."
        );
        assert_eq!(
            describe_lifted(&[PunishmentKind::RoleMute, PunishmentKind::Ban], "eve"),
            "Lifted for eve: Role Mute, Ban."
        );
    }
}
