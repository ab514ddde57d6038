//! Moderation engine
//!
//! Detectors, the command gate and the expiry scheduler, tied together per
//! guild by [`GuildModerationStore`]. Discord access goes through the
//! [`PunishmentApplier`], [`EntityResolver`] and [`SettingsPersistence`]
//! traits.

mod applier;
mod counter;
mod detector;
mod error;
mod gate;
mod persistence;
mod punishment;
mod resolver;
mod settings;
mod store;
#[cfg(test)]
mod testing;
mod timers;
mod tracker;

pub use applier::{DiscordPunishmentApplier, PunishmentApplier};
pub use counter::WindowedCounter;
pub use detector::{
    JoinEvent, MessageEvent, ReportOutcome, SpamOutcome, observe_join, observe_spam, report_spam,
    strike_banned_phrase,
};
pub use error::{ModerationError, ModerationResult};
pub use gate::{
    ActorRole, CommandGate, CommandInfo, CommandInvocation, CommandOverride, CommandRegistry,
    GateVerdict, OverrideScope, OverrideTable, Rejection, ScopeKind,
};
pub use persistence::{SaveQueue, SettingsPersistence, YamlSettingsStore};
pub use punishment::{
    DecisionSource, Escalation, PunishmentDecision, PunishmentKind, PunishmentTarget,
    merge_decisions,
};
pub use resolver::{
    DiscordEntityResolver, EntityRef, EntityResolver, ResolvedEntity, prune_stale_references,
};
pub use settings::{
    BannedPhrase, BannedPhraseSettings, BannedPhraseTier, CommandSettings, GuildSettings,
    MAX_DURATION_SECS, MAX_INTERVAL_SECS, RaidCategory, RaidConfig, RaidSettings, SettingKey,
    SpamCategory, SpamCategoryConfig, SpamRule, SpamSettings,
};
pub use store::{ActivePrompt, GuildModerationState, GuildModerationStore};
pub use timers::{
    ExpiryHandler, ExpiryKey, ExpiryKind, ExpiryPayload, ExpiryScheduler, ScheduledExpiry,
};
pub use tracker::{BannedPhraseCounter, RaidTracker, SpamTracker, Voter};

#[cfg(test)]
pub use applier::MockPunishmentApplier;
#[cfg(test)]
pub use resolver::MockEntityResolver;
