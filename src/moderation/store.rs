//! Guild moderation store
//!
//! Owns one [`GuildModerationState`] per guild and is the only way in for
//! events, reports, command checks and configuration changes. State is
//! created on first contact with a guild (or on [`GuildModerationStore::attach`])
//! and torn down by [`GuildModerationStore::detach`].

use crate::MODERATION_TARGET;
use crate::moderation::{
    BannedPhrase, BannedPhraseCounter, BannedPhraseTier, CommandGate, CommandInvocation,
    CommandOverride, CommandRegistry, EntityResolver, ExpiryHandler, ExpiryKey, ExpiryPayload,
    ExpiryScheduler, GateVerdict, GuildSettings, JoinEvent, MessageEvent, ModerationError,
    ModerationResult, OverrideScope, PunishmentApplier, PunishmentDecision, PunishmentKind,
    PunishmentTarget, RaidCategory, RaidTracker, ReportOutcome, SaveQueue, ScheduledExpiry,
    SettingKey, SettingsPersistence, SpamCategory, SpamOutcome, SpamRule, SpamTracker, Voter,
    merge_decisions, observe_join, observe_spam, prune_stale_references, report_spam,
    strike_banned_phrase,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use poise::serenity_prelude::{GuildId, Permissions, UserId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Seconds of event time between sweeps of idle detector state
const TRACKER_SWEEP_SECS: i64 = 300;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transient interactive message that is honoured until it expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePrompt {
    pub prompt_id: u64,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The part of a guild's state the expiry waiter needs
struct GuildEnforcement {
    guild_id: GuildId,
    applier: Arc<dyn PunishmentApplier>,
    /// Most severe punishment in force per member
    standing: DashMap<UserId, PunishmentKind>,
    prompts: DashMap<u64, ActivePrompt>,
}

impl GuildEnforcement {
    /// Drop the member's standing if it is still `kind`
    fn clear_standing(&self, user_id: UserId, kind: PunishmentKind) {
        self.standing.remove_if(&user_id, |_, standing| *standing == kind);
    }

    fn reverse_in_background(&self, target: PunishmentTarget, kind: PunishmentKind, reason: String) {
        let applier = Arc::clone(&self.applier);
        tokio::spawn(async move {
            if let Err(e) = applier.reverse(&target, kind, &reason).await {
                warn!(
                    target: MODERATION_TARGET,
                    guild_id = %target.guild_id,
                    user_id = %target.user_id,
                    punishment = %kind,
                    error = %e,
                    "Failed to reverse punishment"
                );
            }
        });
    }
}

#[async_trait]
impl ExpiryHandler for GuildEnforcement {
    async fn on_expired(&self, entry: ScheduledExpiry) {
        match entry.payload {
            ExpiryPayload::ReversePunishment {
                target,
                kind,
                reason,
            } => {
                self.clear_standing(target.user_id, kind);
                self.reverse_in_background(target, kind, reason);
            }
            ExpiryPayload::ClosePrompt { prompt_id } => {
                if self.prompts.remove(&prompt_id).is_some() {
                    debug!(
                        target: MODERATION_TARGET,
                        guild_id = %self.guild_id,
                        prompt_id,
                        "Prompt expired"
                    );
                }
            }
        }
    }
}

/// Everything the engine tracks for one guild
pub struct GuildModerationState {
    guild_id: GuildId,
    settings: RwLock<Arc<GuildSettings>>,
    spam: DashMap<(UserId, SpamCategory), Arc<Mutex<SpamTracker>>>,
    raids: DashMap<RaidCategory, Arc<Mutex<RaidTracker>>>,
    phrase_strikes: DashMap<UserId, BannedPhraseCounter>,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
    enforcement: Arc<GuildEnforcement>,
    scheduler: ExpiryScheduler,
}

impl GuildModerationState {
    fn new(settings: GuildSettings, applier: Arc<dyn PunishmentApplier>) -> Self {
        let guild_id = settings.guild_id;
        let enforcement = Arc::new(GuildEnforcement {
            guild_id,
            applier,
            standing: DashMap::new(),
            prompts: DashMap::new(),
        });
        let handler: Arc<dyn ExpiryHandler> = enforcement.clone();

        Self {
            guild_id,
            settings: RwLock::new(Arc::new(settings)),
            spam: DashMap::new(),
            raids: DashMap::new(),
            phrase_strikes: DashMap::new(),
            last_sweep: Mutex::new(None),
            scheduler: ExpiryScheduler::spawn(guild_id, handler),
            enforcement,
        }
    }

    #[must_use]
    pub const fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Current settings snapshot
    #[must_use]
    pub fn settings(&self) -> Arc<GuildSettings> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*settings)
    }

    /// Most severe punishment currently in force for `user_id`
    #[must_use]
    pub fn standing(&self, user_id: UserId) -> Option<PunishmentKind> {
        self.enforcement.standing.get(&user_id).map(|kind| *kind)
    }

    fn spam_tracker(&self, user_id: UserId, category: SpamCategory) -> Arc<Mutex<SpamTracker>> {
        Arc::clone(self.spam.entry((user_id, category)).or_default().value())
    }

    fn raid_tracker(&self, category: RaidCategory) -> Arc<Mutex<RaidTracker>> {
        Arc::clone(self.raids.entry(category).or_default().value())
    }

    /// Mutate a private copy, validate it, swap it in and queue a save
    fn update<F>(&self, saves: &SaveQueue, mutate: F) -> ModerationResult<Arc<GuildSettings>>
    where
        F: FnOnce(&mut GuildSettings) -> ModerationResult<()>,
    {
        let mut current = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = GuildSettings::clone(&**current);
        mutate(&mut next)?;
        next.validate()?;

        let next = Arc::new(next);
        *current = Arc::clone(&next);
        saves.enqueue(Arc::clone(&next));
        Ok(next)
    }

    /// Act on a decision. Returns false when it was not actionable or the
    /// member already stands under something more severe.
    fn enforce(&self, settings: &GuildSettings, decision: &PunishmentDecision) -> bool {
        if !decision.is_actionable() {
            return false;
        }
        let user_id = decision.subject;
        let kind = decision.kind;
        let target = PunishmentTarget {
            guild_id: self.guild_id,
            user_id,
            mute_role: settings.mute_role_id,
        };
        let timed = decision.duration.is_some() && kind.is_reversible();

        // The standing entry stays locked until the reversal is scheduled.
        let reversal = match self.enforcement.standing.entry(user_id) {
            Entry::Occupied(standing) if kind < *standing.get() => {
                info!(
                    target: MODERATION_TARGET,
                    guild_id = %self.guild_id,
                    user_id = %user_id,
                    punishment = %kind,
                    standing = %standing.get(),
                    "Ignoring punishment below current standing"
                );
                return false;
            }
            standing => {
                let reversal = decision
                    .duration
                    .filter(|_| timed)
                    .and_then(|duration| {
                        self.scheduler.extend(
                            ExpiryPayload::ReversePunishment {
                                target,
                                kind,
                                reason: format!("{kind} expired"),
                            },
                            duration,
                        )
                    });
                if kind != PunishmentKind::Kick {
                    standing.insert(kind);
                }
                reversal
            }
        };

        info!(
            target: MODERATION_TARGET,
            guild_id = %self.guild_id,
            user_id = %user_id,
            punishment = %kind,
            source = %decision.source,
            duration_secs = ?decision.duration.map(|d| d.as_secs()),
            "Punishing member"
        );

        let enforcement = Arc::clone(&self.enforcement);
        let scheduler = self.scheduler.clone();
        let duration = decision.duration;
        let reason = decision.reason.clone();
        tokio::spawn(async move {
            let Err(e) = enforcement.applier.apply(&target, kind, duration, &reason).await else {
                return;
            };
            error!(
                target: MODERATION_TARGET,
                guild_id = %target.guild_id,
                user_id = %target.user_id,
                punishment = %kind,
                error = %e,
                "Failed to apply punishment"
            );
            // A later reversal of the same kind belongs to a punishment that
            // is still in force.
            let release = match &reversal {
                Some(reversal) => scheduler.cancel_entry(reversal),
                None => !timed,
            };
            if release {
                enforcement.clear_standing(target.user_id, kind);
            }
        });

        true
    }

    fn enforce_all(
        &self,
        settings: &GuildSettings,
        decisions: Vec<PunishmentDecision>,
    ) -> Vec<PunishmentDecision> {
        merge_decisions(decisions)
            .into_iter()
            .filter(|decision| self.enforce(settings, decision))
            .collect()
    }

    fn strike(
        &self,
        settings: &GuildSettings,
        user_id: UserId,
        tier: BannedPhraseTier,
    ) -> Option<PunishmentDecision> {
        let decision = {
            let mut counter = self.phrase_strikes.entry(user_id).or_default();
            strike_banned_phrase(&mut counter, &settings.banned_phrases, user_id, tier)
        };
        self.phrase_strikes
            .remove_if(&user_id, |_, counter| counter.is_clear());
        decision
    }

    /// Drop spam trackers with nothing left in their window and phrase
    /// counters with no strikes. Runs at most once per sweep interval of
    /// event time.
    fn sweep_idle(&self, settings: &GuildSettings, now: DateTime<Utc>) {
        {
            let mut last = lock(&self.last_sweep);
            if last.is_some_and(|at| now - at < chrono::Duration::seconds(TRACKER_SWEEP_SECS)) {
                return;
            }
            *last = Some(now);
        }

        let before = self.spam.len();
        self.spam.retain(|(_, category), tracker| {
            // Someone is mid-observation.
            if Arc::strong_count(tracker) > 1 {
                return true;
            }
            let config = settings.spam.category(*category);
            let window = config
                .max_interval()
                .filter(|_| config.enabled)
                .unwrap_or_else(chrono::Duration::zero);
            !lock(&**tracker).is_idle(window, now)
        });
        self.phrase_strikes.retain(|_, counter| !counter.is_clear());

        let dropped = before.saturating_sub(self.spam.len());
        if dropped > 0 {
            debug!(
                target: MODERATION_TARGET,
                guild_id = %self.guild_id,
                dropped,
                "Dropped idle spam trackers"
            );
        }
    }

    fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl fmt::Debug for GuildModerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildModerationState")
            .field("guild_id", &self.guild_id)
            .field("spam_trackers", &self.spam.len())
            .field("pending_expiries", &self.scheduler.len())
            .finish_non_exhaustive()
    }
}

type GuildSlot = Arc<OnceCell<Arc<GuildModerationState>>>;

/// Registry of per-guild moderation state
pub struct GuildModerationStore {
    guilds: DashMap<GuildId, GuildSlot>,
    registry: Arc<CommandRegistry>,
    applier: Arc<dyn PunishmentApplier>,
    resolver: Arc<dyn EntityResolver>,
    persistence: Arc<dyn SettingsPersistence>,
    saves: SaveQueue,
}

impl fmt::Debug for GuildModerationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildModerationStore")
            .field("guilds", &self.guilds.len())
            .finish_non_exhaustive()
    }
}

impl GuildModerationStore {
    /// Create the store and start its save queue. Must be called from within
    /// a Tokio runtime.
    pub fn new(
        registry: CommandRegistry,
        applier: Arc<dyn PunishmentApplier>,
        resolver: Arc<dyn EntityResolver>,
        persistence: Arc<dyn SettingsPersistence>,
    ) -> Self {
        Self {
            guilds: DashMap::new(),
            registry: Arc::new(registry),
            applier,
            resolver,
            saves: SaveQueue::spawn(Arc::clone(&persistence)),
            persistence,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// State for the guild, loading its settings on first use
    pub async fn attach(&self, guild_id: GuildId) -> Arc<GuildModerationState> {
        let slot = Arc::clone(self.guilds.entry(guild_id).or_default().value());
        let state = slot.get_or_init(|| self.load_state(guild_id)).await;
        Arc::clone(state)
    }

    /// State for the guild if it is attached
    #[must_use]
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildModerationState>> {
        self.guilds
            .get(&guild_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Drop the guild's state and stop its scheduler. Pending expiries are
    /// discarded.
    pub fn detach(&self, guild_id: GuildId) -> bool {
        let Some((_, slot)) = self.guilds.remove(&guild_id) else {
            return false;
        };
        if let Some(state) = slot.get() {
            state.shutdown();
        }
        info!(target: MODERATION_TARGET, guild_id = %guild_id, "Detached guild");
        true
    }

    #[must_use]
    pub fn attached_guilds(&self) -> Vec<GuildId> {
        self.guilds
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| *entry.key())
            .collect()
    }

    async fn load_state(&self, guild_id: GuildId) -> Arc<GuildModerationState> {
        let mut settings = match self.persistence.load(guild_id).await {
            Ok(Some(settings)) => match settings.validate() {
                Ok(()) => settings,
                Err(e) => {
                    warn!(
                        target: MODERATION_TARGET,
                        guild_id = %guild_id,
                        error = %e,
                        "Stored settings are invalid, using defaults"
                    );
                    GuildSettings::new(guild_id)
                }
            },
            Ok(None) => GuildSettings::new(guild_id),
            Err(e) => {
                warn!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    error = %e,
                    "Could not load settings, using defaults"
                );
                GuildSettings::new(guild_id)
            }
        };

        if prune_stale_references(&mut settings, self.resolver.as_ref()).await > 0 {
            self.saves.enqueue(Arc::new(settings.clone()));
        }

        info!(target: MODERATION_TARGET, guild_id = %guild_id, "Attached guild");
        Arc::new(GuildModerationState::new(settings, Arc::clone(&self.applier)))
    }

    /// Run a message through the spam detectors and the banned-phrase list.
    /// Returns the decisions that were acted on.
    pub async fn on_message(
        &self,
        guild_id: GuildId,
        event: &MessageEvent,
    ) -> Vec<PunishmentDecision> {
        if event.author_is_bot {
            return Vec::new();
        }
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        state.sweep_idle(&settings, event.sent_at);
        let mut decisions = Vec::new();

        for category in SpamCategory::ALL {
            let config = settings.spam.category(category);
            if !config.enabled || !event.qualifies(category, config.threshold) {
                continue;
            }

            let tracker = state.spam_tracker(event.author_id, category);
            let outcome = observe_spam(
                &mut lock(&tracker),
                category,
                config,
                event.author_id,
                event.sent_at,
            );
            match outcome {
                SpamOutcome::Punish(decision) => decisions.push(decision),
                SpamOutcome::Flagged { votes, required } => debug!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    user_id = %event.author_id,
                    category = %category,
                    votes,
                    required,
                    "Member flagged for spam"
                ),
                SpamOutcome::Recorded { .. } => {}
            }
        }

        if settings.banned_phrases.enabled {
            if let Some(phrase) = settings.banned_phrases.find_match(&event.content) {
                debug!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    user_id = %event.author_id,
                    tier = %phrase.tier,
                    "Banned phrase used"
                );
                decisions.extend(state.strike(&settings, event.author_id, phrase.tier));
            }
        }

        state.enforce_all(&settings, decisions)
    }

    /// Record a join against every enabled raid category
    pub async fn on_user_joined(
        &self,
        guild_id: GuildId,
        event: JoinEvent,
    ) -> Vec<PunishmentDecision> {
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        let mut decisions = Vec::new();

        for category in RaidCategory::ALL {
            let config = settings.raids.category(category);
            if !config.enabled {
                continue;
            }
            let tracker = state.raid_tracker(category);
            let raiders = observe_join(&lock(&tracker), category, config, &event);
            if !raiders.is_empty() {
                warn!(
                    target: MODERATION_TARGET,
                    guild_id = %guild_id,
                    category = %category,
                    members = raiders.len(),
                    "Raid detected"
                );
            }
            decisions.extend(raiders);
        }

        state.enforce_all(&settings, decisions)
    }

    /// Add a banned-phrase strike found by an external matcher
    pub async fn on_banned_phrase_hit(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        tier: BannedPhraseTier,
    ) -> Option<PunishmentDecision> {
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        if !settings.banned_phrases.enabled {
            return None;
        }
        let decision = state.strike(&settings, user_id, tier)?;
        state.enforce_all(&settings, vec![decision]).pop()
    }

    /// A moderator's vote that `subject` is spamming in `category`
    pub async fn report(
        &self,
        guild_id: GuildId,
        subject: UserId,
        category: SpamCategory,
        reporter: UserId,
    ) -> ReportOutcome {
        if subject == reporter {
            return ReportOutcome::Ignored;
        }
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        if !settings.spam.category(category).enabled {
            return ReportOutcome::Ignored;
        }

        let Some(tracker) = state
            .spam
            .get(&(subject, category))
            .map(|tracker| Arc::clone(tracker.value()))
        else {
            return ReportOutcome::NotFlagged;
        };

        let outcome = report_spam(&mut lock(&tracker), category, subject, Voter::User(reporter));
        match outcome {
            ReportOutcome::Punished(decision) if !state.enforce(&settings, &decision) => {
                ReportOutcome::NotApplied(decision)
            }
            outcome => outcome,
        }
    }

    /// Gate a command invocation against the guild's command settings
    pub async fn check_command(
        &self,
        guild_id: GuildId,
        invocation: &CommandInvocation,
    ) -> GateVerdict {
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        CommandGate::new(&self.registry, &settings.commands).evaluate(invocation)
    }

    pub async fn settings(&self, guild_id: GuildId) -> Arc<GuildSettings> {
        self.attach(guild_id).await.settings()
    }

    /// Apply a change to the guild's settings. Invalid results are rejected
    /// and leave the current settings untouched.
    pub async fn update_settings<F>(
        &self,
        guild_id: GuildId,
        mutate: F,
    ) -> ModerationResult<Arc<GuildSettings>>
    where
        F: FnOnce(&mut GuildSettings) -> ModerationResult<()>,
    {
        let state = self.attach(guild_id).await;
        let updated = state.update(&self.saves, mutate)?;
        info!(target: MODERATION_TARGET, guild_id = %guild_id, "Settings updated");
        Ok(updated)
    }

    /// Set a value by its key, e.g. `spam.link.threshold`
    pub async fn set_setting(
        &self,
        guild_id: GuildId,
        key: &str,
        value: &str,
    ) -> ModerationResult<SettingKey> {
        let key: SettingKey = key.parse()?;
        self.update_settings(guild_id, |settings| key.apply(settings, value))
            .await?;
        Ok(key)
    }

    /// Switch a command or category on or off for the whole guild
    pub async fn set_command_enabled(
        &self,
        guild_id: GuildId,
        name: &str,
        enabled: bool,
    ) -> ModerationResult<()> {
        let name = self.registry.configurable_name(name)?;
        self.update_settings(guild_id, |settings| {
            if enabled {
                settings.commands.disabled.remove(&name);
            } else {
                settings.commands.disabled.insert(name);
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_override(
        &self,
        guild_id: GuildId,
        name: &str,
        scope: OverrideScope,
        enabled: bool,
    ) -> ModerationResult<()> {
        let name = self.registry.configurable_name(name)?;
        self.update_settings(guild_id, |settings| {
            settings
                .commands
                .overrides
                .set(CommandOverride::new(name, scope, enabled));
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Remove one override; returns whether it existed
    pub async fn clear_override(
        &self,
        guild_id: GuildId,
        name: &str,
        scope: OverrideScope,
    ) -> ModerationResult<bool> {
        let name = self.registry.configurable_name(name)?;
        let mut existed = false;
        self.update_settings(guild_id, |settings| {
            existed = settings.commands.overrides.remove(&name, scope).is_some();
            Ok(())
        })
        .await?;
        Ok(existed)
    }

    /// Remove every override for a command or category
    pub async fn clear_overrides(&self, guild_id: GuildId, name: &str) -> ModerationResult<usize> {
        let name = self.registry.configurable_name(name)?;
        let mut removed = 0;
        self.update_settings(guild_id, |settings| {
            removed = settings.commands.overrides.remove_name(&name);
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    /// Grant permission bits on top of the member's platform permissions
    pub async fn grant_permissions(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        permissions: Permissions,
    ) -> ModerationResult<()> {
        self.update_settings(guild_id, |settings| {
            *settings
                .commands
                .extra_permissions
                .entry(user_id)
                .or_insert_with(Permissions::empty) |= permissions;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn revoke_permissions(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        permissions: Permissions,
    ) -> ModerationResult<()> {
        self.update_settings(guild_id, |settings| {
            let extra = &mut settings.commands.extra_permissions;
            if let Some(granted) = extra.get_mut(&user_id) {
                granted.remove(permissions);
                if granted.is_empty() {
                    extra.remove(&user_id);
                }
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn add_spam_rule(
        &self,
        guild_id: GuildId,
        category: SpamCategory,
        rule: SpamRule,
    ) -> ModerationResult<()> {
        self.update_settings(guild_id, |settings| {
            settings.spam.category_mut(category).rules.push(rule);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn remove_spam_rule(
        &self,
        guild_id: GuildId,
        category: SpamCategory,
        index: usize,
    ) -> ModerationResult<SpamRule> {
        let mut removed = None;
        self.update_settings(guild_id, |settings| {
            let rules = &mut settings.spam.category_mut(category).rules;
            if index >= rules.len() {
                return Err(ModerationError::invalid_config(format!(
                    "{category} spam has no rule #{index}"
                )));
            }
            removed = Some(rules.remove(index));
            Ok(())
        })
        .await?;
        removed.ok_or_else(|| ModerationError::Other("rule removal did not run".to_string()))
    }

    /// Add a banned phrase, replacing an existing entry for the same phrase
    pub async fn add_banned_phrase(
        &self,
        guild_id: GuildId,
        phrase: BannedPhrase,
    ) -> ModerationResult<()> {
        self.update_settings(guild_id, |settings| {
            let phrases = &mut settings.banned_phrases.phrases;
            phrases.retain(|existing| !existing.phrase.eq_ignore_ascii_case(&phrase.phrase));
            phrases.push(phrase);
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn remove_banned_phrase(&self, guild_id: GuildId, phrase: &str) -> ModerationResult<()> {
        self.update_settings(guild_id, |settings| {
            let phrases = &mut settings.banned_phrases.phrases;
            let before = phrases.len();
            phrases.retain(|existing| !existing.phrase.eq_ignore_ascii_case(phrase));
            if phrases.len() == before {
                return Err(ModerationError::invalid_config(format!(
                    "'{phrase}' is not a banned phrase"
                )));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Cancel a pending reversal without reversing anything, e.g. when a
    /// moderator already undid the punishment by hand
    pub fn cancel_punishment(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        kind: PunishmentKind,
    ) -> bool {
        let Some(state) = self.get(guild_id) else {
            return false;
        };
        state.enforcement.clear_standing(user_id, kind);
        state
            .scheduler
            .cancel(&ExpiryKey::Punishment { user_id, kind })
            .is_some()
    }

    /// Reverse every reversible punishment in force for the member now.
    /// Returns the kinds being reversed.
    pub async fn lift_punishments(&self, guild_id: GuildId, user_id: UserId) -> Vec<PunishmentKind> {
        let state = self.attach(guild_id).await;
        let settings = state.settings();
        let mut lifted = Vec::new();

        for entry in state.scheduler.cancel_for_user(user_id) {
            if let ExpiryPayload::ReversePunishment { target, kind, .. } = entry.payload {
                state.enforcement.clear_standing(user_id, kind);
                state
                    .enforcement
                    .reverse_in_background(target, kind, "Punishment lifted".to_string());
                lifted.push(kind);
            }
        }

        // Permanent punishments have no pending reversal.
        if let Some((_, kind)) = state.enforcement.standing.remove(&user_id) {
            if kind.is_reversible() && !lifted.contains(&kind) {
                let target = PunishmentTarget {
                    guild_id,
                    user_id,
                    mute_role: settings.mute_role_id,
                };
                state
                    .enforcement
                    .reverse_in_background(target, kind, "Punishment lifted".to_string());
                lifted.push(kind);
            }
        }

        if !lifted.is_empty() {
            info!(
                target: MODERATION_TARGET,
                guild_id = %guild_id,
                user_id = %user_id,
                lifted = ?lifted,
                "Punishments lifted"
            );
        }
        lifted
    }

    /// Start honouring interactions with a prompt until `expires_at`. A time
    /// already past closes it on the next tick.
    pub async fn open_prompt(
        &self,
        guild_id: GuildId,
        prompt_id: u64,
        expires_at: DateTime<Utc>,
    ) -> ActivePrompt {
        let state = self.attach(guild_id).await;
        let entry = state
            .scheduler
            .schedule_at(ExpiryPayload::ClosePrompt { prompt_id }, expires_at);
        let prompt = ActivePrompt {
            prompt_id,
            opened_at: entry.created_at,
            expires_at: entry.due_at,
        };
        state.enforcement.prompts.insert(prompt_id, prompt);
        prompt
    }

    #[must_use]
    pub fn is_prompt_open(&self, guild_id: GuildId, prompt_id: u64) -> bool {
        self.get(guild_id)
            .is_some_and(|state| state.enforcement.prompts.contains_key(&prompt_id))
    }

    /// Close a prompt before it expires
    pub fn close_prompt(&self, guild_id: GuildId, prompt_id: u64) -> bool {
        let Some(state) = self.get(guild_id) else {
            return false;
        };
        state.scheduler.cancel(&ExpiryKey::Prompt(prompt_id));
        state.enforcement.prompts.remove(&prompt_id).is_some()
    }

    /// Pending expiries for the guild, earliest first
    #[must_use]
    pub fn pending_expiries(&self, guild_id: GuildId) -> Vec<ScheduledExpiry> {
        self.get(guild_id)
            .map(|state| state.scheduler.pending())
            .unwrap_or_default()
    }
}
