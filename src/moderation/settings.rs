//! Per-guild moderation settings
//!
//! Everything here is persisted. Settings only hold ids; live roles, channels
//! and members are looked up through the entity resolver when needed.

use crate::moderation::{ModerationError, ModerationResult, OverrideTable, PunishmentKind};
use derive_more::Display;
use poise::serenity_prelude::{GuildId, Permissions, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Longest window a detector may look back over
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
/// Longest time-limited punishment
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Lowercase a key and strip separators so `Long-Message`, `long_message`
/// and `longmessage` compare equal
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Message spam categories
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum SpamCategory {
    #[display("Message")]
    Message,
    #[display("Long Message")]
    LongMessage,
    #[display("Link")]
    Link,
    #[display("Image")]
    Image,
    #[display("Mention")]
    Mention,
}

impl SpamCategory {
    pub const ALL: [Self; 5] = [
        Self::Message,
        Self::LongMessage,
        Self::Link,
        Self::Image,
        Self::Mention,
    ];

    /// Name used in setting keys
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::LongMessage => "long-message",
            Self::Link => "link",
            Self::Image => "image",
            Self::Mention => "mention",
        }
    }
}

impl FromStr for SpamCategory {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|category| normalize(category.key()) == wanted)
            .ok_or_else(|| ModerationError::invalid_config(format!("unknown spam category '{s}'")))
    }
}

/// Join raid categories
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum RaidCategory {
    #[display("Regular")]
    Regular,
    #[display("Rapid Join")]
    RapidJoin,
}

impl RaidCategory {
    pub const ALL: [Self; 2] = [Self::Regular, Self::RapidJoin];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::RapidJoin => "rapid-join",
        }
    }
}

impl FromStr for RaidCategory {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|category| normalize(category.key()) == wanted)
            .ok_or_else(|| ModerationError::invalid_config(format!("unknown raid category '{s}'")))
    }
}

/// Severity tier of a banned phrase
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum BannedPhraseTier {
    #[display("Role")]
    Role,
    #[display("Kick")]
    Kick,
    #[display("Ban")]
    Ban,
}

impl BannedPhraseTier {
    pub const ALL: [Self; 3] = [Self::Role, Self::Kick, Self::Ban];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Kick => "kick",
            Self::Ban => "ban",
        }
    }
}

impl FromStr for BannedPhraseTier {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|tier| tier.key() == wanted)
            .ok_or_else(|| ModerationError::invalid_config(format!("unknown phrase tier '{s}'")))
    }
}

fn window(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn validate_interval(what: &str, secs: u64) -> ModerationResult<()> {
    if secs == 0 || secs > MAX_INTERVAL_SECS {
        return Err(ModerationError::invalid_config(format!(
            "{what} must be between 1 and {MAX_INTERVAL_SECS} seconds"
        )));
    }
    Ok(())
}

fn validate_at_least_one(what: &str, value: u32) -> ModerationResult<()> {
    if value == 0 {
        return Err(ModerationError::invalid_config(format!(
            "{what} must be at least 1"
        )));
    }
    Ok(())
}

fn validate_duration(
    what: &str,
    punishment: PunishmentKind,
    secs: Option<u64>,
) -> ModerationResult<()> {
    let Some(secs) = secs else {
        return Ok(());
    };
    if !punishment.is_reversible() {
        return Err(ModerationError::invalid_config(format!(
            "{what}: {punishment} cannot be time-limited"
        )));
    }
    if secs == 0 || secs > MAX_DURATION_SECS {
        return Err(ModerationError::invalid_config(format!(
            "{what}: duration must be between 1 and {MAX_DURATION_SECS} seconds"
        )));
    }
    Ok(())
}

/// One threshold a spam category is judged against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamRule {
    /// Look-back window in seconds
    pub interval_secs: u64,
    /// Qualifying events within the window needed to flag the subject
    pub required_instances: u32,
    /// Distinct votes needed before the punishment is applied
    pub required_votes: u32,
    pub punishment: PunishmentKind,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl SpamRule {
    #[must_use]
    pub fn interval(&self) -> chrono::Duration {
        window(self.interval_secs)
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> ModerationResult<()> {
        validate_interval("rule interval", self.interval_secs)?;
        validate_at_least_one("required instances", self.required_instances)?;
        validate_at_least_one("required votes", self.required_votes)?;
        validate_duration("rule", self.punishment, self.duration_secs)
    }
}

/// Settings for one spam category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamCategoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Per-message amount (characters, links, images, mentions) that makes a
    /// message count for this category
    pub threshold: u32,
    /// Whether the detector votes on its own behalf once a rule is tripped
    #[serde(default = "default_true")]
    pub auto_vote: bool,
    #[serde(default)]
    pub rules: Vec<SpamRule>,
}

const fn default_true() -> bool {
    true
}

impl SpamCategoryConfig {
    fn with_rule(threshold: u32, rule: SpamRule) -> Self {
        Self {
            enabled: false,
            threshold,
            auto_vote: true,
            rules: vec![rule],
        }
    }

    /// The longest interval any rule looks back over
    #[must_use]
    pub fn max_interval(&self) -> Option<chrono::Duration> {
        self.rules.iter().map(SpamRule::interval).max()
    }

    pub fn validate(&self) -> ModerationResult<()> {
        validate_at_least_one("threshold", self.threshold)?;
        self.rules.iter().try_for_each(SpamRule::validate)
    }
}

/// Spam settings for every category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamSettings {
    pub message: SpamCategoryConfig,
    pub long_message: SpamCategoryConfig,
    pub link: SpamCategoryConfig,
    pub image: SpamCategoryConfig,
    pub mention: SpamCategoryConfig,
}

impl Default for SpamSettings {
    fn default() -> Self {
        let mute = |interval_secs, required_instances, minutes: u64| SpamRule {
            interval_secs,
            required_instances,
            required_votes: 1,
            punishment: PunishmentKind::RoleMute,
            duration_secs: Some(minutes * 60),
        };

        Self {
            message: SpamCategoryConfig::with_rule(1, mute(5, 6, 10)),
            long_message: SpamCategoryConfig::with_rule(1500, mute(60, 3, 10)),
            link: SpamCategoryConfig::with_rule(3, mute(60, 2, 10)),
            image: SpamCategoryConfig::with_rule(3, mute(60, 2, 10)),
            mention: SpamCategoryConfig::with_rule(5, mute(60, 1, 30)),
        }
    }
}

impl SpamSettings {
    #[must_use]
    pub const fn category(&self, category: SpamCategory) -> &SpamCategoryConfig {
        match category {
            SpamCategory::Message => &self.message,
            SpamCategory::LongMessage => &self.long_message,
            SpamCategory::Link => &self.link,
            SpamCategory::Image => &self.image,
            SpamCategory::Mention => &self.mention,
        }
    }

    pub fn category_mut(&mut self, category: SpamCategory) -> &mut SpamCategoryConfig {
        match category {
            SpamCategory::Message => &mut self.message,
            SpamCategory::LongMessage => &mut self.long_message,
            SpamCategory::Link => &mut self.link,
            SpamCategory::Image => &mut self.image,
            SpamCategory::Mention => &mut self.mention,
        }
    }
}

/// Settings for one raid category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidConfig {
    #[serde(default)]
    pub enabled: bool,
    pub interval_secs: u64,
    /// Joins within the window that constitute a raid
    pub required_count: u32,
    pub punishment: PunishmentKind,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl RaidConfig {
    #[must_use]
    pub fn interval(&self) -> chrono::Duration {
        window(self.interval_secs)
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> ModerationResult<()> {
        validate_interval("raid interval", self.interval_secs)?;
        validate_at_least_one("raid required count", self.required_count)?;
        validate_duration("raid", self.punishment, self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaidSettings {
    pub regular: RaidConfig,
    pub rapid_join: RaidConfig,
}

impl Default for RaidSettings {
    fn default() -> Self {
        Self {
            regular: RaidConfig {
                enabled: false,
                interval_secs: 300,
                required_count: 10,
                punishment: PunishmentKind::Kick,
                duration_secs: None,
            },
            rapid_join: RaidConfig {
                enabled: false,
                interval_secs: 10,
                required_count: 5,
                punishment: PunishmentKind::Kick,
                duration_secs: None,
            },
        }
    }
}

impl RaidSettings {
    #[must_use]
    pub const fn category(&self, category: RaidCategory) -> &RaidConfig {
        match category {
            RaidCategory::Regular => &self.regular,
            RaidCategory::RapidJoin => &self.rapid_join,
        }
    }

    pub fn category_mut(&mut self, category: RaidCategory) -> &mut RaidConfig {
        match category {
            RaidCategory::Regular => &mut self.regular,
            RaidCategory::RapidJoin => &mut self.rapid_join,
        }
    }
}

/// A phrase that earns a strike in its tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedPhrase {
    pub phrase: String,
    pub tier: BannedPhraseTier,
}

impl BannedPhrase {
    /// Case-insensitive match on word boundaries
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        let phrase = words(&self.phrase);
        if phrase.is_empty() {
            return false;
        }
        words(content)
            .windows(phrase.len())
            .any(|window| window == phrase.as_slice())
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannedPhraseSettings {
    pub enabled: bool,
    pub phrases: Vec<BannedPhrase>,
    pub role_strikes: u32,
    pub kick_strikes: u32,
    pub ban_strikes: u32,
    /// How long a role-tier mute lasts
    pub mute_duration_secs: Option<u64>,
}

impl Default for BannedPhraseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            phrases: Vec::new(),
            role_strikes: 3,
            kick_strikes: 3,
            ban_strikes: 1,
            mute_duration_secs: Some(60 * 60),
        }
    }
}

impl BannedPhraseSettings {
    /// Strikes needed in `tier` before it punishes
    #[must_use]
    pub const fn strikes_for(&self, tier: BannedPhraseTier) -> u32 {
        match tier {
            BannedPhraseTier::Role => self.role_strikes,
            BannedPhraseTier::Kick => self.kick_strikes,
            BannedPhraseTier::Ban => self.ban_strikes,
        }
    }

    fn strikes_mut(&mut self, tier: BannedPhraseTier) -> &mut u32 {
        match tier {
            BannedPhraseTier::Role => &mut self.role_strikes,
            BannedPhraseTier::Kick => &mut self.kick_strikes,
            BannedPhraseTier::Ban => &mut self.ban_strikes,
        }
    }

    #[must_use]
    pub fn mute_duration(&self) -> Option<Duration> {
        self.mute_duration_secs.map(Duration::from_secs)
    }

    /// The most severe phrase contained in `content`
    #[must_use]
    pub fn find_match(&self, content: &str) -> Option<&BannedPhrase> {
        self.phrases
            .iter()
            .filter(|phrase| phrase.matches(content))
            .max_by_key(|phrase| phrase.tier)
    }

    pub fn validate(&self) -> ModerationResult<()> {
        for tier in BannedPhraseTier::ALL {
            validate_at_least_one(&format!("{} strikes", tier.key()), self.strikes_for(tier))?;
        }
        validate_duration(
            "banned phrase mute",
            PunishmentKind::RoleMute,
            self.mute_duration_secs,
        )?;
        if let Some(empty) = self.phrases.iter().find(|p| words(&p.phrase).is_empty()) {
            return Err(ModerationError::invalid_config(format!(
                "banned phrase '{}' has no words",
                empty.phrase
            )));
        }
        Ok(())
    }
}

/// Guild-wide command switches, overrides and extra permissions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Commands and categories switched off for the whole guild
    pub disabled: BTreeSet<String>,
    pub overrides: OverrideTable,
    /// Permission bits granted by the bot on top of platform permissions
    pub extra_permissions: BTreeMap<UserId, Permissions>,
}

impl CommandSettings {
    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(&name.to_lowercase())
    }

    #[must_use]
    pub fn extra_permissions_for(&self, user_id: UserId) -> Permissions {
        self.extra_permissions
            .get(&user_id)
            .copied()
            .unwrap_or_else(Permissions::empty)
    }
}

/// All persisted moderation configuration of one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: GuildId,
    #[serde(default)]
    pub mute_role_id: Option<RoleId>,
    #[serde(default)]
    pub spam: SpamSettings,
    #[serde(default)]
    pub raids: RaidSettings,
    #[serde(default)]
    pub banned_phrases: BannedPhraseSettings,
    #[serde(default)]
    pub commands: CommandSettings,
}

impl GuildSettings {
    /// Default settings for a guild
    #[must_use]
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            mute_role_id: None,
            spam: SpamSettings::default(),
            raids: RaidSettings::default(),
            banned_phrases: BannedPhraseSettings::default(),
            commands: CommandSettings::default(),
        }
    }

    /// Check every threshold, interval and duration
    pub fn validate(&self) -> ModerationResult<()> {
        for category in SpamCategory::ALL {
            self.spam
                .category(category)
                .validate()
                .map_err(|e| ModerationError::invalid_config(format!("{category} spam: {e}")))?;
        }
        for category in RaidCategory::ALL {
            self.raids
                .category(category)
                .validate()
                .map_err(|e| ModerationError::invalid_config(format!("{category} raid: {e}")))?;
        }
        self.banned_phrases.validate()
    }
}

/// A setting addressable by name, e.g. `spam.mention.threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    MuteRole,
    SpamEnabled(SpamCategory),
    SpamThreshold(SpamCategory),
    SpamAutoVote(SpamCategory),
    RaidEnabled(RaidCategory),
    RaidInterval(RaidCategory),
    RaidRequiredCount(RaidCategory),
    RaidPunishment(RaidCategory),
    RaidDuration(RaidCategory),
    BannedPhrasesEnabled,
    BannedPhraseStrikes(BannedPhraseTier),
    BannedPhraseMuteDuration,
}

impl SettingKey {
    /// Parse `raw` for this key and store it in `settings`.
    ///
    /// Only the parse is checked here; callers validate the whole settings
    /// value afterwards.
    pub fn apply(self, settings: &mut GuildSettings, raw: &str) -> ModerationResult<()> {
        match self {
            Self::MuteRole => settings.mute_role_id = parse_role(raw)?,
            Self::SpamEnabled(category) => {
                settings.spam.category_mut(category).enabled = parse_bool(raw)?;
            }
            Self::SpamThreshold(category) => {
                settings.spam.category_mut(category).threshold = parse_number(raw)?;
            }
            Self::SpamAutoVote(category) => {
                settings.spam.category_mut(category).auto_vote = parse_bool(raw)?;
            }
            Self::RaidEnabled(category) => {
                settings.raids.category_mut(category).enabled = parse_bool(raw)?;
            }
            Self::RaidInterval(category) => {
                settings.raids.category_mut(category).interval_secs = parse_number(raw)?;
            }
            Self::RaidRequiredCount(category) => {
                settings.raids.category_mut(category).required_count = parse_number(raw)?;
            }
            Self::RaidPunishment(category) => {
                settings.raids.category_mut(category).punishment = raw.parse()?;
            }
            Self::RaidDuration(category) => {
                settings.raids.category_mut(category).duration_secs = parse_optional_secs(raw)?;
            }
            Self::BannedPhrasesEnabled => settings.banned_phrases.enabled = parse_bool(raw)?,
            Self::BannedPhraseStrikes(tier) => {
                *settings.banned_phrases.strikes_mut(tier) = parse_number(raw)?;
            }
            Self::BannedPhraseMuteDuration => {
                settings.banned_phrases.mute_duration_secs = parse_optional_secs(raw)?;
            }
        }
        Ok(())
    }
}

impl FromStr for SettingKey {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ModerationError::UnknownSetting(s.to_string());
        let lowered = s.trim().to_lowercase();
        let parts: Vec<&str> = lowered.split('.').collect();

        let key = match parts.as_slice() {
            ["mute-role"] => Self::MuteRole,
            ["spam", category, field] => {
                let category = category.parse().map_err(|_| unknown())?;
                match *field {
                    "enabled" => Self::SpamEnabled(category),
                    "threshold" => Self::SpamThreshold(category),
                    "auto-vote" => Self::SpamAutoVote(category),
                    _ => return Err(unknown()),
                }
            }
            ["raid", category, field] => {
                let category = category.parse().map_err(|_| unknown())?;
                match *field {
                    "enabled" => Self::RaidEnabled(category),
                    "interval" => Self::RaidInterval(category),
                    "required-count" => Self::RaidRequiredCount(category),
                    "punishment" => Self::RaidPunishment(category),
                    "duration" => Self::RaidDuration(category),
                    _ => return Err(unknown()),
                }
            }
            ["banned-phrases", "enabled"] => Self::BannedPhrasesEnabled,
            ["banned-phrases", "mute-duration"] => Self::BannedPhraseMuteDuration,
            ["banned-phrases", field] => {
                let tier = field.strip_suffix("-strikes").ok_or_else(unknown)?;
                Self::BannedPhraseStrikes(tier.parse().map_err(|_| unknown())?)
            }
            _ => return Err(unknown()),
        };
        Ok(key)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MuteRole => write!(f, "mute-role"),
            Self::SpamEnabled(c) => write!(f, "spam.{}.enabled", c.key()),
            Self::SpamThreshold(c) => write!(f, "spam.{}.threshold", c.key()),
            Self::SpamAutoVote(c) => write!(f, "spam.{}.auto-vote", c.key()),
            Self::RaidEnabled(c) => write!(f, "raid.{}.enabled", c.key()),
            Self::RaidInterval(c) => write!(f, "raid.{}.interval", c.key()),
            Self::RaidRequiredCount(c) => write!(f, "raid.{}.required-count", c.key()),
            Self::RaidPunishment(c) => write!(f, "raid.{}.punishment", c.key()),
            Self::RaidDuration(c) => write!(f, "raid.{}.duration", c.key()),
            Self::BannedPhrasesEnabled => write!(f, "banned-phrases.enabled"),
            Self::BannedPhraseStrikes(t) => write!(f, "banned-phrases.{}-strikes", t.key()),
            Self::BannedPhraseMuteDuration => write!(f, "banned-phrases.mute-duration"),
        }
    }
}

fn parse_bool(raw: &str) -> ModerationResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "on" | "yes" | "enabled" | "1" => Ok(true),
        "false" | "off" | "no" | "disabled" | "0" => Ok(false),
        _ => Err(ModerationError::invalid_config(format!(
            "'{raw}' is not a boolean"
        ))),
    }
}

fn parse_number<N: FromStr>(raw: &str) -> ModerationResult<N> {
    raw.trim()
        .parse()
        .map_err(|_| ModerationError::invalid_config(format!("'{raw}' is not a valid number")))
}

fn is_none(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "none" | "off" | "permanent")
}

fn parse_optional_secs(raw: &str) -> ModerationResult<Option<u64>> {
    if is_none(raw) {
        return Ok(None);
    }
    parse_number(raw).map(Some)
}

fn parse_role(raw: &str) -> ModerationResult<Option<RoleId>> {
    if is_none(raw) {
        return Ok(None);
    }
    let digits = raw
        .trim()
        .trim_start_matches("<@&")
        .trim_end_matches('>');
    match digits.parse::<u64>() {
        Ok(id) if id > 0 => Ok(Some(RoleId::new(id))),
        _ => Err(ModerationError::invalid_config(format!(
            "'{raw}' is not a role"
        ))),
    }
}
