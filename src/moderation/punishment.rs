//! Punishment kinds and escalation
//!
//! Punishments form a total order. Every detector only ever moves a pending
//! punishment forward along that order, never back.

use crate::moderation::{BannedPhraseTier, ModerationError, RaidCategory, SpamCategory};
use derive_more::Display;
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use std::time::Duration;

/// Punishment kinds, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
pub enum PunishmentKind {
    #[default]
    #[display("Nothing")]
    Nothing,
    #[display("Role Mute")]
    RoleMute,
    #[display("Deafen")]
    Deafen,
    #[display("Voice Mute")]
    VoiceMute,
    #[display("Kick")]
    Kick,
    #[display("Kick Then Ban")]
    KickThenBan,
    #[display("Ban")]
    Ban,
}

impl PunishmentKind {
    /// Every kind in severity order
    pub const ALL: [Self; 7] = [
        Self::Nothing,
        Self::RoleMute,
        Self::Deafen,
        Self::VoiceMute,
        Self::Kick,
        Self::KickThenBan,
        Self::Ban,
    ];

    /// The more severe of `self` and `candidate`
    #[must_use]
    pub fn escalate(self, candidate: Self) -> Self {
        self.max(candidate)
    }

    /// Whether the punishment can be lifted again, and so may carry a duration
    #[must_use]
    pub const fn is_reversible(self) -> bool {
        matches!(
            self,
            Self::RoleMute | Self::Deafen | Self::VoiceMute | Self::Ban
        )
    }
}

impl FromStr for PunishmentKind {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "nothing" | "none" => Ok(Self::Nothing),
            "rolemute" | "mute" => Ok(Self::RoleMute),
            "deafen" => Ok(Self::Deafen),
            "voicemute" => Ok(Self::VoiceMute),
            "kick" => Ok(Self::Kick),
            "kickthenban" => Ok(Self::KickThenBan),
            "ban" => Ok(Self::Ban),
            _ => Err(ModerationError::invalid_config(format!(
                "unknown punishment '{s}'"
            ))),
        }
    }
}

/// The longer of two punishment durations, where `None` means permanent
pub(crate) fn longer(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

/// A pending punishment that only ever moves towards more severe kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Escalation {
    kind: PunishmentKind,
    duration: Option<Duration>,
}

impl Escalation {
    /// Create an escalation resolved to `Nothing`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently resolved kind
    #[must_use]
    pub const fn kind(&self) -> PunishmentKind {
        self.kind
    }

    /// The duration attached to the resolved kind
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Raise the pending punishment towards `candidate`.
    ///
    /// A strictly more severe candidate replaces the kind and its duration. An
    /// equally severe candidate keeps the longer duration. Returns whether the
    /// kind changed.
    pub fn raise(&mut self, candidate: PunishmentKind, duration: Option<Duration>) -> bool {
        match candidate.cmp(&self.kind) {
            Ordering::Greater => {
                self.kind = candidate;
                self.duration = duration;
                true
            }
            Ordering::Equal => {
                self.duration = longer(self.duration, duration);
                false
            }
            Ordering::Less => false,
        }
    }

    /// Back to `Nothing`
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Who a punishment is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PunishmentTarget {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Role used for `RoleMute`, if the guild configured one
    pub mute_role: Option<RoleId>,
}

/// Which detector produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DecisionSource {
    #[display("{_0} spam")]
    Spam(SpamCategory),
    #[display("{_0} raid")]
    Raid(RaidCategory),
    #[display("{_0}-tier banned phrase")]
    BannedPhrase(BannedPhraseTier),
}

/// A punishment the engine decided to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentDecision {
    pub subject: UserId,
    pub kind: PunishmentKind,
    pub duration: Option<Duration>,
    pub reason: String,
    pub source: DecisionSource,
}

impl PunishmentDecision {
    /// Create a decision with a reason derived from its source
    #[must_use]
    pub fn new(
        subject: UserId,
        kind: PunishmentKind,
        duration: Option<Duration>,
        source: DecisionSource,
    ) -> Self {
        Self {
            subject,
            kind,
            duration: duration.filter(|_| kind.is_reversible()),
            reason: format!("Automatic moderation: {source}"),
            source,
        }
    }

    /// Whether there is anything for the applier to do
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.kind != PunishmentKind::Nothing
    }
}

/// Collapse decisions so each subject keeps only its most severe one
#[must_use]
pub fn merge_decisions(decisions: Vec<PunishmentDecision>) -> Vec<PunishmentDecision> {
    let mut merged: Vec<PunishmentDecision> = Vec::with_capacity(decisions.len());
    for decision in decisions {
        match merged.iter_mut().find(|d| d.subject == decision.subject) {
            Some(existing) => match decision.kind.cmp(&existing.kind) {
                Ordering::Greater => *existing = decision,
                Ordering::Equal => {
                    existing.duration = longer(existing.duration, decision.duration);
                }
                Ordering::Less => {}
            },
            None => merged.push(decision),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        for pair in PunishmentKind::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
        assert_eq!(PunishmentKind::default(), PunishmentKind::Nothing);
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let candidates = [
            PunishmentKind::Kick,
            PunishmentKind::RoleMute,
            PunishmentKind::Nothing,
            PunishmentKind::Ban,
            PunishmentKind::Deafen,
            PunishmentKind::KickThenBan,
        ];

        let mut resolved = PunishmentKind::Nothing;
        for candidate in candidates {
            let next = resolved.escalate(candidate);
            assert!(next >= resolved);
            assert!(next >= candidate);
            resolved = next;
        }
        assert_eq!(resolved, PunishmentKind::Ban);
    }

    #[test]
    fn test_escalation_raise_durations() {
        let ten = Some(Duration::from_secs(600));
        let thirty = Some(Duration::from_secs(1800));

        let mut escalation = Escalation::new();
        assert!(escalation.raise(PunishmentKind::RoleMute, ten));
        assert!(!escalation.raise(PunishmentKind::RoleMute, thirty));
        assert_eq!(escalation.duration(), thirty);

        assert!(!escalation.raise(PunishmentKind::Nothing, None));
        assert_eq!(escalation.kind(), PunishmentKind::RoleMute);

        assert!(escalation.raise(PunishmentKind::Ban, ten));
        assert_eq!(escalation.kind(), PunishmentKind::Ban);
        assert_eq!(escalation.duration(), ten);

        // a permanent ban outranks a temporary one of the same kind
        escalation.raise(PunishmentKind::Ban, None);
        assert_eq!(escalation.duration(), None);

        escalation.clear();
        assert_eq!(escalation, Escalation::new());
    }

    #[test]
    fn test_reversible_kinds() {
        assert!(PunishmentKind::RoleMute.is_reversible());
        assert!(PunishmentKind::Ban.is_reversible());
        assert!(!PunishmentKind::Kick.is_reversible());
        assert!(!PunishmentKind::KickThenBan.is_reversible());
        assert!(!PunishmentKind::Nothing.is_reversible());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            "role-mute".parse::<PunishmentKind>().ok(),
            Some(PunishmentKind::RoleMute)
        );
        assert_eq!(
            "Kick Then Ban".parse::<PunishmentKind>().ok(),
            Some(PunishmentKind::KickThenBan)
        );
        assert_eq!(
            "VOICE_MUTE".parse::<PunishmentKind>().ok(),
            Some(PunishmentKind::VoiceMute)
        );
        assert!("yeet".parse::<PunishmentKind>().is_err());
    }

    #[test]
    fn test_decision_drops_duration_for_permanent_kinds() {
        let decision = PunishmentDecision::new(
            UserId::new(1),
            PunishmentKind::Kick,
            Some(Duration::from_secs(60)),
            DecisionSource::Spam(SpamCategory::Mention),
        );
        assert_eq!(decision.duration, None);
        assert_eq!(decision.reason, "Automatic moderation: Mention spam");
        assert!(decision.is_actionable());
    }

    #[test]
    fn test_merge_keeps_most_severe_per_subject() {
        let alice = UserId::new(1);
        let bob = UserId::new(2);
        let source = DecisionSource::Spam(SpamCategory::Message);

        let merged = merge_decisions(vec![
            PunishmentDecision::new(alice, PunishmentKind::RoleMute, Some(Duration::from_secs(60)), source),
            PunishmentDecision::new(bob, PunishmentKind::RoleMute, Some(Duration::from_secs(60)), source),
            PunishmentDecision::new(alice, PunishmentKind::Kick, None, source),
            PunishmentDecision::new(bob, PunishmentKind::RoleMute, Some(Duration::from_secs(300)), source),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].subject, alice);
        assert_eq!(merged[0].kind, PunishmentKind::Kick);
        assert_eq!(merged[1].subject, bob);
        assert_eq!(merged[1].duration, Some(Duration::from_secs(300)));
    }
}
