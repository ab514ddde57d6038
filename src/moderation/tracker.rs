//! Detector state
//!
//! Trackers hold what a detector remembers about one subject (spam), one
//! category (raids) or one member's banned-phrase strikes. They carry no
//! configuration; the detector functions pass it in.

use crate::moderation::{BannedPhraseTier, Escalation, PunishmentKind, WindowedCounter};
use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::UserId;
use std::collections::HashSet;

/// Who cast a vote against a flagged subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voter {
    /// The detector itself
    System,
    User(UserId),
}

/// Spam state for one user in one category
#[derive(Debug, Default)]
pub struct SpamTracker {
    events: WindowedCounter,
    required_votes: Option<u32>,
    voters: HashSet<Voter>,
    escalation: Escalation,
    already_kicked: bool,
}

impl SpamTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, at: DateTime<Utc>) {
        self.events.record(at);
    }

    #[must_use]
    pub fn count_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.events.count_within(window, now)
    }

    pub fn prune(&self, window: Duration, now: DateTime<Utc>) {
        self.events.prune_older_than(window, now);
    }

    /// Prune to `window` and report whether the tracker holds nothing worth
    /// keeping: no events, no flag and no earlier kick
    pub fn is_idle(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.events.prune_older_than(window, now);
        self.events.is_empty() && !self.is_flagged() && !self.already_kicked
    }

    /// Mark the subject punishable; the vote threshold only ever goes down
    pub fn flag(&mut self, required_votes: u32) {
        self.required_votes = Some(
            self.required_votes
                .map_or(required_votes, |current| current.min(required_votes)),
        );
    }

    #[must_use]
    pub const fn is_flagged(&self) -> bool {
        self.required_votes.is_some()
    }

    #[must_use]
    pub const fn required_votes(&self) -> Option<u32> {
        self.required_votes
    }

    /// Record a vote; returns false if this voter already voted
    pub fn vote(&mut self, voter: Voter) -> bool {
        self.voters.insert(voter)
    }

    #[must_use]
    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }

    #[must_use]
    pub fn votes_reached(&self) -> bool {
        self.required_votes
            .is_some_and(|required| self.voters.len() >= required as usize)
    }

    /// Raise the pending punishment
    pub fn escalate(&mut self, candidate: PunishmentKind, duration: Option<std::time::Duration>) {
        self.escalation.raise(candidate, duration);
    }

    #[must_use]
    pub const fn pending(&self) -> &Escalation {
        &self.escalation
    }

    #[must_use]
    pub const fn already_kicked(&self) -> bool {
        self.already_kicked
    }

    /// Take the resolved punishment and reset.
    ///
    /// A kick turns into kick-then-ban once this tracker has kicked the subject
    /// before.
    pub fn conclude(&mut self) -> (PunishmentKind, Option<std::time::Duration>) {
        let mut kind = self.escalation.kind();
        let duration = self.escalation.duration();

        if matches!(kind, PunishmentKind::Kick | PunishmentKind::KickThenBan) {
            kind = if self.already_kicked {
                PunishmentKind::KickThenBan
            } else {
                PunishmentKind::Kick
            };
            self.already_kicked = true;
        }

        self.reset();
        (kind, duration.filter(|_| kind.is_reversible()))
    }

    /// Clear events, votes and the pending punishment. The kicked flag stays.
    pub fn reset(&mut self) {
        self.events.clear();
        self.required_votes = None;
        self.voters.clear();
        self.escalation.clear();
    }
}

/// Join state for one raid category
#[derive(Debug, Default)]
pub struct RaidTracker {
    joins: WindowedCounter<UserId>,
}

impl RaidTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_join(&self, at: DateTime<Utc>, user_id: UserId) {
        self.joins.record_with(at, user_id);
    }

    #[must_use]
    pub fn count_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.joins.count_within(window, now)
    }

    /// Distinct members who joined within `window`, in join order
    #[must_use]
    pub fn members_within(&self, window: Duration, now: DateTime<Utc>) -> Vec<UserId> {
        let mut seen = HashSet::new();
        self.joins
            .values_within(window, now)
            .into_iter()
            .filter(|user_id| seen.insert(*user_id))
            .collect()
    }

    pub fn prune(&self, window: Duration, now: DateTime<Utc>) {
        self.joins.prune_older_than(window, now);
    }

    pub fn reset(&self) {
        self.joins.clear();
    }
}

/// Banned-phrase strikes for one member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BannedPhraseCounter {
    role: u32,
    kick: u32,
    ban: u32,
}

impl BannedPhraseCounter {
    /// Add a strike, returning the tier's new count
    pub fn strike(&mut self, tier: BannedPhraseTier) -> u32 {
        let count = self.slot(tier);
        *count = count.saturating_add(1);
        *count
    }

    #[must_use]
    pub const fn count(&self, tier: BannedPhraseTier) -> u32 {
        match tier {
            BannedPhraseTier::Role => self.role,
            BannedPhraseTier::Kick => self.kick,
            BannedPhraseTier::Ban => self.ban,
        }
    }

    pub fn reset(&mut self, tier: BannedPhraseTier) {
        *self.slot(tier) = 0;
    }

    /// No strikes in any tier
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.role == 0 && self.kick == 0 && self.ban == 0
    }

    fn slot(&mut self, tier: BannedPhraseTier) -> &mut u32 {
        match tier {
            BannedPhraseTier::Role => &mut self.role,
            BannedPhraseTier::Kick => &mut self.kick,
            BannedPhraseTier::Ban => &mut self.ban,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_required_votes_only_shrink() {
        let mut tracker = SpamTracker::new();
        assert!(!tracker.is_flagged());

        tracker.flag(3);
        tracker.flag(5);
        assert_eq!(tracker.required_votes(), Some(3));
        tracker.flag(2);
        assert_eq!(tracker.required_votes(), Some(2));
    }

    #[test]
    fn test_duplicate_votes_do_not_count() {
        let mut tracker = SpamTracker::new();
        tracker.flag(2);

        assert!(tracker.vote(Voter::User(UserId::new(7))));
        assert!(!tracker.vote(Voter::User(UserId::new(7))));
        assert!(!tracker.votes_reached());

        assert!(tracker.vote(Voter::System));
        assert!(!tracker.vote(Voter::System));
        assert_eq!(tracker.vote_count(), 2);
        assert!(tracker.votes_reached());
    }

    #[test]
    fn test_sticky_kick_survives_reset() {
        let mut tracker = SpamTracker::new();
        tracker.record(t0());
        tracker.flag(1);
        tracker.escalate(PunishmentKind::Kick, None);

        assert_eq!(tracker.conclude(), (PunishmentKind::Kick, None));
        assert!(tracker.already_kicked());
        assert!(!tracker.is_flagged());
        assert_eq!(tracker.count_within(Duration::seconds(60), t0()), 0);
        assert_eq!(tracker.pending().kind(), PunishmentKind::Nothing);

        tracker.reset();
        assert!(tracker.already_kicked());

        tracker.flag(1);
        tracker.escalate(PunishmentKind::Kick, None);
        assert_eq!(tracker.conclude(), (PunishmentKind::KickThenBan, None));
    }

    #[test]
    fn test_conclude_keeps_duration_for_reversible_kinds() {
        let ten_minutes = Some(std::time::Duration::from_secs(600));
        let mut tracker = SpamTracker::new();
        tracker.flag(1);
        tracker.escalate(PunishmentKind::RoleMute, ten_minutes);
        tracker.escalate(PunishmentKind::Nothing, None);

        assert_eq!(tracker.conclude(), (PunishmentKind::RoleMute, ten_minutes));
        assert!(!tracker.already_kicked());
    }

    #[test]
    fn test_idle_trackers() {
        let window = Duration::seconds(60);
        let tracker = SpamTracker::new();
        tracker.record(t0());
        assert!(!tracker.is_idle(window, t0() + Duration::seconds(30)));
        assert!(tracker.is_idle(window, t0() + Duration::minutes(5)));

        let mut flagged = SpamTracker::new();
        flagged.flag(2);
        assert!(!flagged.is_idle(window, t0()));

        let mut kicked = SpamTracker::new();
        kicked.flag(1);
        kicked.escalate(PunishmentKind::Kick, None);
        kicked.conclude();
        assert!(!kicked.is_idle(window, t0()));
    }

    #[test]
    fn test_raid_members_are_distinct() {
        let tracker = RaidTracker::new();
        let alice = UserId::new(1);
        let bob = UserId::new(2);

        tracker.record_join(t0(), alice);
        tracker.record_join(t0() + Duration::seconds(1), bob);
        tracker.record_join(t0() + Duration::seconds(2), alice);

        let now = t0() + Duration::seconds(2);
        assert_eq!(tracker.count_within(Duration::seconds(10), now), 3);
        assert_eq!(tracker.members_within(Duration::seconds(10), now), vec![alice, bob]);

        tracker.reset();
        assert_eq!(tracker.count_within(Duration::seconds(10), now), 0);
    }

    #[test]
    fn test_phrase_tiers_are_independent() {
        let mut counter = BannedPhraseCounter::default();
        assert_eq!(counter.strike(BannedPhraseTier::Role), 1);
        assert_eq!(counter.strike(BannedPhraseTier::Role), 2);
        assert_eq!(counter.strike(BannedPhraseTier::Ban), 1);

        counter.reset(BannedPhraseTier::Role);
        assert_eq!(counter.count(BannedPhraseTier::Role), 0);
        assert_eq!(counter.count(BannedPhraseTier::Ban), 1);
        assert_eq!(counter.count(BannedPhraseTier::Kick), 0);
        assert!(!counter.is_clear());

        counter.reset(BannedPhraseTier::Ban);
        assert!(counter.is_clear());
    }
}
