//! Spam, raid and banned-phrase detectors
//!
//! Each detector step takes a tracker the caller has already locked, so one
//! step for one subject (record, count, vote, resolve, reset) is atomic.

use crate::moderation::{
    BannedPhraseCounter, BannedPhraseSettings, BannedPhraseTier, DecisionSource,
    PunishmentDecision, PunishmentKind, RaidCategory, RaidConfig, RaidTracker,
    SpamCategory, SpamCategoryConfig, SpamTracker, Voter,
};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, MessageId, UserId};

/// A message as seen by the detectors
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub message_id: MessageId,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub author_is_bot: bool,
    pub content: String,
    /// User and role mentions, plus one for @everyone/@here
    pub mention_count: usize,
    pub image_count: usize,
    pub sent_at: DateTime<Utc>,
}

impl MessageEvent {
    /// Links in the message body
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.content
            .split_whitespace()
            .map(|token| token.trim_matches(|c| matches!(c, '<' | '>' | '(' | ')')))
            .filter(|token| {
                let token = token.to_lowercase();
                token.starts_with("http://")
                    || token.starts_with("https://")
                    || token.starts_with("www.")
                    || token.starts_with("discord.gg/")
            })
            .count()
    }

    /// Whether the message counts towards `category` at the given threshold
    #[must_use]
    pub fn qualifies(&self, category: SpamCategory, threshold: u32) -> bool {
        let threshold = threshold as usize;
        match category {
            SpamCategory::Message => true,
            SpamCategory::LongMessage => self.content.chars().count() >= threshold,
            SpamCategory::Link => self.link_count() >= threshold,
            SpamCategory::Image => self.image_count >= threshold,
            SpamCategory::Mention => self.mention_count >= threshold,
        }
    }
}

/// A member joining the guild
#[derive(Debug, Clone, Copy)]
pub struct JoinEvent {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

/// Result of feeding one qualifying event to a spam tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamOutcome {
    /// Recorded, no rule tripped
    Recorded { instances: usize },
    /// A rule tripped and the subject waits for more votes
    Flagged { votes: usize, required: u32 },
    Punish(PunishmentDecision),
}

/// Result of a moderator report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The category is disabled or the report was not valid
    Ignored,
    /// The subject has not tripped any rule, so there is nothing to vote on
    NotFlagged,
    DuplicateVote { votes: usize, required: u32 },
    Counted { votes: usize, required: u32 },
    Punished(PunishmentDecision),
    /// Votes were reached but the member already stands under something
    /// more severe
    NotApplied(PunishmentDecision),
}

fn conclude_if_reached(
    tracker: &mut SpamTracker,
    category: SpamCategory,
    subject: UserId,
) -> Option<PunishmentDecision> {
    if !tracker.votes_reached() {
        return None;
    }
    let (kind, duration) = tracker.conclude();
    Some(PunishmentDecision::new(
        subject,
        kind,
        duration,
        DecisionSource::Spam(category),
    ))
}

fn flagged(tracker: &SpamTracker) -> SpamOutcome {
    SpamOutcome::Flagged {
        votes: tracker.vote_count(),
        required: tracker.required_votes().unwrap_or_default(),
    }
}

/// Record a qualifying event and evaluate every rule of the category
pub fn observe_spam(
    tracker: &mut SpamTracker,
    category: SpamCategory,
    config: &SpamCategoryConfig,
    subject: UserId,
    at: DateTime<Utc>,
) -> SpamOutcome {
    tracker.record(at);
    if let Some(longest) = config.max_interval() {
        tracker.prune(longest, at);
    }

    let mut instances = 0;
    for rule in &config.rules {
        let count = tracker.count_within(rule.interval(), at);
        instances = instances.max(count);
        if count >= rule.required_instances as usize {
            tracker.flag(rule.required_votes);
            tracker.escalate(rule.punishment, rule.duration());
        }
    }

    if !tracker.is_flagged() {
        return SpamOutcome::Recorded { instances };
    }
    if config.auto_vote {
        tracker.vote(Voter::System);
    }

    match conclude_if_reached(tracker, category, subject) {
        Some(decision) => SpamOutcome::Punish(decision),
        None => flagged(tracker),
    }
}

/// Count a moderator's vote against a flagged subject
pub fn report_spam(
    tracker: &mut SpamTracker,
    category: SpamCategory,
    subject: UserId,
    voter: Voter,
) -> ReportOutcome {
    let Some(required) = tracker.required_votes() else {
        return ReportOutcome::NotFlagged;
    };
    if !tracker.vote(voter) {
        return ReportOutcome::DuplicateVote {
            votes: tracker.vote_count(),
            required,
        };
    }

    let votes = tracker.vote_count();
    match conclude_if_reached(tracker, category, subject) {
        Some(decision) => ReportOutcome::Punished(decision),
        None => ReportOutcome::Counted { votes, required },
    }
}

/// Record a join; once the category's threshold is met every member who
/// joined within the window is punished and the tracker starts over
pub fn observe_join(
    tracker: &RaidTracker,
    category: RaidCategory,
    config: &RaidConfig,
    event: &JoinEvent,
) -> Vec<PunishmentDecision> {
    let window = config.interval();
    let now = event.joined_at;

    tracker.record_join(now, event.user_id);
    tracker.prune(window, now);
    if tracker.count_within(window, now) < config.required_count as usize {
        return Vec::new();
    }

    let members = tracker.members_within(window, now);
    tracker.reset();
    members
        .into_iter()
        .map(|user_id| {
            PunishmentDecision::new(
                user_id,
                config.punishment,
                config.duration(),
                DecisionSource::Raid(category),
            )
        })
        .collect()
}

/// Add a strike in `tier`; punishes and resets the tier when it reaches its limit
pub fn strike_banned_phrase(
    counter: &mut BannedPhraseCounter,
    config: &BannedPhraseSettings,
    subject: UserId,
    tier: BannedPhraseTier,
) -> Option<PunishmentDecision> {
    if counter.strike(tier) < config.strikes_for(tier) {
        return None;
    }
    counter.reset(tier);

    let (kind, duration) = match tier {
        BannedPhraseTier::Role => (PunishmentKind::RoleMute, config.mute_duration()),
        BannedPhraseTier::Kick => (PunishmentKind::Kick, None),
        BannedPhraseTier::Ban => (PunishmentKind::Ban, None),
    };
    Some(PunishmentDecision::new(
        subject,
        kind,
        duration,
        DecisionSource::BannedPhrase(tier),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::SpamRule;
    use chrono::{Duration, TimeZone};

    const SUBJECT: UserId = UserId::new(1);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn rule(interval_secs: u64, required_instances: u32, required_votes: u32) -> SpamRule {
        SpamRule {
            interval_secs,
            required_instances,
            required_votes,
            punishment: PunishmentKind::RoleMute,
            duration_secs: Some(600),
        }
    }

    fn config(auto_vote: bool, rules: Vec<SpamRule>) -> SpamCategoryConfig {
        SpamCategoryConfig {
            enabled: true,
            threshold: 1,
            auto_vote,
            rules,
        }
    }

    fn message(content: &str) -> MessageEvent {
        MessageEvent {
            message_id: MessageId::new(1),
            author_id: SUBJECT,
            channel_id: ChannelId::new(10),
            author_is_bot: false,
            content: content.to_string(),
            mention_count: 0,
            image_count: 0,
            sent_at: t0(),
        }
    }

    #[test]
    fn test_two_votes_punish_on_second_vote() {
        let config = config(false, vec![rule(60, 3, 2)]);
        let mut tracker = SpamTracker::new();

        for i in 0..3 {
            let outcome = observe_spam(
                &mut tracker,
                SpamCategory::Message,
                &config,
                SUBJECT,
                t0() + Duration::seconds(i * 10),
            );
            if i < 2 {
                assert_eq!(outcome, SpamOutcome::Recorded { instances: (i + 1) as usize });
            } else {
                assert_eq!(outcome, SpamOutcome::Flagged { votes: 0, required: 2 });
            }
        }

        let voter_one = Voter::User(UserId::new(101));
        let voter_two = Voter::User(UserId::new(102));
        assert_eq!(
            report_spam(&mut tracker, SpamCategory::Message, SUBJECT, voter_one),
            ReportOutcome::Counted { votes: 1, required: 2 }
        );
        assert_eq!(
            report_spam(&mut tracker, SpamCategory::Message, SUBJECT, voter_one),
            ReportOutcome::DuplicateVote { votes: 1, required: 2 }
        );

        let ReportOutcome::Punished(decision) =
            report_spam(&mut tracker, SpamCategory::Message, SUBJECT, voter_two)
        else {
            panic!("second distinct vote should punish");
        };
        assert_eq!(decision.kind, PunishmentKind::RoleMute);
        assert_eq!(decision.duration, Some(std::time::Duration::from_secs(600)));
        assert!(!tracker.is_flagged());
    }

    #[test]
    fn test_report_before_flag_is_not_counted() {
        let mut tracker = SpamTracker::new();
        assert_eq!(
            report_spam(
                &mut tracker,
                SpamCategory::Mention,
                SUBJECT,
                Voter::User(UserId::new(5))
            ),
            ReportOutcome::NotFlagged
        );
        assert_eq!(tracker.vote_count(), 0);
    }

    #[test]
    fn test_most_lenient_vote_requirement_wins() {
        let mut strict = rule(60, 2, 3);
        strict.punishment = PunishmentKind::Kick;
        strict.duration_secs = None;
        let config = config(true, vec![strict, rule(60, 2, 1)]);
        let mut tracker = SpamTracker::new();

        observe_spam(&mut tracker, SpamCategory::Link, &config, SUBJECT, t0());
        let outcome = observe_spam(
            &mut tracker,
            SpamCategory::Link,
            &config,
            SUBJECT,
            t0() + Duration::seconds(1),
        );

        // the lenient rule's single vote suffices; the strict rule's kick still
        // decides the punishment
        let SpamOutcome::Punish(decision) = outcome else {
            panic!("expected a punishment, got {outcome:?}");
        };
        assert_eq!(decision.kind, PunishmentKind::Kick);
        assert_eq!(decision.duration, None);
    }

    #[test]
    fn test_auto_vote_punishes_immediately() {
        let config = config(true, vec![rule(5, 3, 1)]);
        let mut tracker = SpamTracker::new();

        let outcomes: Vec<_> = (0..3)
            .map(|i| {
                observe_spam(
                    &mut tracker,
                    SpamCategory::Message,
                    &config,
                    SUBJECT,
                    t0() + Duration::seconds(i),
                )
            })
            .collect();

        assert!(matches!(outcomes[2], SpamOutcome::Punish(_)));
        assert_eq!(tracker.count_within(Duration::seconds(60), t0()), 0);
    }

    #[test]
    fn test_events_outside_the_window_do_not_count() {
        let config = config(true, vec![rule(5, 3, 1)]);
        let mut tracker = SpamTracker::new();

        for i in 0..5 {
            let outcome = observe_spam(
                &mut tracker,
                SpamCategory::Message,
                &config,
                SUBJECT,
                t0() + Duration::seconds(i * 10),
            );
            assert_eq!(outcome, SpamOutcome::Recorded { instances: 1 });
        }
    }

    #[test]
    fn test_repeat_kick_becomes_kick_then_ban() {
        let mut kick = rule(60, 1, 1);
        kick.punishment = PunishmentKind::Kick;
        kick.duration_secs = None;
        let config = config(true, vec![kick]);
        let mut tracker = SpamTracker::new();

        let first = observe_spam(&mut tracker, SpamCategory::Mention, &config, SUBJECT, t0());
        let second = observe_spam(
            &mut tracker,
            SpamCategory::Mention,
            &config,
            SUBJECT,
            t0() + Duration::minutes(30),
        );

        let (SpamOutcome::Punish(first), SpamOutcome::Punish(second)) = (first, second) else {
            panic!("both cycles should punish");
        };
        assert_eq!(first.kind, PunishmentKind::Kick);
        assert_eq!(second.kind, PunishmentKind::KickThenBan);
    }

    #[test]
    fn test_raid_punishes_everyone_in_window() {
        let config = RaidConfig {
            enabled: true,
            interval_secs: 10,
            required_count: 3,
            punishment: PunishmentKind::Kick,
            duration_secs: None,
        };
        let tracker = RaidTracker::new();
        let join = |id: u64, secs: i64| JoinEvent {
            user_id: UserId::new(id),
            joined_at: t0() + Duration::seconds(secs),
        };

        assert!(observe_join(&tracker, RaidCategory::RapidJoin, &config, &join(1, 0)).is_empty());
        // the first join has left the window by now
        assert!(observe_join(&tracker, RaidCategory::RapidJoin, &config, &join(2, 20)).is_empty());
        assert!(observe_join(&tracker, RaidCategory::RapidJoin, &config, &join(3, 22)).is_empty());

        let decisions = observe_join(&tracker, RaidCategory::RapidJoin, &config, &join(4, 25));
        let punished: Vec<_> = decisions.iter().map(|d| d.subject.get()).collect();
        assert_eq!(punished, vec![2, 3, 4]);
        assert!(
            decisions
                .iter()
                .all(|d| d.source == DecisionSource::Raid(RaidCategory::RapidJoin))
        );

        assert!(observe_join(&tracker, RaidCategory::RapidJoin, &config, &join(5, 26)).is_empty());
    }

    #[test]
    fn test_banned_phrase_tiers() {
        let config = BannedPhraseSettings {
            enabled: true,
            role_strikes: 2,
            kick_strikes: 3,
            ban_strikes: 1,
            ..BannedPhraseSettings::default()
        };
        let mut counter = BannedPhraseCounter::default();

        assert!(strike_banned_phrase(&mut counter, &config, SUBJECT, BannedPhraseTier::Role).is_none());
        let mute = strike_banned_phrase(&mut counter, &config, SUBJECT, BannedPhraseTier::Role);
        assert_eq!(mute.map(|d| d.kind), Some(PunishmentKind::RoleMute));
        assert_eq!(counter.count(BannedPhraseTier::Role), 0);

        let ban = strike_banned_phrase(&mut counter, &config, SUBJECT, BannedPhraseTier::Ban);
        assert_eq!(ban.map(|d| d.kind), Some(PunishmentKind::Ban));
    }

    #[test]
    fn test_message_qualification() {
        let mut event = message("see https://example.com and <http://other.example> or www.x.io");
        assert_eq!(event.link_count(), 3);
        assert!(event.qualifies(SpamCategory::Link, 3));
        assert!(!event.qualifies(SpamCategory::Link, 4));
        assert!(event.qualifies(SpamCategory::Message, 100));

        event.mention_count = 5;
        event.image_count = 1;
        assert!(event.qualifies(SpamCategory::Mention, 5));
        assert!(!event.qualifies(SpamCategory::Image, 2));
        assert!(!event.qualifies(SpamCategory::LongMessage, 1500));
    }
}
