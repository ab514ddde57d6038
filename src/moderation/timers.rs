//! Expiry scheduler
//!
//! Holds one guild's pending punishment reversals and prompt expiries, sorted
//! by deadline, and fires them from a single background waiter task.

use crate::MODERATION_TARGET;
use crate::moderation::{PunishmentKind, PunishmentTarget};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// What happens when an entry expires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryPayload {
    ReversePunishment {
        target: PunishmentTarget,
        kind: PunishmentKind,
        reason: String,
    },
    ClosePrompt {
        prompt_id: u64,
    },
}

impl ExpiryPayload {
    #[must_use]
    pub const fn kind(&self) -> ExpiryKind {
        match self {
            Self::ReversePunishment { .. } => ExpiryKind::ReversePunishment,
            Self::ClosePrompt { .. } => ExpiryKind::ClosePrompt,
        }
    }

    /// Identity of the entry; scheduling the same key twice replaces the first
    #[must_use]
    pub const fn key(&self) -> ExpiryKey {
        match self {
            Self::ReversePunishment { target, kind, .. } => ExpiryKey::Punishment {
                user_id: target.user_id,
                kind: *kind,
            },
            Self::ClosePrompt { prompt_id } => ExpiryKey::Prompt(*prompt_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryKind {
    ReversePunishment,
    ClosePrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryKey {
    Punishment { user_id: UserId, kind: PunishmentKind },
    Prompt(u64),
}

/// A pending expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledExpiry {
    pub id: Uuid,
    pub guild_id: GuildId,
    pub payload: ExpiryPayload,
    pub created_at: DateTime<Utc>,
    /// Wall-clock due time
    pub due_at: DateTime<Utc>,
    deadline: Instant,
}

impl ScheduledExpiry {
    #[must_use]
    pub const fn key(&self) -> ExpiryKey {
        self.payload.key()
    }

    #[must_use]
    pub const fn kind(&self) -> ExpiryKind {
        self.payload.kind()
    }

    /// Monotonic deadline the waiter sleeps towards
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Receives entries once they are due
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    /// Handle a due entry. Failures are the handler's to log; the entry is
    /// gone either way.
    async fn on_expired(&self, entry: ScheduledExpiry);
}

#[derive(Debug, Default)]
struct ExpiryQueue {
    by_deadline: BTreeMap<(Instant, Uuid), ScheduledExpiry>,
    by_key: HashMap<ExpiryKey, (Instant, Uuid)>,
}

impl ExpiryQueue {
    /// Insert, replacing any entry with the same key. Returns the replaced
    /// entry and whether the new one is now the earliest.
    fn insert(&mut self, entry: ScheduledExpiry) -> (Option<ScheduledExpiry>, bool) {
        let replaced = self.remove(&entry.key());
        let is_new_head = self
            .next_deadline()
            .is_none_or(|head| entry.deadline < head);

        let slot = (entry.deadline, entry.id);
        self.by_key.insert(entry.key(), slot);
        self.by_deadline.insert(slot, entry);
        (replaced, is_new_head)
    }

    fn deadline_of(&self, key: &ExpiryKey) -> Option<Instant> {
        self.by_key.get(key).map(|(deadline, _)| *deadline)
    }

    fn remove(&mut self, key: &ExpiryKey) -> Option<ScheduledExpiry> {
        let slot = self.by_key.remove(key)?;
        self.by_deadline.remove(&slot)
    }

    fn pop_due(&mut self, now: Instant) -> Vec<ScheduledExpiry> {
        let mut due = Vec::new();
        while let Some(first) = self.by_deadline.first_entry() {
            if first.key().0 > now {
                break;
            }
            let entry = first.remove();
            self.by_key.remove(&entry.key());
            due.push(entry);
        }
        due
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }
}

enum SchedulerRequest {
    /// The earliest deadline may have changed
    Rescan,
    Shutdown,
}

fn lock(queue: &Mutex<ExpiryQueue>) -> MutexGuard<'_, ExpiryQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One guild's partition of the expiry scheduler
#[derive(Clone)]
pub struct ExpiryScheduler {
    guild_id: GuildId,
    queue: Arc<Mutex<ExpiryQueue>>,
    tx: UnboundedSender<SchedulerRequest>,
}

impl ExpiryScheduler {
    /// Create the partition and spawn its waiter task.
    ///
    /// The waiter stops on `shutdown` or once every handle is dropped.
    pub fn spawn(guild_id: GuildId, handler: Arc<dyn ExpiryHandler>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(ExpiryQueue::default()));

        tokio::spawn(run_waiter(guild_id, Arc::clone(&queue), handler, rx));

        Self {
            guild_id,
            queue,
            tx,
        }
    }

    /// Schedule `payload` to expire after `delay`
    pub fn schedule(&self, payload: ExpiryPayload, delay: Duration) -> ScheduledExpiry {
        let entry = self.entry(payload, delay);
        self.push(entry.clone(), false);
        entry
    }

    /// Like [`schedule`](Self::schedule), but an entry already pending for
    /// the same key with a later deadline is kept. Returns the new entry, or
    /// `None` when the pending one stays.
    pub fn extend(&self, payload: ExpiryPayload, delay: Duration) -> Option<ScheduledExpiry> {
        self.push(self.entry(payload, delay), true)
    }

    fn entry(&self, payload: ExpiryPayload, delay: Duration) -> ScheduledExpiry {
        let now = Utc::now();
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        ScheduledExpiry {
            id: Uuid::new_v4(),
            guild_id: self.guild_id,
            payload,
            created_at: now,
            due_at,
            deadline: deadline_after(delay),
        }
    }

    fn push(&self, entry: ScheduledExpiry, keep_later: bool) -> Option<ScheduledExpiry> {
        let (replaced, is_new_head) = {
            let mut queue = lock(&self.queue);
            let pending = queue.deadline_of(&entry.key());
            if keep_later && pending.is_some_and(|deadline| deadline >= entry.deadline) {
                debug!(
                    target: MODERATION_TARGET,
                    guild_id = %self.guild_id,
                    kind = ?entry.kind(),
                    "Kept later pending expiry"
                );
                return None;
            }
            queue.insert(entry.clone())
        };

        if let Some(replaced) = replaced {
            debug!(
                target: MODERATION_TARGET,
                guild_id = %self.guild_id,
                expiry_id = %replaced.id,
                "Replaced pending expiry"
            );
        }
        if is_new_head {
            let _ = self.tx.send(SchedulerRequest::Rescan);
        }

        debug!(
            target: MODERATION_TARGET,
            guild_id = %self.guild_id,
            expiry_id = %entry.id,
            kind = ?entry.kind(),
            due_at = %entry.due_at,
            "Scheduled expiry"
        );
        Some(entry)
    }

    /// Schedule `payload` for a wall-clock time; past times fire right away
    pub fn schedule_at(&self, payload: ExpiryPayload, due_at: DateTime<Utc>) -> ScheduledExpiry {
        let delay = (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.schedule(payload, delay)
    }

    /// Remove a pending entry. Entries already handed to the waiter stay fired.
    pub fn cancel(&self, key: &ExpiryKey) -> Option<ScheduledExpiry> {
        let cancelled = lock(&self.queue).remove(key);
        if let Some(entry) = &cancelled {
            debug!(
                target: MODERATION_TARGET,
                guild_id = %self.guild_id,
                expiry_id = %entry.id,
                "Cancelled expiry"
            );
        }
        cancelled
    }

    /// Remove `entry` only if it is still the one pending under its key
    pub fn cancel_entry(&self, entry: &ScheduledExpiry) -> bool {
        let key = entry.key();
        let mut queue = lock(&self.queue);
        if queue.by_key.get(&key).is_none_or(|slot| slot.1 != entry.id) {
            return false;
        }
        queue.remove(&key);
        debug!(
            target: MODERATION_TARGET,
            guild_id = %self.guild_id,
            expiry_id = %entry.id,
            "Cancelled expiry"
        );
        true
    }

    /// Remove every pending punishment reversal for `user_id`
    pub fn cancel_for_user(&self, user_id: UserId) -> Vec<ScheduledExpiry> {
        let mut queue = lock(&self.queue);
        let keys: Vec<ExpiryKey> = queue
            .by_key
            .keys()
            .filter(|key| matches!(key, ExpiryKey::Punishment { user_id: id, .. } if *id == user_id))
            .copied()
            .collect();
        keys.iter().filter_map(|key| queue.remove(key)).collect()
    }

    #[must_use]
    pub fn get(&self, key: &ExpiryKey) -> Option<ScheduledExpiry> {
        let queue = lock(&self.queue);
        queue
            .by_key
            .get(key)
            .and_then(|slot| queue.by_deadline.get(slot))
            .cloned()
    }

    /// Pending entries, earliest first
    #[must_use]
    pub fn pending(&self) -> Vec<ScheduledExpiry> {
        lock(&self.queue).by_deadline.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.queue).by_deadline.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).by_deadline.is_empty()
    }

    /// Stop the waiter; pending entries never fire
    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerRequest::Shutdown);
    }
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_waiter(
    guild_id: GuildId,
    queue: Arc<Mutex<ExpiryQueue>>,
    handler: Arc<dyn ExpiryHandler>,
    mut rx: UnboundedReceiver<SchedulerRequest>,
) {
    debug!(target: MODERATION_TARGET, guild_id = %guild_id, "Expiry waiter started");

    loop {
        let next = lock(&queue).next_deadline();

        tokio::select! {
            request = rx.recv() => match request {
                Some(SchedulerRequest::Rescan) => {}
                Some(SchedulerRequest::Shutdown) | None => break,
            },
            () = sleep_until(next) => {
                let due = lock(&queue).pop_due(Instant::now());
                for entry in due {
                    info!(
                        target: MODERATION_TARGET,
                        guild_id = %guild_id,
                        expiry_id = %entry.id,
                        kind = ?entry.kind(),
                        "Expiry due"
                    );
                    handler.on_expired(entry).await;
                }
            }
        }
    }

    debug!(target: MODERATION_TARGET, guild_id = %guild_id, "Expiry waiter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(1);

    struct Recorder(UnboundedSender<(Instant, ScheduledExpiry)>);

    #[async_trait]
    impl ExpiryHandler for Recorder {
        async fn on_expired(&self, entry: ScheduledExpiry) {
            let _ = self.0.send((Instant::now(), entry));
        }
    }

    fn recorder() -> (
        Arc<dyn ExpiryHandler>,
        UnboundedReceiver<(Instant, ScheduledExpiry)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    fn reversal(user: u64) -> ExpiryPayload {
        ExpiryPayload::ReversePunishment {
            target: PunishmentTarget {
                guild_id: GUILD,
                user_id: UserId::new(user),
                mute_role: None,
            },
            kind: PunishmentKind::RoleMute,
            reason: "mute expired".to_string(),
        }
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_or_after_due_time() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        let entry = scheduler.schedule(reversal(7), minutes(30));
        tokio::time::sleep(minutes(29)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(minutes(2)).await;
        let (at, fired_entry) = fired.try_recv().expect("entry should have fired");
        assert!(at >= entry.deadline());
        assert_eq!(fired_entry.id, entry.id);
        assert!(scheduler.is_empty());

        tokio::time::sleep(minutes(60)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_entry_never_fires() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        let entry = scheduler.schedule(reversal(7), minutes(30));
        tokio::time::sleep(minutes(10)).await;
        assert_eq!(scheduler.cancel(&entry.key()).map(|e| e.id), Some(entry.id));
        assert!(scheduler.cancel(&entry.key()).is_none());

        tokio::time::sleep(minutes(30)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_entry_wakes_the_waiter() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        scheduler.schedule(reversal(1), minutes(60));
        tokio::task::yield_now().await;
        let early = scheduler.schedule(ExpiryPayload::ClosePrompt { prompt_id: 9 }, minutes(1));

        tokio::time::sleep(minutes(2)).await;
        let (_, first) = fired.try_recv().expect("early entry should have fired");
        assert_eq!(first.id, early.id);
        assert_eq!(first.kind(), ExpiryKind::ClosePrompt);
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_a_key_replaces_it() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        scheduler.schedule(reversal(7), minutes(10));
        let extended = scheduler.schedule(reversal(7), minutes(20));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(minutes(15)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(minutes(10)).await;
        let (_, entry) = fired.try_recv().expect("extended entry should have fired");
        assert_eq!(entry.id, extended.id);
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_keeps_the_later_deadline() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        let long = scheduler.schedule(reversal(7), minutes(30));
        assert!(scheduler.extend(reversal(7), minutes(5)).is_none());
        assert!(scheduler.extend(reversal(7), minutes(30)).is_none());
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(minutes(10)).await;
        assert!(fired.try_recv().is_err());

        let longer = scheduler
            .extend(reversal(7), minutes(60))
            .expect("a later deadline should replace the entry");
        assert_ne!(longer.id, long.id);

        tokio::time::sleep(minutes(25)).await;
        assert!(fired.try_recv().is_err());
        tokio::time::sleep(minutes(40)).await;
        let (_, entry) = fired.try_recv().expect("extended entry should have fired");
        assert_eq!(entry.id, longer.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_entry_spares_a_replacement() {
        let (handler, _fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        let first = scheduler.schedule(reversal(7), minutes(10));
        let second = scheduler.schedule(reversal(7), minutes(20));
        assert!(!scheduler.cancel_entry(&first));
        assert_eq!(scheduler.get(&second.key()).map(|e| e.id), Some(second.id));

        assert!(scheduler.cancel_entry(&second));
        assert!(!scheduler.cancel_entry(&second));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_for_user_keeps_other_entries() {
        let (handler, _fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        scheduler.schedule(reversal(7), minutes(10));
        let mut ban = reversal(7);
        if let ExpiryPayload::ReversePunishment { kind, .. } = &mut ban {
            *kind = PunishmentKind::Ban;
        }
        scheduler.schedule(ban, minutes(20));
        scheduler.schedule(reversal(8), minutes(10));
        scheduler.schedule(ExpiryPayload::ClosePrompt { prompt_id: 7 }, minutes(10));

        assert_eq!(scheduler.cancel_for_user(UserId::new(7)).len(), 2);
        assert_eq!(scheduler.len(), 2);
        assert!(
            scheduler
                .get(&ExpiryKey::Punishment {
                    user_id: UserId::new(8),
                    kind: PunishmentKind::RoleMute
                })
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_due_times_fire_immediately() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        scheduler.schedule_at(reversal(7), Utc::now() - chrono::Duration::minutes(5));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(fired.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_firing() {
        let (handler, mut fired) = recorder();
        let scheduler = ExpiryScheduler::spawn(GUILD, handler);

        scheduler.schedule(reversal(7), minutes(5));
        scheduler.shutdown();
        tokio::time::sleep(minutes(10)).await;
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_handler_receives_entry() {
        let mut handler = MockExpiryHandler::new();
        handler
            .expect_on_expired()
            .withf(|entry| entry.key() == ExpiryKey::Prompt(3))
            .times(1)
            .returning(|_| ());
        let scheduler = ExpiryScheduler::spawn(GUILD, Arc::new(handler));

        scheduler.schedule(ExpiryPayload::ClosePrompt { prompt_id: 3 }, minutes(1));
        tokio::time::sleep(minutes(2)).await;
        scheduler.shutdown();
        tokio::task::yield_now().await;
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_queue_pops_in_deadline_order() {
        let mut queue = ExpiryQueue::default();
        let now = Instant::now();
        let entry = |prompt_id, offset| ScheduledExpiry {
            id: Uuid::new_v4(),
            guild_id: GUILD,
            payload: ExpiryPayload::ClosePrompt { prompt_id },
            created_at: Utc::now(),
            due_at: Utc::now(),
            deadline: now + Duration::from_secs(offset),
        };

        queue.insert(entry(1, 30));
        let (_, head) = queue.insert(entry(2, 10));
        assert!(head);
        let (_, head) = queue.insert(entry(3, 20));
        assert!(!head);

        let due: Vec<_> = queue
            .pop_due(now + Duration::from_secs(25))
            .into_iter()
            .map(|e| e.key())
            .collect();
        assert_eq!(due, vec![ExpiryKey::Prompt(2), ExpiryKey::Prompt(3)]);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(30)));
    }
}
