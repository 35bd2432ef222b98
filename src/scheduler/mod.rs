//! Deferred action scheduling with bounded retries
//!
//! Every scheduled action is an independent record in an in-memory table,
//! keyed by a generated id. Due times live in a min-heap drained by a single
//! loop task: the loop sleeps until the earliest due time (or until a new
//! schedule call wakes it), pops due entries, and processes each to
//! completion before the next. A retryable failure re-arms the same record
//! with a fresh due time rather than ticking on a fixed interval; success,
//! a non-retryable failure, exhausted retries, or a vanished hook all delete
//! the record. Nothing survives a restart.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::hooks::{ActionExecutor, ActionKind, HookRegistry, now_ms};

/// A pending deferred execution
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledAction {
    pub id: String,
    pub hook_id: String,
    pub kind: ActionKind,
    pub subject_id: String,
    pub args: Vec<String>,
    /// Unix milliseconds of the next attempt
    pub execute_at_ms: u64,
    /// Attempts already made
    pub retries: u32,
    pub max_retries: u32,
    /// Milliseconds to wait before the next attempt if this one fails too
    pub retry_delay_ms: u64,
    /// Unix milliseconds of first scheduling
    pub created_ms: u64,
}

/// Scheduling errors
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown hook '{0}'")]
    HookNotFound(String),

    #[error("delay must be a positive number of seconds (got {0})")]
    InvalidDelay(f64),
}

/// Heap entry; stale entries (cancelled or rescheduled records) are skipped
/// when they surface.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DueEntry {
    execute_at_ms: u64,
    seq: u64,
    id: String,
}

pub struct RetryScheduler {
    registry: Arc<HookRegistry>,
    executor: Arc<ActionExecutor>,
    actions: Mutex<HashMap<String, ScheduledAction>>,
    queue: Mutex<BinaryHeap<Reverse<DueEntry>>>,
    notify: Notify,
    next_seq: AtomicU64,
    default_retry_delay_ms: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RetryScheduler {
    pub fn new(
        registry: Arc<HookRegistry>,
        executor: Arc<ActionExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            actions: Mutex::new(HashMap::new()),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            default_retry_delay_ms: (config.default_retry_delay_secs * 1000.0) as u64,
        }
    }

    /// Schedule a deferred action.
    ///
    /// The delay must be strictly positive — immediate execution goes
    /// through the executor directly, not through the scheduler.
    pub fn schedule(
        &self,
        hook_id: &str,
        kind: ActionKind,
        subject_id: &str,
        args: Vec<String>,
        delay_secs: f64,
        max_retries: u32,
    ) -> Result<String, ScheduleError> {
        if !delay_secs.is_finite() || delay_secs <= 0.0 {
            return Err(ScheduleError::InvalidDelay(delay_secs));
        }
        if self.registry.get(hook_id).is_none() {
            return Err(ScheduleError::HookNotFound(hook_id.to_string()));
        }

        let now = now_ms();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("act-{now}-{seq}");
        let execute_at_ms = now + (delay_secs * 1000.0) as u64;

        let action = ScheduledAction {
            id: id.clone(),
            hook_id: hook_id.to_string(),
            kind,
            subject_id: subject_id.to_string(),
            args,
            execute_at_ms,
            retries: 0,
            max_retries,
            retry_delay_ms: self.default_retry_delay_ms,
            created_ms: now,
        };

        lock(&self.actions).insert(id.clone(), action);
        lock(&self.queue).push(Reverse(DueEntry {
            execute_at_ms,
            seq,
            id: id.clone(),
        }));
        self.notify.notify_one();

        debug!(
            "scheduled action {} for hook '{}' ({} {}) in {:.1}s, max {} retries",
            id, hook_id, kind, subject_id, delay_secs, max_retries
        );
        Ok(id)
    }

    /// Cancel a pending action. Returns whether the record existed.
    ///
    /// Best-effort: an attempt that is already executing completes, but a
    /// cancelled record is never rescheduled afterwards.
    pub fn cancel(&self, id: &str) -> bool {
        let existed = lock(&self.actions).remove(id).is_some();
        if existed {
            debug!("cancelled scheduled action {}", id);
        }
        existed
    }

    pub fn get(&self, id: &str) -> Option<ScheduledAction> {
        lock(&self.actions).get(id).cloned()
    }

    /// Snapshot of all pending actions, for introspection only
    pub fn get_all(&self) -> HashMap<String, ScheduledAction> {
        lock(&self.actions).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.actions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every record older than `retention`, regardless of state.
    /// A maintenance sweep, not part of the retry state machine.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(retention.as_millis() as u64);
        let mut actions = lock(&self.actions);
        let before = actions.len();
        actions.retain(|_, action| action.created_ms >= cutoff);
        let removed = before - actions.len();
        drop(actions);
        if removed > 0 {
            info!("cleanup removed {} stale scheduled action(s)", removed);
        }
        removed
    }

    /// Loop task: sleep until the earliest due time, then drain due entries.
    pub(crate) async fn run(self: Arc<Self>) {
        loop {
            match self.next_due_ms() {
                None => self.notify.notified().await,
                Some(due) => {
                    let now = now_ms();
                    if due > now {
                        // A new schedule call may move the head earlier;
                        // re-evaluate instead of sleeping through it
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(due - now)) => {}
                            _ = self.notify.notified() => continue,
                        }
                    }
                    while let Some(id) = self.pop_due(now_ms()) {
                        self.process(&id).await;
                    }
                }
            }
        }
    }

    fn next_due_ms(&self) -> Option<u64> {
        lock(&self.queue).peek().map(|entry| entry.0.execute_at_ms)
    }

    /// Pop the next live due entry, discarding stale ones. A heap entry is
    /// live only while the record exists and still carries the same due time
    /// (reschedules push a fresh entry).
    fn pop_due(&self, now: u64) -> Option<String> {
        let mut queue = lock(&self.queue);
        loop {
            match queue.peek() {
                Some(entry) if entry.0.execute_at_ms <= now => {
                    let entry = queue.pop()?.0;
                    let live = lock(&self.actions)
                        .get(&entry.id)
                        .is_some_and(|action| action.execute_at_ms == entry.execute_at_ms);
                    if live {
                        return Some(entry.id);
                    }
                }
                _ => return None,
            }
        }
    }

    /// Run one due action to a terminal or rescheduled state
    async fn process(&self, id: &str) {
        let Some(action) = self.get(id) else {
            return; // cancelled between pop and process
        };

        let Some(hook) = self.registry.get(&action.hook_id) else {
            warn!(
                "dropping scheduled action {}: hook '{}' is no longer registered",
                id, action.hook_id
            );
            lock(&self.actions).remove(id);
            return;
        };

        let (result, _error) = self
            .executor
            .execute(&hook, action.kind, &action.subject_id, &action.args, true)
            .await;

        if !result.success && result.retry && action.retries < action.max_retries {
            // Handler-supplied delay takes precedence over the stored one
            let delay_ms = result
                .retry_delay
                .map(|secs| (secs * 1000.0) as u64)
                .unwrap_or(action.retry_delay_ms);

            // The attempt may have been cancelled while the handler ran
            let rearmed = {
                let mut actions = lock(&self.actions);
                actions.get_mut(id).map(|record| {
                    record.retries += 1;
                    record.retry_delay_ms = delay_ms;
                    record.execute_at_ms = now_ms() + delay_ms;
                    debug!(
                        "action {} failed, retry {}/{} in {}ms",
                        id, record.retries, record.max_retries, delay_ms
                    );
                    record.execute_at_ms
                })
            };
            if let Some(execute_at_ms) = rearmed {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                lock(&self.queue).push(Reverse(DueEntry {
                    execute_at_ms,
                    seq,
                    id: id.to_string(),
                }));
                self.notify.notify_one();
            }
            return;
        }

        lock(&self.actions).remove(id);
        if result.success {
            debug!("action {} completed after {} retr(ies)", id, action.retries);
        } else if result.retry {
            warn!(
                "action {} failed permanently: retries exhausted after {} attempt(s)",
                id,
                action.retries + 1
            );
        } else {
            debug!("action {} failed without retry, dropping", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::{ActionRecord, ActionSink, HandlerReply, HookHandlers, handler_fn};

    struct NullSink;

    impl ActionSink for NullSink {
        fn record(&self, _record: &ActionRecord) {}
    }

    fn scheduler_with_hook() -> RetryScheduler {
        let config = Config::default();
        let registry = Arc::new(HookRegistry::new());
        registry
            .register(
                "vip",
                "VIP package",
                HookHandlers::new().on_purchase(handler_fn(|_ctx| async { HandlerReply::Empty })),
            )
            .unwrap();
        let executor = Arc::new(ActionExecutor::new(
            Arc::new(NullSink),
            Duration::from_secs(5),
        ));
        RetryScheduler::new(registry, executor, &config.scheduler)
    }

    #[test]
    fn test_zero_and_negative_delays_rejected() {
        let scheduler = scheduler_with_hook();
        for delay in [0.0, -5.0, f64::NAN] {
            let err = scheduler
                .schedule("vip", ActionKind::Purchase, "123", vec![], delay, 3)
                .unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidDelay(_)), "delay {delay}");
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_unknown_hook_rejected() {
        let scheduler = scheduler_with_hook();
        let err = scheduler
            .schedule("ghost", ActionKind::Purchase, "123", vec![], 1.0, 3)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::HookNotFound(_)));
    }

    #[test]
    fn test_schedule_creates_pending_record() {
        let scheduler = scheduler_with_hook();
        let id = scheduler
            .schedule(
                "vip",
                ActionKind::Purchase,
                "42",
                vec!["gold".to_string()],
                30.0,
                2,
            )
            .unwrap();

        let action = scheduler.get(&id).unwrap();
        assert_eq!(action.hook_id, "vip");
        assert_eq!(action.retries, 0);
        assert_eq!(action.max_retries, 2);
        assert!(action.execute_at_ms >= action.created_ms + 30_000);
        assert_eq!(action.retry_delay_ms, 30_000);
    }

    #[test]
    fn test_action_ids_are_unique() {
        let scheduler = scheduler_with_hook();
        let a = scheduler
            .schedule("vip", ActionKind::Purchase, "1", vec![], 5.0, 3)
            .unwrap();
        let b = scheduler
            .schedule("vip", ActionKind::Purchase, "1", vec![], 5.0, 3)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_cancel_twice() {
        let scheduler = scheduler_with_hook();
        let id = scheduler
            .schedule("vip", ActionKind::Purchase, "42", vec![], 5.0, 3)
            .unwrap();

        assert!(scheduler.cancel(&id));
        assert!(scheduler.get(&id).is_none());
        assert!(!scheduler.cancel(&id));
    }

    #[test]
    fn test_cleanup_sweeps_old_records_unconditionally() {
        let scheduler = scheduler_with_hook();
        scheduler
            .schedule("vip", ActionKind::Purchase, "42", vec![], 60.0, 3)
            .unwrap();

        // Not yet past the retention window
        assert_eq!(scheduler.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(scheduler.len(), 1);

        // Zero retention sweeps everything regardless of pending state
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(scheduler.cleanup(Duration::ZERO), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_process_drops_action_when_hook_removed() {
        let config = Config::default();
        let registry = Arc::new(HookRegistry::new());
        registry
            .register(
                "vip",
                "VIP package",
                HookHandlers::new().on_purchase(handler_fn(|_ctx| async { HandlerReply::Empty })),
            )
            .unwrap();
        let executor = Arc::new(ActionExecutor::new(
            Arc::new(NullSink),
            Duration::from_secs(5),
        ));
        let scheduler = RetryScheduler::new(registry.clone(), executor, &config.scheduler);

        let id = scheduler
            .schedule("vip", ActionKind::Purchase, "42", vec![], 1.0, 3)
            .unwrap();
        registry.remove("vip");

        scheduler.process(&id).await;
        assert!(scheduler.get(&id).is_none());
    }
}
