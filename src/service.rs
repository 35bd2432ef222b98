//! The owning service object wiring registry, executor, and scheduler

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::hooks::{
    ActionExecutor, ActionKind, ActionRecord, ActionResult, ActionSink, Hook, HookHandlers,
    HookRegistry, RegistryError, TracingSink, now_secs,
};
use crate::scheduler::{RetryScheduler, ScheduleError, ScheduledAction};

/// Hook dispatch service: one instance owns all mutable state (hooks and
/// scheduled actions) and the scheduler loop task. Construct it once at
/// process start, inside a tokio runtime, and share it by reference.
pub struct HookService {
    registry: Arc<HookRegistry>,
    executor: Arc<ActionExecutor>,
    scheduler: Arc<RetryScheduler>,
    sink: Arc<dyn ActionSink>,
    default_max_retries: u32,
    retention: Duration,
    loop_task: JoinHandle<()>,
}

impl HookService {
    /// Create a service that reports action attempts via `tracing`
    pub fn new(config: &Config) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a service with a caller-supplied action sink
    pub fn with_sink(config: &Config, sink: Arc<dyn ActionSink>) -> Self {
        let registry = Arc::new(HookRegistry::new());
        let executor = Arc::new(ActionExecutor::new(
            sink.clone(),
            Duration::from_millis(config.executor.handler_timeout_ms),
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            registry.clone(),
            executor.clone(),
            &config.scheduler,
        ));
        let loop_task = tokio::spawn(scheduler.clone().run());

        Self {
            registry,
            executor,
            scheduler,
            sink,
            default_max_retries: config.scheduler.default_max_retries,
            retention: Duration::from_secs(config.scheduler.retention_hours * 3600),
            loop_task,
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn register_hook(
        &self,
        id: &str,
        label: &str,
        handlers: HookHandlers,
    ) -> Result<Arc<Hook>, RegistryError> {
        self.registry.register(id, label, handlers)
    }

    pub fn remove_hook(&self, id: &str) {
        self.registry.remove(id);
    }

    /// Execute a hook's handler immediately. Does not create a scheduled
    /// action, whatever the outcome — retries are opt-in via [`Self::schedule`].
    pub async fn execute(
        &self,
        hook_id: &str,
        kind: ActionKind,
        subject_id: &str,
        args: &[String],
    ) -> (ActionResult, Option<String>) {
        let Some(hook) = self.registry.get(hook_id) else {
            let error = format!("unknown hook '{hook_id}'");
            warn!("{}", error);
            let result = ActionResult {
                success: false,
                message: Some(error.clone()),
                ..ActionResult::default()
            };
            // Unknown-hook rejects are part of the per-attempt log contract
            self.sink.record(&ActionRecord {
                kind,
                hook_id: hook_id.to_string(),
                subject_id: subject_id.to_string(),
                args: args.to_vec(),
                success: false,
                timestamp: now_secs(),
                scheduled: false,
                execution_time_ms: 0,
                result: Some(result.clone()),
                error: Some(error.clone()),
            });
            return (result, Some(error));
        };
        self.executor
            .execute(&hook, kind, subject_id, args, false)
            .await
    }

    /// Schedule a deferred execution. `max_retries` falls back to the
    /// configured default when `None`.
    pub fn schedule(
        &self,
        hook_id: &str,
        kind: ActionKind,
        subject_id: &str,
        args: Vec<String>,
        delay_secs: f64,
        max_retries: Option<u32>,
    ) -> Result<String, ScheduleError> {
        self.scheduler.schedule(
            hook_id,
            kind,
            subject_id,
            args,
            delay_secs,
            max_retries.unwrap_or(self.default_max_retries),
        )
    }

    pub fn cancel(&self, action_id: &str) -> bool {
        self.scheduler.cancel(action_id)
    }

    pub fn scheduled_action(&self, action_id: &str) -> Option<ScheduledAction> {
        self.scheduler.get(action_id)
    }

    pub fn scheduled_actions(&self) -> std::collections::HashMap<String, ScheduledAction> {
        self.scheduler.get_all()
    }

    /// Sweep scheduled actions older than the configured retention window
    pub fn cleanup(&self) -> usize {
        self.scheduler.cleanup(self.retention)
    }

    /// Aggregate current registry and scheduler state. Recomputed on each
    /// call; the service keeps no separate stats storage.
    pub fn stats(&self) -> ServiceStats {
        let actions = self.scheduler.get_all();

        let mut per_hook: BTreeMap<String, usize> = BTreeMap::new();
        let mut per_kind: BTreeMap<String, usize> = BTreeMap::new();
        for action in actions.values() {
            *per_hook.entry(action.hook_id.clone()).or_default() += 1;
            *per_kind.entry(action.kind.to_string()).or_default() += 1;
        }

        let oldest = actions
            .values()
            .min_by_key(|action| action.created_ms)
            .map(ScheduledSummary::from);
        let newest = actions
            .values()
            .max_by_key(|action| action.created_ms)
            .map(ScheduledSummary::from);

        ServiceStats {
            total_hooks: self.registry.len(),
            scheduled_actions: actions.len(),
            per_hook,
            per_kind,
            oldest,
            newest,
        }
    }
}

impl Drop for HookService {
    fn drop(&mut self) {
        self.loop_task.abort();
    }
}

/// Snapshot aggregation over registry and scheduler state
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub total_hooks: usize,
    pub scheduled_actions: usize,
    pub per_hook: BTreeMap<String, usize>,
    pub per_kind: BTreeMap<String, usize>,
    pub oldest: Option<ScheduledSummary>,
    pub newest: Option<ScheduledSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledSummary {
    pub id: String,
    pub hook_id: String,
    pub created_ms: u64,
    pub execute_at_ms: u64,
}

impl From<&ScheduledAction> for ScheduledSummary {
    fn from(action: &ScheduledAction) -> Self {
        Self {
            id: action.id.clone(),
            hook_id: action.hook_id.clone(),
            created_ms: action.created_ms,
            execute_at_ms: action.execute_at_ms,
        }
    }
}
