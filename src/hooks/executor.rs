//! Action execution engine: validation, fault isolation, result normalization

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use super::action::{ActionKind, ActionRecord, ActionResult, NO_SUBJECT, now_secs};
use super::registry::{ActionContext, Handler, Hook};

/// Sink for per-attempt action records. The transport is up to the
/// implementation; the default forwards to `tracing`.
pub trait ActionSink: Send + Sync {
    fn record(&self, record: &ActionRecord);
}

/// Default sink: structured log lines via `tracing`
pub struct TracingSink;

impl ActionSink for TracingSink {
    fn record(&self, record: &ActionRecord) {
        let payload = serde_json::to_string(record).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        if record.success {
            info!(name: "Action", "{}", payload);
        } else {
            warn!(name: "Action", "{}", payload);
        }
    }
}

/// Runs hook handlers for one action at a time.
///
/// A handler is invoked inside its own tokio task under a timeout, so a
/// panicking or hanging handler becomes a retryable failure result instead
/// of taking down the executor or sibling scheduled actions.
pub struct ActionExecutor {
    sink: Arc<dyn ActionSink>,
    handler_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(sink: Arc<dyn ActionSink>, handler_timeout: Duration) -> Self {
        Self {
            sink,
            handler_timeout,
        }
    }

    /// Execute the hook's handler for `kind`.
    ///
    /// Returns the normalized result plus an error string when the attempt
    /// was rejected by validation or the handler faulted. Every attempt,
    /// including validation rejects, is reported to the sink.
    pub async fn execute(
        &self,
        hook: &Hook,
        kind: ActionKind,
        subject_id: &str,
        args: &[String],
        scheduled: bool,
    ) -> (ActionResult, Option<String>) {
        let handler = match resolve_handler(hook, kind, subject_id) {
            Ok(handler) => handler.clone(),
            Err(error) => {
                let result = ActionResult {
                    success: false,
                    message: Some(error.clone()),
                    ..ActionResult::default()
                };
                self.report(hook, kind, subject_id, args, &result, scheduled, 0, Some(error.as_str()));
                return (result, Some(error));
            }
        };

        let ctx = ActionContext {
            hook_id: hook.id.clone(),
            label: hook.label.clone(),
            subject_id: subject_id.to_string(),
            args: args.to_vec(),
        };

        // Time the handler call only — the sink is outside the measurement
        let start = Instant::now();
        let mut task = tokio::spawn(handler(ctx));
        let outcome = tokio::time::timeout(self.handler_timeout, &mut task).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (result, error) = match outcome {
            Ok(Ok(reply)) => (reply.into_result(), None),
            Ok(Err(join_err)) => {
                let detail = if join_err.is_panic() {
                    format!("handler panicked: {}", panic_message(join_err))
                } else {
                    "handler task was cancelled".to_string()
                };
                (fault_result(&detail, elapsed_ms), Some(detail))
            }
            Err(_) => {
                task.abort();
                let detail = format!(
                    "handler timed out after {}ms",
                    self.handler_timeout.as_millis()
                );
                (fault_result(&detail, elapsed_ms), Some(detail))
            }
        };

        self.report(hook, kind, subject_id, args, &result, scheduled, elapsed_ms, error.as_deref());
        (result, error)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        hook: &Hook,
        kind: ActionKind,
        subject_id: &str,
        args: &[String],
        result: &ActionResult,
        scheduled: bool,
        execution_time_ms: u64,
        error: Option<&str>,
    ) {
        let record = ActionRecord {
            kind,
            hook_id: hook.id.clone(),
            subject_id: subject_id.to_string(),
            args: args.to_vec(),
            success: result.success,
            timestamp: now_secs(),
            scheduled,
            execution_time_ms,
            result: Some(result.clone()),
            error: error.map(str::to_string),
        };
        self.sink.record(&record);
    }
}

/// Fail-fast checks before the handler is invoked
fn resolve_handler<'a>(
    hook: &'a Hook,
    kind: ActionKind,
    subject_id: &str,
) -> Result<&'a Handler, String> {
    if hook.id.trim().is_empty() {
        return Err("hook has an empty id".to_string());
    }
    let handler = hook
        .handler(kind)
        .ok_or_else(|| format!("hook '{}' has no {} handler", hook.id, kind))?;
    if subject_id.trim().is_empty() || subject_id == NO_SUBJECT {
        return Err(format!("missing subject id for hook '{}'", hook.id));
    }
    Ok(handler)
}

/// A panic or timeout becomes a retryable failure with diagnostics in `data`
fn fault_result(detail: &str, execution_time_ms: u64) -> ActionResult {
    ActionResult::fail_retry("Handler execution failed")
        .with_data(json!({
            "error": detail,
            "execution_time_ms": execution_time_ms,
        }))
        .normalize()
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::action::{DEFAULT_RETRY_DELAY_SECS, HandlerReply};
    use crate::hooks::registry::{HookHandlers, HookRegistry, handler_fn};
    use std::sync::Mutex;

    /// Test sink that captures every record it sees
    struct RecordingSink(Mutex<Vec<ActionRecord>>);

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn records(&self) -> Vec<ActionRecord> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ActionSink for RecordingSink {
        fn record(&self, record: &ActionRecord) {
            self.0.lock().unwrap().push(record.clone());
        }
    }

    fn executor(sink: Arc<RecordingSink>) -> ActionExecutor {
        ActionExecutor::new(sink, Duration::from_secs(5))
    }

    fn hook_with(handlers: HookHandlers) -> Arc<Hook> {
        let registry = HookRegistry::new();
        registry.register("vip", "VIP package", handlers).unwrap()
    }

    #[tokio::test]
    async fn test_empty_reply_executes_as_success() {
        let sink = RecordingSink::new();
        let hook = hook_with(
            HookHandlers::new().on_purchase(handler_fn(|_ctx| async { HandlerReply::Empty })),
        );

        let (result, error) = executor(sink.clone())
            .execute(&hook, ActionKind::Purchase, "42", &[], false)
            .await;

        assert!(result.success);
        assert_eq!(error, None);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert!(!records[0].scheduled);
    }

    #[tokio::test]
    async fn test_message_reply_is_normalized() {
        let sink = RecordingSink::new();
        let hook = hook_with(
            HookHandlers::new().on_purchase(handler_fn(|_ctx| async { HandlerReply::from("ok") })),
        );

        let (result, _) = executor(sink)
            .execute(&hook, ActionKind::Purchase, "42", &[], false)
            .await;

        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_handler_receives_context() {
        let sink = RecordingSink::new();
        let hook = hook_with(HookHandlers::new().on_purchase(handler_fn(|ctx| async move {
            HandlerReply::from(format!("{}:{}:{}", ctx.hook_id, ctx.subject_id, ctx.args.join(",")))
        })));

        let args = vec!["gold".to_string(), "30d".to_string()];
        let (result, _) = executor(sink)
            .execute(&hook, ActionKind::Purchase, "42", &args, false)
            .await;

        assert_eq!(result.message.as_deref(), Some("vip:42:gold,30d"));
    }

    #[tokio::test]
    async fn test_missing_handler_is_rejected_without_retry() {
        let sink = RecordingSink::new();
        let hook = hook_with(HookHandlers::new());

        let (result, error) = executor(sink.clone())
            .execute(&hook, ActionKind::Remove, "42", &[], false)
            .await;

        assert!(!result.success);
        assert!(!result.retry);
        assert!(error.unwrap().contains("no remove handler"));
        // Validation rejects are reported too
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].execution_time_ms, 0);
    }

    #[tokio::test]
    async fn test_empty_and_sentinel_subjects_are_rejected() {
        let sink = RecordingSink::new();
        let hook = hook_with(
            HookHandlers::new().on_purchase(handler_fn(|_ctx| async { HandlerReply::Empty })),
        );
        let exec = executor(sink);

        for subject in ["", "  ", NO_SUBJECT] {
            let (result, error) = exec
                .execute(&hook, ActionKind::Purchase, subject, &[], false)
                .await;
            assert!(!result.success, "subject {subject:?}");
            assert!(!result.retry);
            assert!(error.unwrap().contains("missing subject id"));
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_retryable_failure() {
        let sink = RecordingSink::new();
        let hook = hook_with(HookHandlers::new().on_purchase(handler_fn(|_ctx| async {
            panic!("boom");
            #[allow(unreachable_code)]
            HandlerReply::Empty
        })));

        let (result, error) = executor(sink.clone())
            .execute(&hook, ActionKind::Purchase, "42", &[], true)
            .await;

        assert!(!result.success);
        assert!(result.retry);
        assert_eq!(result.message.as_deref(), Some("Handler execution failed"));
        assert_eq!(result.retry_delay, Some(DEFAULT_RETRY_DELAY_SECS));
        assert!(error.unwrap().contains("boom"));
        let data = result.data.unwrap();
        assert!(data["error"].as_str().unwrap().contains("boom"));

        let records = sink.records();
        assert!(records[0].scheduled);
    }

    #[tokio::test]
    async fn test_hanging_handler_times_out_as_retryable_failure() {
        let sink = RecordingSink::new();
        let hook = hook_with(HookHandlers::new().on_purchase(handler_fn(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HandlerReply::Empty
        })));
        let exec = ActionExecutor::new(sink, Duration::from_millis(50));

        let (result, error) = exec
            .execute(&hook, ActionKind::Purchase, "42", &[], false)
            .await;

        assert!(!result.success);
        assert!(result.retry);
        assert!(error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_failure_result_passes_through() {
        let sink = RecordingSink::new();
        let hook = hook_with(HookHandlers::new().on_remove(handler_fn(|_ctx| async {
            HandlerReply::from(ActionResult::fail_retry("inventory full").with_retry_delay(5.0))
        })));

        let (result, error) = executor(sink)
            .execute(&hook, ActionKind::Remove, "42", &[], false)
            .await;

        assert_eq!(error, None);
        assert!(!result.success);
        assert!(result.retry);
        assert_eq!(result.retry_delay, Some(5.0));
        assert_eq!(result.message.as_deref(), Some("inventory full"));
    }
}
