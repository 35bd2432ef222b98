//! Hook registry and action execution engine
//!
//! A hook is a named bundle of optional async handlers, one per action kind
//! (purchase/remove/renew). The [`ActionExecutor`] runs a handler for a
//! given subject and argument list, isolates panics and timeouts, and
//! normalizes whatever the handler returns into an [`ActionResult`]:
//!
//! - `HandlerReply::Empty` → `{success: true}`
//! - `HandlerReply::Message(m)` → `{success: true, message: m}`
//! - `HandlerReply::Result(r)` → `r` with the retry delay coerced
//!
//! Every attempt — success, failure, or validation reject — is reported to
//! an injected [`ActionSink`]. Retryable failures are the scheduler's
//! business (see [`crate::scheduler`]); the executor itself never retries.

mod action;
mod executor;
mod registry;

pub use action::{
    ActionKind, ActionRecord, ActionResult, DEFAULT_RETRY_DELAY_SECS, HandlerReply, NO_SUBJECT,
    now_ms, now_secs,
};
pub use executor::{ActionExecutor, ActionSink, TracingSink};
pub use registry::{
    ActionContext, Handler, Hook, HookHandlers, HookRegistry, RegistryError, handler_fn,
};
