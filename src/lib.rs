//! hookd — in-memory hook registry with a retrying action scheduler.
//!
//! A hook bundles optional async handlers for purchase/remove/renew actions.
//! Callers execute handlers immediately through the [`HookService`], or
//! schedule them with a delay; a handler that reports a retryable failure is
//! re-run with bounded attempts and handler-supplied backoff. All state is
//! process memory and lost on restart by design.

pub mod config;
pub mod console;
pub mod env;
pub mod hooks;
pub mod scheduler;
pub mod service;

pub use config::Config;
pub use service::HookService;
