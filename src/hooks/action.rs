//! Action kinds, handler replies, and the normalized action result

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback retry delay when a handler asks for a retry without a usable delay
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 30.0;

/// Subject sentinel meaning "no subject" (console convention), rejected by validation
pub const NO_SUBJECT: &str = "0";

/// The three action families a hook can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// A subject acquired something the hook manages
    Purchase,
    /// The granted state should be taken away again
    Remove,
    /// An existing grant was renewed
    Renew,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Purchase, ActionKind::Remove, ActionKind::Renew];

    /// Get the kind name as used in console commands and log records
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Purchase => "purchase",
            ActionKind::Remove => "remove",
            ActionKind::Renew => "renew",
        }
    }

    /// Parse a kind name as typed on the console
    pub fn parse(s: &str) -> Option<ActionKind> {
        match s {
            "purchase" => Some(ActionKind::Purchase),
            "remove" => Some(ActionKind::Remove),
            "renew" => Some(ActionKind::Renew),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the handler considers the action done
    #[serde(default = "default_success")]
    pub success: bool,

    /// Optional human-readable outcome message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Optional structured payload (diagnostics, receipt data, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Whether a failure should be retried via the scheduler
    #[serde(default)]
    pub retry: bool,

    /// Seconds to wait before the retry; filled with the 30s default when
    /// `retry` is set and the delay is missing or unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<f64>,
}

fn default_success() -> bool {
    true
}

impl Default for ActionResult {
    fn default() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            retry: false,
            retry_delay: None,
        }
    }
}

impl ActionResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Non-retryable failure
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Retryable failure; the scheduler picks the delay (handler-supplied or default)
    pub fn fail_retry(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            retry: true,
            ..Self::default()
        }
    }

    pub fn with_retry_delay(mut self, secs: f64) -> Self {
        self.retry_delay = Some(secs);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Coerce `retry_delay` into a usable value: a present delay must be
    /// finite and non-negative, and a retry without a delay gets the default.
    pub(crate) fn normalize(mut self) -> Self {
        if let Some(delay) = self.retry_delay
            && (!delay.is_finite() || delay < 0.0)
        {
            self.retry_delay = Some(DEFAULT_RETRY_DELAY_SECS);
        }
        if self.retry && self.retry_delay.is_none() {
            self.retry_delay = Some(DEFAULT_RETRY_DELAY_SECS);
        }
        self
    }
}

/// What a handler hands back to the executor.
///
/// Handlers signal failure through `Result(ActionResult)` — panics are a
/// safety net caught by the executor, not a signaling mechanism.
#[derive(Debug, Clone)]
pub enum HandlerReply {
    /// Nothing to report; normalizes to a plain success
    Empty,
    /// Success with a status message
    Message(String),
    /// Full structured result
    Result(ActionResult),
}

impl HandlerReply {
    /// Normalize into the canonical result shape
    pub(crate) fn into_result(self) -> ActionResult {
        match self {
            HandlerReply::Empty => ActionResult::ok(),
            HandlerReply::Message(message) => ActionResult::ok_with_message(message),
            HandlerReply::Result(result) => result.normalize(),
        }
    }
}

impl From<ActionResult> for HandlerReply {
    fn from(result: ActionResult) -> Self {
        HandlerReply::Result(result)
    }
}

impl From<String> for HandlerReply {
    fn from(message: String) -> Self {
        HandlerReply::Message(message)
    }
}

impl From<&str> for HandlerReply {
    fn from(message: &str) -> Self {
        HandlerReply::Message(message.to_string())
    }
}

impl From<()> for HandlerReply {
    fn from(_: ()) -> Self {
        HandlerReply::Empty
    }
}

/// Log record emitted to the action sink for every invocation attempt
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub hook_id: String,
    pub subject_id: String,
    pub args: Vec<String>,
    pub success: bool,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Whether this attempt came from the retry scheduler
    pub scheduled: bool,
    /// Handler execution time only — excludes logging overhead
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Helper to get the current unix timestamp in seconds
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Helper to get the current unix timestamp in milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_roundtrip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("refund"), None);
    }

    #[test]
    fn test_empty_reply_normalizes_to_success() {
        let result = HandlerReply::Empty.into_result();
        assert!(result.success);
        assert_eq!(result.message, None);
        assert!(!result.retry);
    }

    #[test]
    fn test_message_reply_keeps_message() {
        let result = HandlerReply::from("ok").into_result();
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_failure_without_retry_stays_non_retryable() {
        let result = HandlerReply::from(ActionResult {
            success: false,
            ..ActionResult::default()
        })
        .into_result();
        assert!(!result.success);
        assert!(!result.retry);
        assert_eq!(result.retry_delay, None);
    }

    #[test]
    fn test_retry_without_delay_gets_default() {
        let result = HandlerReply::from(ActionResult::fail_retry("later")).into_result();
        assert!(result.retry);
        assert_eq!(result.retry_delay, Some(DEFAULT_RETRY_DELAY_SECS));
    }

    #[test]
    fn test_invalid_delay_falls_back_to_default() {
        for bad in [-5.0, f64::NAN, f64::INFINITY] {
            let result = HandlerReply::from(ActionResult::fail_retry("later").with_retry_delay(bad))
                .into_result();
            assert_eq!(result.retry_delay, Some(DEFAULT_RETRY_DELAY_SECS), "delay {bad}");
        }
    }

    #[test]
    fn test_valid_delay_survives_normalization() {
        let result =
            HandlerReply::from(ActionResult::fail_retry("later").with_retry_delay(5.0)).into_result();
        assert_eq!(result.retry_delay, Some(5.0));
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ActionResult::ok()).unwrap();
        assert_eq!(json, json!({"success": true, "retry": false}));
    }

    #[test]
    fn test_result_deserialization_defaults() {
        let result: ActionResult = serde_json::from_str("{}").unwrap();
        assert!(result.success);
        assert!(!result.retry);
    }
}
