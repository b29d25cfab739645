//! Operation state model.
//!
//! These are the values the manager hands out: identifiers, statuses,
//! caller metadata, failure details and point-in-time snapshots. The mutable
//! record behind them lives in [`crate::registry`] and is never exposed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of an operation.
///
/// Rendered as `op-<sequence>-<random>`. The sequence component comes from a
/// counter owned by the registry and only ever increases, so an identifier is
/// never issued twice for the lifetime of a manager, even after the record it
/// named has been pruned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub(crate) fn generate(sequence: u64) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("op-{}-{}", sequence, &random[..12]))
    }

    /// Wraps a caller-supplied string, e.g. one received back from a client.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of an operation.
///
/// Allowed transitions:
///
/// ```text
/// queued ──► running ──► succeeded | failed | cancelled
///    └─────────────────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Stable wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Position in the `queued < running < terminal` ordering.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::Cancelled => 2,
        }
    }

    pub fn can_transition_to(self, target: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, target),
            (Queued, Running) | (Queued, Cancelled) | (Running, Succeeded | Failed | Cancelled)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter accepted by [`crate::AsyncOperationManager::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Only(OperationStatus),
    /// `queued` or `running`.
    Active,
    /// `succeeded`, `failed` or `cancelled`.
    Terminal,
}

impl StatusFilter {
    /// Parses a filter token as used by the listing tool.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Only(OperationStatus::Queued)),
            "running" => Some(Self::Only(OperationStatus::Running)),
            "succeeded" => Some(Self::Only(OperationStatus::Succeeded)),
            "failed" => Some(Self::Only(OperationStatus::Failed)),
            "cancelled" | "canceled" => Some(Self::Only(OperationStatus::Cancelled)),
            "active" => Some(Self::Active),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }

    pub fn matches(self, status: OperationStatus) -> bool {
        match self {
            Self::Only(expected) => status == expected,
            Self::Active => !status.is_terminal(),
            Self::Terminal => status.is_terminal(),
        }
    }
}

/// Caller-supplied context attached to an operation.
///
/// The manager never interprets `tool_name` or `input`; they are echoed back
/// in snapshots. `resource_key` is only consulted when a duplicate policy
/// other than `allow` is configured. Keys are `/`-separated paths and a key
/// conflicts with its ancestors and descendants: `tasks` overlaps `tasks/3`,
/// while `tasks/3` and `tasks/4` are independent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
}

impl OperationMetadata {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input: Value::Null,
            resource_key: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_resource_key(mut self, key: impl Into<String>) -> Self {
        self.resource_key = Some(key.into());
        self
    }
}

/// Whether two resource keys name the same resource or one contains the other.
pub fn resource_keys_overlap(a: &str, b: &str) -> bool {
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    match longer.strip_prefix(shorter) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work returned an error.
    Error,
    /// The work exceeded its maximum duration.
    Timeout,
    /// The work panicked.
    Panic,
}

/// Failure detail recorded for a `failed` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub kind: FailureKind,
    /// Source chain of the original error, outermost first, excluding `message`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            causes: Vec::new(),
        }
    }

    /// Captures the message and cause chain of an `anyhow` error.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            kind: FailureKind::Error,
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Point-in-time view of an operation, as returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub id: OperationId,
    pub status: OperationStatus,
    pub metadata: OperationMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Outcome of a `cancel` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The operation was still queued and is now `cancelled`; it never ran.
    Cancelled,
    /// The operation is running; its token was fired and it will stop at its
    /// next cancellation point, if it has one.
    CancelRequested,
    /// The operation had already reached this terminal status.
    AlreadyTerminal(OperationStatus),
}

/// State transition broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub id: OperationId,
    pub status: OperationStatus,
    pub at: DateTime<Utc>,
}

/// Counters returned by [`crate::AsyncOperationManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
    /// Total operations ever accepted, including pruned ones.
    pub submitted_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));

        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Queued));
        for terminal in [Succeeded, Failed, Cancelled] {
            for target in [Queued, Running, Succeeded, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_value(OperationStatus::Succeeded).unwrap(),
            json!("succeeded")
        );
        assert_eq!(OperationStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_status_filter_parse() {
        assert_eq!(
            StatusFilter::parse("Canceled"),
            Some(StatusFilter::Only(OperationStatus::Cancelled))
        );
        assert_eq!(StatusFilter::parse("active"), Some(StatusFilter::Active));
        assert_eq!(StatusFilter::parse("bogus"), None);

        assert!(StatusFilter::Active.matches(OperationStatus::Running));
        assert!(!StatusFilter::Active.matches(OperationStatus::Failed));
        assert!(StatusFilter::Terminal.matches(OperationStatus::Failed));
    }

    #[test]
    fn test_operation_ids_embed_sequence() {
        let a = OperationId::generate(1);
        let b = OperationId::generate(2);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("op-1-"));
        assert!(b.as_str().starts_with("op-2-"));
    }

    #[test]
    fn test_error_detail_captures_chain() {
        let error = anyhow::anyhow!("disk full").context("writing tasks.json");
        let detail = ErrorDetail::from_error(&error);
        assert_eq!(detail.message, "writing tasks.json");
        assert_eq!(detail.causes, vec!["disk full".to_string()]);
        assert_eq!(detail.kind, FailureKind::Error);
        assert_eq!(detail.to_string(), "writing tasks.json: disk full");
    }

    #[test]
    fn test_metadata_serialization_skips_empty_fields() {
        let metadata = OperationMetadata::new("parsePRD");
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value, json!({"toolName": "parsePRD"}));

        let metadata = OperationMetadata::new("expandTask")
            .with_input(json!({"id": 3}))
            .with_resource_key("tasks/3");
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["resourceKey"], "tasks/3");
        assert_eq!(value["input"]["id"], 3);
    }

    #[test]
    fn test_resource_key_overlap() {
        assert!(resource_keys_overlap("tasks", "tasks"));
        assert!(resource_keys_overlap("tasks", "tasks/3"));
        assert!(resource_keys_overlap("tasks/3", "tasks"));
        assert!(!resource_keys_overlap("tasks/3", "tasks/4"));
        assert!(!resource_keys_overlap("tasks/3", "tasks/31"));
        assert!(!resource_keys_overlap("tasks", "tasksets"));
        assert!(!resource_keys_overlap("tasks/complexity", "tasks/3"));
    }
}
