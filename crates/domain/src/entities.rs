use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{HiveError, HiveResult};

/// Reserved task type every registry resolves unknown or unparseable
/// work to.
pub const DEFAULT_TASK_TYPE: &str = "default";

/// Parsed, typed representation of one inbound work message.
///
/// Immutable once created; discarded after dispatch or left on the queue
/// for redelivery when processing fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
}

#[derive(Deserialize)]
struct RawDescriptor {
    task_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    correlation_id: Option<String>,
}

impl JobDescriptor {
    pub fn new<S: Into<String>>(task_type: S, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Parse a wire message. Missing correlation ids are assigned one so
    /// every job is traceable.
    pub fn parse(raw: &[u8]) -> HiveResult<Self> {
        let parsed: RawDescriptor = serde_json::from_slice(raw)
            .map_err(|e| HiveError::parse_error(e.to_string()))?;
        if parsed.task_type.trim().is_empty() {
            return Err(HiveError::parse_error("descriptor has empty task_type"));
        }
        Ok(Self {
            task_type: parsed.task_type,
            payload: parsed.payload,
            correlation_id: parsed
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        })
    }

    /// Synthesize a descriptor for an unparseable message. The raw bytes
    /// are carried along so the default task (and operators) can still
    /// see what arrived.
    pub fn fallback(raw: &[u8]) -> Self {
        Self {
            task_type: DEFAULT_TASK_TYPE.to_string(),
            payload: serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn to_bytes(&self) -> HiveResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Coarse node lifecycle state reported through status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Starting,
    Idle,
    Running,
    Dying,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Starting => "starting",
            NodeState::Idle => "idle",
            NodeState::Running => "running",
            NodeState::Dying => "dying",
        };
        write!(f, "{s}")
    }
}

/// Transient status snapshot; only the most recent value matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub state: NodeState,
    pub uptime_seconds: u64,
    #[serde(default)]
    pub extra_info: HashMap<String, String>,
}

impl NodeStatus {
    pub fn starting<S: Into<String>>(node_id: S) -> Self {
        Self {
            node_id: node_id.into(),
            state: NodeState::Starting,
            uptime_seconds: 0,
            extra_info: HashMap::new(),
        }
    }
}

/// One emission on the status channel / event stream. `sequence` is
/// monotonic per node, covering heartbeats and workflow transitions
/// alike, so readers can order a single node's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub id: String,
    pub node_id: String,
    pub sequence: u64,
    pub status: NodeStatus,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusMessage {
    pub fn heartbeat(sequence: u64, status: NodeStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: status.node_id.clone(),
            sequence,
            status,
            note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn transition<S: Into<String>>(sequence: u64, status: NodeStatus, note: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: status.node_id.clone(),
            sequence,
            status,
            note: Some(note.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.note.is_none()
    }
}

/// Failure categories tracked by the error aggregator. Each category
/// carries its own shutdown threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Parse,
    UnapprovedTask,
    Workflow,
    Transport,
    Task,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Parse,
        ErrorCategory::UnapprovedTask,
        ErrorCategory::Workflow,
        ErrorCategory::Transport,
        ErrorCategory::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Parse => "parse",
            ErrorCategory::UnapprovedTask => "unapproved_task",
            ErrorCategory::Workflow => "workflow",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Task => "task",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new<S: Into<String>>(category: ErrorCategory, message: S) -> Self {
        Self {
            category,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Credentials handed out by the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

/// Answer from the node lifecycle collaborator's `describe_self`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub node_id: String,
    pub state: String,
    pub launch_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trip() {
        let descriptor = JobDescriptor::new("resize_image", serde_json::json!({"width": 640}));
        let bytes = descriptor.to_bytes().unwrap();
        let parsed = JobDescriptor::parse(&bytes).unwrap();
        assert_eq!(parsed.task_type, "resize_image");
        assert_eq!(parsed.payload, descriptor.payload);
        assert_eq!(parsed.correlation_id, descriptor.correlation_id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(JobDescriptor::parse(b"not json at all").is_err());
        assert!(JobDescriptor::parse(br#"{"payload": {}}"#).is_err());
        assert!(JobDescriptor::parse(br#"{"task_type": "  "}"#).is_err());
    }

    #[test]
    fn parse_assigns_missing_correlation_id() {
        let parsed = JobDescriptor::parse(br#"{"task_type": "noop"}"#).unwrap();
        assert!(!parsed.correlation_id.is_empty());
        assert_eq!(parsed.payload, serde_json::Value::Null);
    }

    #[test]
    fn fallback_carries_raw_bytes() {
        let descriptor = JobDescriptor::fallback(b"<<garbage>>");
        assert_eq!(descriptor.task_type, DEFAULT_TASK_TYPE);
        assert_eq!(
            descriptor.payload,
            serde_json::Value::String("<<garbage>>".to_string())
        );
    }

    #[test]
    fn heartbeat_has_no_note() {
        let msg = StatusMessage::heartbeat(3, NodeStatus::starting("node-1"));
        assert!(msg.is_heartbeat());
        let msg = StatusMessage::transition(4, NodeStatus::starting("node-1"), "new -> running");
        assert!(!msg.is_heartbeat());
    }
}
