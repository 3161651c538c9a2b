//! JSON payloads carried inside text frames (`spec.md` §3, §9: "ad-hoc
//! status strings on the wire" are replaced here by a closed, validated
//! set of tagged variants; unknown tags fail the frame).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Core -> Worker. Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchMessage {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub reporter: String,
    #[serde(default)]
    pub hosts: String,
    #[serde(default)]
    pub task_template: String,
}

/// Worker -> Core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusMessage {
    pub worker: String,
    #[serde(default)]
    pub task_id: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub hosts: String,
    #[serde(default)]
    pub task_template: String,
    #[serde(default)]
    pub reporter: String,
}

impl StatusMessage {
    /// `task_id` is empty or the literal `"none"` when idle.
    pub fn has_task(&self) -> bool {
        !(self.task_id.is_empty() || self.task_id == "none")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Disconnected,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueState::Pending => "pending",
            QueueState::Claimed => "claimed",
            QueueState::Running => "running",
            QueueState::Completed => "completed",
            QueueState::Failed => "failed",
            QueueState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueState::Pending),
            "claimed" => Ok(QueueState::Claimed),
            "running" => Ok(QueueState::Running),
            "completed" => Ok(QueueState::Completed),
            "failed" => Ok(QueueState::Failed),
            "cancelled" => Ok(QueueState::Cancelled),
            other => Err(format!("unknown queue state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "inactive" => Ok(WorkflowStatus::Inactive),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Inactive => "inactive",
            WorkflowStatus::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// `connected` | `error`, per the worker session model in `spec.md` §3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    Connected,
    Error,
}

impl std::fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerHealth::Connected => "connected",
            WorkerHealth::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Parses and validates a status frame's payload. An unknown `status`
/// tag fails decode outright (`spec.md` §9: "validate at decode").
pub fn decode_status_message(payload: &[u8]) -> Result<StatusMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

pub fn encode_dispatch_message(msg: &DispatchMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_dispatch_message() {
        let msg = DispatchMessage {
            id: "42".into(),
            command: "echo".into(),
            args: vec!["hi".into()],
            files: HashMap::new(),
            reporter: "alice".into(),
            hosts: "".into(),
            task_template: "".into(),
        };
        let bytes = encode_dispatch_message(&msg).unwrap();
        let decoded: DispatchMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn idle_status_has_no_task() {
        let msg = StatusMessage {
            worker: "w1".into(),
            task_id: "none".into(),
            status: WorkerStatus::Idle,
            hosts: "".into(),
            task_template: "".into(),
            reporter: "".into(),
        };
        assert!(!msg.has_task());
    }

    #[test]
    fn unknown_status_tag_fails_decode() {
        let payload = br#"{"worker":"w1","task_id":"1","status":"zombie"}"#;
        assert!(decode_status_message(payload).is_err());
    }
}
