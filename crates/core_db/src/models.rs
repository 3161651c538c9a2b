//! Row types for `spec.md` §3/§6. These are the store's-eye view;
//! `core_protocol` owns the wire-facing tagged enums so a row's `state`
//! column round-trips through `FromStr`/`Display` there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i32,
    pub task_name: String,
    pub task_type: String,
    pub task_value: String,
    pub workflow_json: Option<Value>,
    pub priority: i32,
    pub user_id: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueRow {
    pub id: i32,
    pub task_id: i32,
    pub user_id: i32,
    pub state: String,
    pub reporter: Option<String>,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub parameters: Option<Value>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRow {
    /// `e.state = claimed ∨ e.state = running ⇒ e.locked_by ≠ null`
    /// (`spec.md` §8). Exposed so tests can assert the invariant
    /// directly on a fetched row.
    pub fn invariants_hold(&self) -> bool {
        let locked_state = matches!(self.state.as_str(), "claimed" | "running");
        if locked_state && self.locked_by.is_none() {
            return false;
        }
        if !locked_state && self.locked_by.is_some() {
            return false;
        }
        self.attempts <= self.max_attempts
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowExecutionRow {
    pub id: i32,
    pub workflow_id: i32,
    pub status: String,
    pub parameters: Option<Value>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRow {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub policy_id: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NetboxCredentialsRow {
    pub id: i32,
    pub user_id: i32,
    pub netbox_username: Option<String>,
    pub netbox_token: Option<String>,
    pub netbox_host: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// A new worker-log audit row (`spec.md` §3/§6, column order taken
/// verbatim from `controller.InsertWorkerLog` in the original source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkerLog {
    pub worker: String,
    pub task: Option<String>,
    pub status: String,
    pub hosts: Option<String>,
    pub task_template: Option<String>,
    pub reporter: Option<String>,
}
