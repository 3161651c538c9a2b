//! The workflow-code runner boundary (`spec.md` §4.5, §9: "opaque
//! workflow 'code' blobs... model the runner as an interface with a
//! default stub implementation; real runners are out of scope").

use async_trait::async_trait;
use core_db::WorkflowRow;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("workflow execution failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, workflow: &WorkflowRow, parameters: Option<&Value>) -> Result<Value, RunnerError>;
}

/// Reference implementation: returns a canned result after a fixed
/// delay, standing in for a real workflow-code interpreter.
pub struct StubRunner {
    pub delay: std::time::Duration,
}

impl Default for StubRunner {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl WorkflowRunner for StubRunner {
    async fn run(&self, workflow: &WorkflowRow, _parameters: Option<&Value>) -> Result<Value, RunnerError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "workflow": workflow.name, "ran": true }))
    }
}
