//! Scheduler (X), `spec.md` §4.5.
//!
//! A single ticker polls the store for due executions; each one runs
//! on its own task so a slow workflow never blocks the next poll. The
//! `pending -> running` transition is a compare-and-swap at the store
//! (`core_db::queries::claim_execution`), so two overlapping cycles
//! that both see the same row never both run it.

pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use core_db::DbResult;
use sqlx::PgPool;
use tracing::{error, info, warn};

pub use runner::{RunnerError, StubRunner, WorkflowRunner};

/// Poll cadence for due executions (`spec.md` §4.5).
const POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default crash-recovery cutoff for orphaned `running` executions.
const DEFAULT_MAX_EXECUTION_AGE: Duration = Duration::from_secs(60 * 60);

pub struct Scheduler {
    pool: PgPool,
    runner: Arc<dyn WorkflowRunner>,
    max_execution_age: Duration,
}

impl Scheduler {
    pub fn new(pool: PgPool, runner: Arc<dyn WorkflowRunner>) -> Self {
        Self {
            pool,
            runner,
            max_execution_age: DEFAULT_MAX_EXECUTION_AGE,
        }
    }

    pub fn with_max_execution_age(mut self, max_execution_age: Duration) -> Self {
        self.max_execution_age = max_execution_age;
        self
    }

    /// Transitions stale `running` executions to `failed` before the
    /// control loop starts claiming new work (`spec.md` §4.5).
    pub async fn recover_on_startup(&self) -> DbResult<u64> {
        let cutoff = ChronoDuration::from_std(self.max_execution_age).unwrap_or(ChronoDuration::hours(1));
        let recovered = core_db::queries::fail_orphaned_executions(&self.pool, cutoff).await?;
        if recovered > 0 {
            warn!(count = recovered, "recovered orphaned workflow executions at startup");
        }
        Ok(recovered)
    }

    /// Runs the poll loop until `cancel` resolves.
    pub async fn run(&self, cancel: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let mut cancel = cancel;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("scheduler stopping: cancellation observed");
                        return;
                    }
                }
            }

            if *cancel.borrow() {
                return;
            }

            let due = match core_db::queries::get_due_executions(&self.pool).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!(error = %err, "failed to poll due workflow executions");
                    continue;
                }
            };

            for execution in due {
                let pool = self.pool.clone();
                let runner = self.runner.clone();
                let execution_id = execution.id;
                // run_one gets its own task so a panicking workflow runner
                // is caught at the task boundary (`spec.md` §7) instead of
                // taking down the poll loop; the supervising task below
                // inspects the JoinHandle and fails the row itself when
                // that happens, rather than leaving it stuck in `running`
                // until the crash-recovery sweep.
                let handle = tokio::spawn(run_one(pool.clone(), runner, execution_id));
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            error!(execution_id, error = %err, "execution run failed");
                        }
                        Err(join_err) => {
                            error!(execution_id, error = %join_err, "execution task panicked");
                            if let Err(db_err) =
                                core_db::queries::fail_execution(&pool, execution_id, &format!("panicked: {join_err}")).await
                            {
                                error!(execution_id, error = %db_err, "failed to mark panicked execution as failed");
                            }
                        }
                    }
                });
            }
        }
    }
}

async fn run_one(pool: PgPool, runner: Arc<dyn WorkflowRunner>, execution_id: i32) -> DbResult<()> {
    let pool = &pool;
    let Some(execution) = core_db::queries::claim_execution(pool, execution_id).await? else {
        // Lost the CAS race to another cycle; silent per spec.md §7.
        return Ok(());
    };

    let workflow = core_db::queries::get_workflow(pool, execution.workflow_id).await?;
    let Some(workflow) = workflow else {
        core_db::queries::fail_execution(pool, execution.id, "workflow not found").await?;
        return Ok(());
    };

    if workflow.status != "active" {
        core_db::queries::fail_execution(pool, execution.id, "workflow not active").await?;
        return Ok(());
    }

    match runner.run(&workflow, execution.parameters.as_ref()).await {
        Ok(result) => {
            core_db::queries::complete_execution(pool, execution.id, result).await?;
        }
        Err(err) => {
            core_db::queries::fail_execution(pool, execution.id, &err.to_string()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_db::WorkflowRow;
    use serde_json::Value;

    struct FailingRunner;

    #[async_trait::async_trait]
    impl WorkflowRunner for FailingRunner {
        async fn run(&self, _workflow: &WorkflowRow, _parameters: Option<&Value>) -> Result<Value, RunnerError> {
            Err(RunnerError::Failed("boom".into()))
        }
    }

    #[tokio::test]
    async fn stub_runner_returns_a_canned_result() {
        let runner = StubRunner {
            delay: Duration::from_millis(1),
        };
        let workflow = WorkflowRow {
            id: 1,
            name: "demo".into(),
            description: None,
            code: "".into(),
            status: "active".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let result = runner.run(&workflow, None).await.unwrap();
        assert_eq!(result["workflow"], "demo");
    }

    #[tokio::test]
    async fn failing_runner_reports_an_error() {
        let runner = FailingRunner;
        let workflow = WorkflowRow {
            id: 1,
            name: "demo".into(),
            description: None,
            code: "".into(),
            status: "active".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let err = runner.run(&workflow, None).await.unwrap_err();
        assert!(matches!(err, RunnerError::Failed(_)));
    }
}
