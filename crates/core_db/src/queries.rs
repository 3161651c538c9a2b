//! The store-level queries backing Q, X, D, and G. Claim/ack/fail
//! business logic (backoff, notification) lives in `core_queue` and
//! `core_scheduler`; this module only knows SQL.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::{
    NetboxCredentialsRow, NewWorkerLog, QueueRow, TokenRow, WorkflowExecutionRow, WorkflowRow,
};

/// Looks up an unexpired token row, per `spec.md` §4.1 ("a valid bearer
/// token looked up in S against unexpired token rows").
pub async fn find_valid_token(pool: &PgPool, token: &str) -> DbResult<Option<TokenRow>> {
    let row = sqlx::query_as::<_, TokenRow>(
        "SELECT id, user_id, token, policy_id, expires_at FROM tokens \
         WHERE token = $1 AND (expires_at IS NULL OR expires_at > NOW())",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert_queue_entry(
    pool: &PgPool,
    task_id: i32,
    user_id: i32,
    reporter: Option<&str>,
    priority: i32,
    max_attempts: i32,
    parameters: Option<Value>,
    available_at: DateTime<Utc>,
) -> DbResult<QueueRow> {
    let row = sqlx::query_as::<_, QueueRow>(
        "INSERT INTO queue \
         (task_id, user_id, state, reporter, priority, attempts, max_attempts, \
          available_at, parameters, created_at, updated_at) \
         VALUES ($1, $2, 'pending', $3, $4, 0, $5, $6, $7, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(user_id)
    .bind(reporter)
    .bind(priority)
    .bind(max_attempts)
    .bind(available_at)
    .bind(parameters)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Atomically claims the highest-priority due `pending` row for
/// `worker_identity`, skipping rows locked by a concurrent claimant
/// (`spec.md` §4.2: "select-for-update skipping locked rows").
pub async fn claim_next_queue_entry(pool: &PgPool, worker_identity: &str) -> DbResult<Option<QueueRow>> {
    let mut tx = pool.begin().await?;

    let candidate = sqlx::query_as::<_, QueueRow>(
        "SELECT * FROM queue \
         WHERE state = 'pending' AND available_at <= NOW() \
         ORDER BY priority DESC, created_at ASC \
         FOR UPDATE SKIP LOCKED \
         LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some(candidate) = candidate else {
        tx.commit().await?;
        return Ok(None);
    };

    let claimed = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET state = 'claimed', locked_by = $1, locked_at = NOW(), updated_at = NOW() \
         WHERE id = $2 \
         RETURNING *",
    )
    .bind(worker_identity)
    .bind(candidate.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(claimed))
}

pub async fn mark_running(pool: &PgPool, entry_id: i32) -> DbResult<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET state = 'running', started_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND state = 'claimed' \
         RETURNING *",
    )
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn complete_entry(pool: &PgPool, entry_id: i32) -> DbResult<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET state = 'completed', completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Retries (`pending`, incremented `attempts`, `retry_at` set) or fails
/// the row terminally, per the caller-computed `retry_at`/terminal
/// decision in `core_queue`.
pub async fn retry_entry(
    pool: &PgPool,
    entry_id: i32,
    retry_at: DateTime<Utc>,
    error_message: &str,
) -> DbResult<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET state = 'pending', attempts = attempts + 1, retry_at = $2, \
         locked_by = NULL, locked_at = NULL, error_message = $3, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(entry_id)
    .bind(retry_at)
    .bind(error_message)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn fail_entry(pool: &PgPool, entry_id: i32, error_message: &str) -> DbResult<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET state = 'failed', attempts = attempts + 1, completed_at = NOW(), \
         locked_by = NULL, locked_at = NULL, error_message = $2, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(entry_id)
    .bind(error_message)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Releases every row locked by `worker_identity` back to `pending`
/// with an attempt increment, capped at `max_attempts` — a row that
/// would cross its cap on release is transitioned straight to `failed`
/// instead, so repeated worker crashes can never push `attempts` past
/// `max_attempts` while a row sits `pending` forever (`spec.md` §4.2/
/// §4.3, the `attempts ≤ max_attempts` invariant in §8).
pub async fn release_worker_entries(pool: &PgPool, worker_identity: &str) -> DbResult<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET \
           state = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END, \
           attempts = attempts + 1, \
           completed_at = CASE WHEN attempts + 1 >= max_attempts THEN NOW() ELSE completed_at END, \
           error_message = CASE WHEN attempts + 1 >= max_attempts \
             THEN 'released past max_attempts on worker teardown' ELSE error_message END, \
           locked_by = NULL, locked_at = NULL, updated_at = NOW() \
         WHERE locked_by = $1 AND state IN ('claimed', 'running') \
         RETURNING *",
    )
    .bind(worker_identity)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sweeps every row still locked at startup, regardless of which
/// worker held it (`spec.md` §4.2 `recover_on_startup`), with the same
/// `max_attempts` cap as [`release_worker_entries`].
pub async fn release_all_locked_entries(pool: &PgPool) -> DbResult<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue SET \
           state = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END, \
           attempts = attempts + 1, \
           completed_at = CASE WHEN attempts + 1 >= max_attempts THEN NOW() ELSE completed_at END, \
           error_message = CASE WHEN attempts + 1 >= max_attempts \
             THEN 'released past max_attempts on worker teardown' ELSE error_message END, \
           locked_by = NULL, locked_at = NULL, updated_at = NOW() \
         WHERE locked_by IS NOT NULL \
         RETURNING *",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_queue_entry(pool: &PgPool, entry_id: i32) -> DbResult<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queue WHERE id = $1")
        .bind(entry_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_workflow(pool: &PgPool, workflow_id: i32) -> DbResult<Option<WorkflowRow>> {
    let row = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1")
        .bind(workflow_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Due, `pending` executions ordered by `scheduled_at` (`spec.md` §4.5).
pub async fn get_due_executions(pool: &PgPool) -> DbResult<Vec<WorkflowExecutionRow>> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        "SELECT * FROM workflow_executions \
         WHERE status = 'pending' AND scheduled_at <= NOW() \
         ORDER BY scheduled_at ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Conditional `pending -> running` transition. Returns `None` if the
/// row was no longer `pending` (another cycle's claimant won the CAS),
/// which `core_scheduler` treats as "silently drop" per `spec.md` §7.
pub async fn claim_execution(pool: &PgPool, execution_id: i32) -> DbResult<Option<WorkflowExecutionRow>> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(
        "UPDATE workflow_executions SET status = 'running', started_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'pending' \
         RETURNING *",
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn complete_execution(pool: &PgPool, execution_id: i32, result: Value) -> DbResult<()> {
    sqlx::query(
        "UPDATE workflow_executions SET status = 'completed', result = $2, completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(execution_id)
    .bind(result)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_execution(pool: &PgPool, execution_id: i32, error_message: &str) -> DbResult<()> {
    sqlx::query(
        "UPDATE workflow_executions SET status = 'failed', error_message = $2, completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(execution_id)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transitions stale `running` executions to `failed` at startup
/// (`spec.md` §4.5 crash recovery).
pub async fn fail_orphaned_executions(pool: &PgPool, max_age: chrono::Duration) -> DbResult<u64> {
    let cutoff = Utc::now() - max_age;
    let result = sqlx::query(
        "UPDATE workflow_executions SET status = 'failed', \
         error_message = 'orphaned at restart', completed_at = NOW(), updated_at = NOW() \
         WHERE status = 'running' AND started_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn insert_worker_log(pool: &PgPool, log: &NewWorkerLog) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO workers (worker, task, status, hosts, task_template, reporter, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NOW())",
    )
    .bind(&log.worker)
    .bind(&log.task)
    .bind(&log.status)
    .bind(&log.hosts)
    .bind(&log.task_template)
    .bind(&log.reporter)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_netbox_credentials(pool: &PgPool, user_id: i32) -> DbResult<Option<NetboxCredentialsRow>> {
    let row = sqlx::query_as::<_, NetboxCredentialsRow>(
        "SELECT id, user_id, netbox_username, netbox_token, netbox_host, last_verified_at \
         FROM netbox_credentials WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
