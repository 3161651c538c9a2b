//! Persistence layer for Holonet Core.
//!
//! Wraps a `sqlx::PgPool` with the row types and queries the other
//! subsystems need. Schema migration is owned by an external
//! collaborator (`spec.md` §1); `apply_test_schema` is a test-only
//! bootstrap, not a migration runner.

pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use error::{DbError, DbResult};
pub use models::{
    NetboxCredentialsRow, NewWorkerLog, QueueRow, TaskRow, TokenRow, WorkflowExecutionRow,
    WorkflowRow,
};
pub use pool::{apply_test_schema, connect, ping};
