#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("store ping timed out after {0:?}")]
    PingTimeout(std::time::Duration),

    #[error("row not found")]
    NotFound,
}

pub type DbResult<T> = Result<T, DbError>;
