#[derive(Debug, thiserror::Error, Clone)]
pub enum GatekeeperError {
    #[error("upstream request failed: {0}")]
    Network(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("request exhausted {0} retry attempts")]
    RetriesExhausted(u32),

    #[error("failed to serialise request body: {0}")]
    Serialize(String),

    #[error("upstream version or installed-app pins did not match")]
    VersionMismatch,
}

impl From<reqwest::Error> for GatekeeperError {
    fn from(err: reqwest::Error) -> Self {
        GatekeeperError::Network(err.to_string())
    }
}
