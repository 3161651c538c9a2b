#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("handshake rejected: {0}")]
    Handshake(#[from] core_protocol::HandshakeError),

    #[error("codec error: {0}")]
    Codec(#[from] core_protocol::CodecError),

    #[error("store error: {0}")]
    Db(#[from] core_db::DbError),

    #[error("malformed status frame: {0}")]
    BadStatusFrame(#[from] serde_json::Error),

    #[error("worker sent a close frame")]
    PeerClosed,

    #[error("missed {0} consecutive heartbeats")]
    HeartbeatTimeout(u32),

    #[error("a second handshake for this identity evicted the session")]
    Evicted,

    #[error("session task panicked: {0}")]
    TaskPanicked(String),
}
