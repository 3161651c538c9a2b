/// Errors produced by the framed wire codec.
///
/// Every variant here is fatal to the session it occurred on (see
/// `spec.md` §4.1/§7): the dispatcher observes these through a read or
/// write error and tears the session down. None of these are retried by
/// the codec itself.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fragmented frames are not supported")]
    FragmentedFrame,

    #[error("unknown opcode: {0:#x}")]
    UnknownOpcode(u8),

    #[error("frame payload of {0} bytes exceeds the {1} byte limit")]
    FrameTooLarge(u64, u64),

    #[error("client frame was not masked")]
    MissingMask,

    #[error("server frame must not be masked")]
    UnexpectedMask,

    #[error("payload is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Errors produced while performing the HTTP upgrade handshake.
///
/// These map to the HTTP status codes in `spec.md` §6 at the boundary
/// that owns the listening socket.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("malformed upgrade request: {0}")]
    Malformed(&'static str),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("missing worker identity")]
    MissingIdentity,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
