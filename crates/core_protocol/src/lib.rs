//! Framed worker-connection wire protocol.
//!
//! Owns the HTTP upgrade handshake, the frame codec, and the closed set
//! of JSON message types exchanged once a session is established. See
//! `spec.md` §4.1 and §3.

pub mod error;
pub mod frame;
pub mod handshake;
pub mod messages;

pub use error::{CodecError, HandshakeError};
pub use frame::{read_frame, FrameWriter, Opcode, Role, MAX_FRAME_LEN};
pub use handshake::{accept_key, read_upgrade_request, rejection_response, switching_protocols_response, UpgradeRequest};
pub use messages::{
    decode_status_message, encode_dispatch_message, DispatchMessage, ExecutionStatus, QueueState,
    StatusMessage, WorkerHealth, WorkerStatus, WorkflowStatus,
};
