//! Session errors and terminal reasons

use buslink_proto::ConnectStatus;
use buslink_socket::SocketError;
use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Per-call operations (`connect`, `send`) return these to the caller; for
/// [`serve`](crate::Client::serve) the error is the session's terminal
/// reason, with `Ok(())` standing for a clean gateway-initiated disconnect.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Transport error: {0}")]
    Transport(#[from] SocketError),

    #[error("Connection request rejected: {0}")]
    ConnectRejected(ConnectStatus),

    #[error("Tunnel request rejected with status {0:#04x}")]
    Rejected(u8),

    #[error("Socket's inbound channel is closed")]
    InboundClosed,

    #[error("Ack channel is closed")]
    AckClosed,

    #[error("Heartbeat channel is closed")]
    HeartbeatClosed,

    #[error("Heartbeat did not succeed")]
    HeartbeatFailed,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Timed out waiting for a response")]
    TimedOut,

    #[error("Session demultiplexer is already running")]
    AlreadyServing,
}
