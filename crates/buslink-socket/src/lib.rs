//! Datagram socket adapter for buslink sessions
//!
//! The session core talks to the gateway through the [`TunnelSocket`] trait:
//! typed frames out, a single-consumer channel of typed frames in. The UDP
//! implementation lives in [`udp`]; tests substitute their own.

use async_trait::async_trait;
use buslink_proto::{CodecError, Frame};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod udp;

pub use udp::GatewaySocket;

/// Socket-level errors
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Socket closed")]
    Closed,
}

/// Framed datagram transport to a gateway.
///
/// `send` must be safe to call from several tasks at once, concurrently with
/// the inbound reader. The inbound channel closes when the transport fails or
/// the socket is closed.
#[async_trait]
pub trait TunnelSocket: Send + Sync + 'static {
    /// Encode and transmit a single frame.
    async fn send(&self, frame: &Frame) -> Result<(), SocketError>;

    /// Hand the inbound frame sequence to its single consumer.
    ///
    /// Returns `None` on every call after the first.
    fn take_inbound(&self) -> Option<mpsc::Receiver<Frame>>;

    /// Release transport resources. Idempotent.
    fn close(&self);
}
