//! Session lifecycle and the public client API

use crate::config::ClientConfig;
use crate::connection::{negotiate, TunnelConnection};
use crate::error::TunnelError;
use buslink_socket::{GatewaySocket, SocketError, TunnelSocket};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The client endpoint of a tunnel session with a gateway.
///
/// Construct one with [`Client::connect`], then drive it with
/// [`Client::serve`] while other tasks call [`Client::send`] and drain the
/// receiver from [`Client::take_inbound`].
pub struct Client {
    cancel: CancellationToken,
    conn: Arc<TunnelConnection>,
    inbound: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl Client {
    /// Establish a tunnel to the gateway at `gateway` over UDP.
    ///
    /// Zero durations in `config` fall back to their defaults. The connect
    /// exchange is bounded by the validated response timeout; a busy gateway
    /// is retried until that deadline.
    pub async fn connect(gateway: SocketAddr, config: ClientConfig) -> Result<Self, TunnelError> {
        let sock = GatewaySocket::connect(gateway).await?;
        Self::with_socket(Arc::new(sock), config).await
    }

    /// Like [`connect`](Self::connect), over an already constructed socket.
    pub async fn with_socket(
        sock: Arc<dyn TunnelSocket>,
        config: ClientConfig,
    ) -> Result<Self, TunnelError> {
        let config = config.validated();

        let mut sock_inbound = sock
            .take_inbound()
            .ok_or(TunnelError::Transport(SocketError::Closed))?;

        let channel = timeout(
            config.response_timeout,
            negotiate(sock.as_ref(), &mut sock_inbound, config.resend_interval),
        )
        .await
        .map_err(|_| TunnelError::TimedOut)??;

        info!(channel, "tunnel established");

        let (conn, inbound) = TunnelConnection::new(sock, channel, config, sock_inbound);

        Ok(Self {
            cancel: CancellationToken::new(),
            conn: Arc::new(conn),
            inbound: Mutex::new(Some(inbound)),
        })
    }

    /// The gateway-assigned channel identifier, fixed for the session's life.
    pub fn channel_id(&self) -> u8 {
        self.conn.channel
    }

    /// Run the session until a terminal condition.
    ///
    /// Blocks for the session's whole life; run it in its own task. `Ok(())`
    /// means the gateway ended the session cleanly; after
    /// [`close`](Self::close) it returns [`TunnelError::Cancelled`]. The
    /// socket is released on the way out.
    pub async fn serve(&self) -> Result<(), TunnelError> {
        Arc::clone(&self.conn).serve(self.cancel.clone()).await
    }

    /// Reliably transmit one application frame through the tunnel.
    ///
    /// Retransmits until the gateway acknowledges, bounded by the response
    /// timeout. Sends are serialised; concurrent calls queue.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TunnelError> {
        if self.cancel.is_cancelled() {
            return Err(TunnelError::Cancelled);
        }

        timeout(
            self.conn.config.response_timeout,
            self.conn.request_tunnel(payload, &self.cancel),
        )
        .await
        .map_err(|_| TunnelError::TimedOut)?
    }

    /// Hand the inbound application-frame sequence to its consumer.
    ///
    /// Returns `None` on every call after the first. The receiver yields
    /// frames in the order the gateway sent new sequence numbers and closes
    /// when the session terminates.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.inbound.lock().ok()?.take()
    }

    /// Terminate the session. Idempotent and non-blocking; `serve` observes
    /// the cancellation at its next wait.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
