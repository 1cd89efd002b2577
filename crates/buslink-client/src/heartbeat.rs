//! Idle-triggered liveness probing

use crate::connection::TunnelConnection;
use crate::error::TunnelError;
use buslink_proto::{ConnState, Frame};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

impl TunnelConnection {
    /// Ask the gateway for its connection state, resending until an answer
    /// arrives through the heartbeat channel.
    pub(crate) async fn request_state(
        &self,
        heartbeat: &Mutex<mpsc::Receiver<ConnState>>,
        cancel: &CancellationToken,
    ) -> Result<ConnState, TunnelError> {
        let mut rx = heartbeat.lock().await;

        // A response nobody collected within its handoff window belongs to
        // an earlier probe; it must not answer this one.
        while rx.try_recv().is_ok() {}

        let req = Frame::ConnectionStateRequest {
            channel: self.channel,
        };
        self.sock.send(&req).await?;

        let mut resend = interval_at(
            Instant::now() + self.config.resend_interval,
            self.config.resend_interval,
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(TunnelError::Cancelled);
                }

                _ = resend.tick() => {
                    self.sock.send(&req).await?;
                }

                state = rx.recv() => {
                    return state.ok_or(TunnelError::HeartbeatClosed);
                }
            }
        }
    }
}

/// Probe the gateway once and report failure through the timeout channel.
///
/// Spawned detached by the demultiplexer when the tunnel goes idle. The
/// failure indication itself races cancellation so an abandoned probe can
/// never block on a demultiplexer that already exited.
pub(crate) async fn perform_heartbeat(
    conn: Arc<TunnelConnection>,
    heartbeat: Arc<Mutex<mpsc::Receiver<ConnState>>>,
    timeout_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let result = timeout(
        conn.config.response_timeout,
        conn.request_state(&heartbeat, &cancel),
    )
    .await;

    match result {
        Ok(Ok(ConnState::Normal)) => return,
        Ok(Ok(state)) => warn!(%state, "bad connection state"),
        Ok(Err(e)) => warn!("error while requesting connection state: {}", e),
        Err(_) => warn!("connection state request timed out"),
    }

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = timeout_tx.send(()) => {}
    }
}
