//! Receive demultiplexer: the single long-running task driving a session

use crate::connection::{ServeState, TunnelAck, TunnelConnection};
use crate::error::TunnelError;
use crate::heartbeat::perform_heartbeat;
use buslink_proto::Frame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

impl TunnelConnection {
    /// Process incoming frames until a terminal condition.
    ///
    /// `Ok(())` is the normal terminal reason, reached when either side's
    /// disconnect completes. The ack and inbound queues close on exit, which
    /// is what unblocks a pending send and ends the external consumer's
    /// frame sequence; the socket is released as well.
    pub(crate) async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<(), TunnelError> {
        let state = match self.serve_state.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let state = state.ok_or(TunnelError::AlreadyServing)?;

        let result = Arc::clone(&self).serve_loop(state, cancel).await;
        self.sock.close();
        debug!(channel = self.channel, "session terminated");
        result
    }

    async fn serve_loop(
        self: Arc<Self>,
        state: ServeState,
        cancel: CancellationToken,
    ) -> Result<(), TunnelError> {
        let ServeState {
            ack_tx,
            inbound_tx,
            mut sock_inbound,
        } = state;

        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);
        let heartbeat_rx = Arc::new(Mutex::new(heartbeat_rx));
        let (timeout_tx, mut timeout_rx) = mpsc::channel::<()>(1);

        // Accepted frames go through one detached forwarder so a slow
        // consumer never wedges this loop and delivery order is kept.
        // Dropping the queue on exit is what closes the inbound channel.
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                while let Some(payload) = accepted_rx.recv().await {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = inbound_tx.send(payload) => {}
                    }
                }
            }
        });

        let mut recv_seq: u8 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(TunnelError::Cancelled);
                }

                // A heartbeat probe reported failure.
                _ = timeout_rx.recv() => {
                    return Err(TunnelError::HeartbeatFailed);
                }

                // No incoming traffic for a while; check the gateway is
                // still there. Any inbound frame re-arms this timer.
                _ = sleep(self.config.heartbeat_delay) => {
                    tokio::spawn(perform_heartbeat(
                        Arc::clone(&self),
                        Arc::clone(&heartbeat_rx),
                        timeout_tx.clone(),
                        cancel.clone(),
                    ));
                }

                frame = sock_inbound.recv() => {
                    let Some(frame) = frame else {
                        return Err(TunnelError::InboundClosed);
                    };

                    match frame {
                        Frame::DisconnectRequest { channel, .. } => {
                            if channel != self.channel {
                                warn!(channel, "disconnect request for foreign channel");
                                continue;
                            }

                            // Best effort; the tunnel is coming down either way.
                            let res = Frame::DisconnectResponse { channel, status: 0 };
                            if let Err(e) = self.sock.send(&res).await {
                                debug!("disconnect response not sent: {}", e);
                            }

                            return Ok(());
                        }

                        Frame::DisconnectResponse { channel, .. } => {
                            if channel != self.channel {
                                warn!(channel, "disconnect response for foreign channel");
                                continue;
                            }

                            return Ok(());
                        }

                        Frame::TunnelRequest { channel, seq_number, payload } => {
                            if channel != self.channel {
                                warn!(channel, seq_number, "tunnel request for foreign channel");
                                continue;
                            }

                            self.accept_tunnel_request(
                                seq_number,
                                payload,
                                &mut recv_seq,
                                &accepted_tx,
                            )
                            .await;
                        }

                        Frame::TunnelResponse { channel, seq_number, status } => {
                            if channel != self.channel {
                                warn!(channel, "tunnel response for foreign channel");
                                continue;
                            }

                            relay(
                                ack_tx.clone(),
                                TunnelAck { seq_number, status },
                                self.config.resend_interval,
                                cancel.clone(),
                            );
                        }

                        Frame::ConnectionStateResponse { channel, state } => {
                            if channel != self.channel {
                                warn!(channel, "connection state response for foreign channel");
                                continue;
                            }

                            relay(
                                heartbeat_tx.clone(),
                                state,
                                self.config.resend_interval,
                                cancel.clone(),
                            );
                        }

                        // Connection responses only matter while connecting.
                        other => debug!(?other, "ignoring frame"),
                    }
                }
            }
        }
    }

    /// Deliver an in-order application frame, then acknowledge whatever
    /// arrived. Duplicates are acknowledged with the received sequence
    /// number but not delivered.
    async fn accept_tunnel_request(
        &self,
        seq_number: u8,
        payload: Vec<u8>,
        recv_seq: &mut u8,
        accepted_tx: &mpsc::UnboundedSender<Vec<u8>>,
    ) {
        if seq_number == *recv_seq {
            *recv_seq = recv_seq.wrapping_add(1);

            // The forwarder owns delivery; the error case is the session
            // already tearing down.
            let _ = accepted_tx.send(payload);
        }

        let res = Frame::TunnelResponse {
            channel: self.channel,
            seq_number,
            status: 0,
        };
        if let Err(e) = self.sock.send(&res).await {
            warn!(seq_number, "tunnel acknowledgement not sent: {}", e);
        }
    }
}

/// Detached handoff bounded by {cancellation, one resend window, delivery}.
///
/// The window matches the retry cadence of whoever is waiting: a message no
/// receiver collects within one resend interval is stale and gets dropped.
fn relay<T: Send + 'static>(
    tx: mpsc::Sender<T>,
    value: T,
    window: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(window) => {}
            _ = tx.send(value) => {}
        }
    });
}
