//! Tunnel connection state, channel negotiation and the reliable send path

use crate::config::ClientConfig;
use crate::error::TunnelError;
use buslink_proto::{ConnectStatus, Frame};
use buslink_socket::TunnelSocket;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

/// An acknowledgement relayed from the demultiplexer to a waiting sender.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TunnelAck {
    pub seq_number: u8,
    pub status: u8,
}

/// Send-side state.
///
/// One lock guards both the sequence counter and the ack receiver, so a
/// `request_tunnel` call owns the entire exchange for its duration. Sequence
/// numbers cannot be reused; this is how at most one send stays in flight.
pub(crate) struct SendState {
    pub seq_number: u8,
    pub ack: mpsc::Receiver<TunnelAck>,
}

/// The channel endpoints the demultiplexer takes ownership of when it starts.
pub(crate) struct ServeState {
    pub ack_tx: mpsc::Sender<TunnelAck>,
    pub inbound_tx: mpsc::Sender<Vec<u8>>,
    pub sock_inbound: mpsc::Receiver<Frame>,
}

/// An established tunnel to a gateway.
pub(crate) struct TunnelConnection {
    pub(crate) sock: Arc<dyn TunnelSocket>,
    pub(crate) config: ClientConfig,
    pub(crate) channel: u8,
    pub(crate) send_state: Mutex<SendState>,
    pub(crate) serve_state: StdMutex<Option<ServeState>>,
}

/// Repeatedly send a connection request until the gateway answers.
///
/// A BUSY response keeps the loop going; anything else resolves it. There is
/// no bounded attempt count, the caller limits the whole exchange with the
/// response timeout.
pub(crate) async fn negotiate(
    sock: &dyn TunnelSocket,
    inbound: &mut mpsc::Receiver<Frame>,
    resend_interval: Duration,
) -> Result<u8, TunnelError> {
    sock.send(&Frame::ConnectRequest).await?;

    let mut resend = interval_at(Instant::now() + resend_interval, resend_interval);

    loop {
        tokio::select! {
            _ = resend.tick() => {
                sock.send(&Frame::ConnectRequest).await?;
            }

            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    return Err(TunnelError::InboundClosed);
                };

                // Only connection responses are of interest here.
                if let Frame::ConnectResponse { channel, status } = frame {
                    match status {
                        ConnectStatus::Ok => return Ok(channel),
                        // The gateway is busy, but we don't stop yet.
                        ConnectStatus::Busy => continue,
                        status => return Err(TunnelError::ConnectRejected(status)),
                    }
                }
            }
        }
    }
}

impl TunnelConnection {
    /// Wrap a negotiated channel in a ready-to-serve connection.
    ///
    /// Also returns the receiver that hands inbound application frames to
    /// the external consumer.
    pub(crate) fn new(
        sock: Arc<dyn TunnelSocket>,
        channel: u8,
        config: ClientConfig,
        sock_inbound: mpsc::Receiver<Frame>,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(1);

        let conn = Self {
            sock,
            config,
            channel,
            send_state: Mutex::new(SendState {
                seq_number: 0,
                ack: ack_rx,
            }),
            serve_state: StdMutex::new(Some(ServeState {
                ack_tx,
                inbound_tx,
                sock_inbound,
            })),
        };

        (conn, inbound_rx)
    }

    /// Send one application frame and wait for the matching acknowledgement.
    ///
    /// The request is retransmitted with the same sequence number every
    /// resend interval. The counter advances only on a matching ack, so a
    /// failed or cancelled call leaves it untouched and the next call reuses
    /// the number.
    pub(crate) async fn request_tunnel(
        &self,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let mut state = self.send_state.lock().await;
        let seq_number = state.seq_number;

        let req = Frame::TunnelRequest {
            channel: self.channel,
            seq_number,
            payload,
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

                ack = state.ack.recv() => {
                    let Some(ack) = ack else {
                        return Err(TunnelError::AckClosed);
                    };

                    // A late ack for an attempt that also got through; the
                    // one we are waiting for is still coming.
                    if ack.seq_number != seq_number {
                        continue;
                    }

                    // The gateway has seen this sequence number, so ours
                    // moves on regardless of the verdict.
                    state.seq_number = seq_number.wrapping_add(1);

                    if ack.status == 0 {
                        return Ok(());
                    }

                    return Err(TunnelError::Rejected(ack.status));
                }
            }
        }
    }
}
