//! UDP implementation of the socket adapter

use crate::{SocketError, TunnelSocket};
use async_trait::async_trait;
use buslink_proto::{Frame, FrameCodec};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum UDP payload size.
const MAX_DATAGRAM: usize = 65_535;

/// How many decoded frames may queue between the reader task and the
/// session's demultiplexer.
const INBOUND_BUFFER: usize = 16;

/// A framed UDP socket connected to one gateway.
///
/// A background reader task decodes incoming datagrams into the inbound
/// channel. The reader exits (closing the channel) when the socket errors
/// or [`close`](TunnelSocket::close) is called.
pub struct GatewaySocket {
    socket: Arc<UdpSocket>,
    inbound: Mutex<Option<mpsc::Receiver<Frame>>>,
    reader: JoinHandle<()>,
    closed: AtomicBool,
}

impl GatewaySocket {
    /// Bind an ephemeral local port and connect it to `gateway`.
    pub async fn connect(gateway: SocketAddr) -> Result<Self, SocketError> {
        let bind_addr: SocketAddr = if gateway.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        socket.connect(gateway).await?;
        debug!(local = %socket.local_addr()?, %gateway, "socket connected");

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_frames(socket.clone(), tx));

        Ok(Self {
            socket,
            inbound: Mutex::new(Some(rx)),
            reader,
            closed: AtomicBool::new(false),
        })
    }
}

/// Reader loop: one datagram in, one decoded frame out.
async fn read_frames(socket: Arc<UdpSocket>, tx: mpsc::Sender<Frame>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("socket receive failed: {}", e);
                break;
            }
        };

        let mut bytes = BytesMut::from(&buf[..n]);
        match FrameCodec::decode(&mut bytes) {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => warn!(len = n, "truncated datagram, skipping"),
            Err(e) => warn!("undecodable datagram, skipping: {}", e),
        }
    }
}

#[async_trait]
impl TunnelSocket for GatewaySocket {
    async fn send(&self, frame: &Frame) -> Result<(), SocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Closed);
        }

        let bytes = FrameCodec::encode(frame)?;
        self.socket.send(&bytes).await?;
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<Frame>> {
        self.inbound.lock().ok()?.take()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.reader.abort();
            debug!("socket closed");
        }
    }
}

impl Drop for GatewaySocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Bind a raw UDP socket standing in for a gateway.
    async fn fake_gateway() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_send_reaches_gateway() {
        let (gateway, gateway_addr) = fake_gateway().await;
        let socket = GatewaySocket::connect(gateway_addr).await.unwrap();

        socket.send(&Frame::ConnectRequest).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _) = timeout(Duration::from_secs(1), gateway.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let mut bytes = BytesMut::from(&buf[..n]);
        let frame = FrameCodec::decode(&mut bytes).unwrap();
        assert_eq!(frame, Some(Frame::ConnectRequest));
    }

    #[tokio::test]
    async fn test_inbound_decodes_datagrams() {
        let (gateway, gateway_addr) = fake_gateway().await;
        let socket = GatewaySocket::connect(gateway_addr).await.unwrap();
        let mut inbound = socket.take_inbound().unwrap();

        // The gateway learns the client address from the first datagram.
        socket.send(&Frame::ConnectRequest).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (_, client_addr) = gateway.recv_from(&mut buf).await.unwrap();

        let response = Frame::TunnelResponse {
            channel: 1,
            seq_number: 0,
            status: 0,
        };
        let encoded = FrameCodec::encode(&response).unwrap();
        gateway.send_to(&encoded, client_addr).await.unwrap();

        let received = timeout(Duration::from_secs(1), inbound.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(response));
    }

    #[tokio::test]
    async fn test_undecodable_datagram_skipped() {
        let (gateway, gateway_addr) = fake_gateway().await;
        let socket = GatewaySocket::connect(gateway_addr).await.unwrap();
        let mut inbound = socket.take_inbound().unwrap();

        socket.send(&Frame::ConnectRequest).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (_, client_addr) = gateway.recv_from(&mut buf).await.unwrap();

        // Garbage first, then a valid frame; only the frame comes through.
        gateway.send_to(&[0xff; 3], client_addr).await.unwrap();
        let valid = Frame::ConnectionStateRequest { channel: 9 };
        let encoded = FrameCodec::encode(&valid).unwrap();
        gateway.send_to(&encoded, client_addr).await.unwrap();

        let received = timeout(Duration::from_secs(1), inbound.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(valid));
    }

    #[tokio::test]
    async fn test_take_inbound_is_take_once() {
        let (_gateway, gateway_addr) = fake_gateway().await;
        let socket = GatewaySocket::connect(gateway_addr).await.unwrap();

        assert!(socket.take_inbound().is_some());
        assert!(socket.take_inbound().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_gateway, gateway_addr) = fake_gateway().await;
        let socket = GatewaySocket::connect(gateway_addr).await.unwrap();

        socket.close();
        socket.close();

        assert!(matches!(
            socket.send(&Frame::ConnectRequest).await,
            Err(SocketError::Closed)
        ));
    }
}
