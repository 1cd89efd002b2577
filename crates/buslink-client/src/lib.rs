//! Client endpoint for the buslink gateway tunneling protocol
//!
//! A session is one tunnel channel on one gateway: [`Client::connect`]
//! negotiates it, [`Client::serve`] drives it until it terminates,
//! [`Client::send`] pushes application frames to the bus, and the receiver
//! from [`Client::take_inbound`] yields the frames the gateway pushes back.
//!
//! ```no_run
//! use buslink_client::{Client, ClientConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), buslink_client::TunnelError> {
//! let client = Client::connect("10.0.0.7:6720".parse().unwrap(), ClientConfig::default()).await?;
//! let client = Arc::new(client);
//! let mut inbound = client.take_inbound().unwrap();
//!
//! let session = tokio::spawn({
//!     let client = Arc::clone(&client);
//!     async move { client.serve().await }
//! });
//!
//! tokio::spawn(async move {
//!     while let Some(frame) = inbound.recv().await {
//!         println!("bus frame: {:02x?}", frame);
//!     }
//! });
//!
//! client.send(vec![0x11, 0x00]).await?;
//! client.close();
//! let _ = session.await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod connection;
mod error;
mod heartbeat;
mod serve;

pub use client::Client;
pub use config::ClientConfig;
pub use error::TunnelError;
