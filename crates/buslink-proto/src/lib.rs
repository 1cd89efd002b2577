//! Wire-level protocol model for buslink tunnel sessions.
//!
//! This crate defines the frames a client endpoint exchanges with a gateway
//! and the codec that turns them into datagrams. Session behavior lives in
//! `buslink-client`; byte transport lives in `buslink-socket`.

pub mod codec;
pub mod frame;

pub use codec::{CodecError, FrameCodec};
pub use frame::{ConnState, ConnectStatus, Frame};
