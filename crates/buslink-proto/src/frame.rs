//! Protocol frame types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes a gateway may return in a connection response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The gateway accepted the request and assigned a channel.
    Ok,
    /// The requested tunnel type is not supported.
    UnsupportedType,
    /// A requested connection option is not supported.
    UnsupportedOption,
    /// All of the gateway's channels are currently in use.
    Busy,
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStatus::Ok => write!(f, "ok"),
            ConnectStatus::UnsupportedType => write!(f, "unsupported tunnel type"),
            ConnectStatus::UnsupportedOption => write!(f, "unsupported connection option"),
            ConnectStatus::Busy => write!(f, "gateway busy"),
        }
    }
}

/// Connection state a gateway reports in response to a state request.
///
/// Anything other than [`ConnState::Normal`] means the channel is unusable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnState {
    /// The channel is healthy.
    Normal,
    /// The channel exists but is not active.
    Inactive,
    /// The gateway detected an error in the data connection.
    DataError,
    /// The gateway lost its connection to the fieldbus.
    BusError,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Normal => write!(f, "normal"),
            ConnState::Inactive => write!(f, "inactive"),
            ConnState::DataError => write!(f, "data error"),
            ConnState::BusError => write!(f, "bus error"),
        }
    }
}

/// Frames exchanged between a client endpoint and a gateway.
///
/// `channel` identifies the tunnel on every per-session frame. `seq_number`
/// counts application frames independently per direction and wraps at 255.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Frame {
    /// Ask the gateway to open a tunnel channel.
    ConnectRequest,
    /// The gateway's verdict on a connection request.
    ConnectResponse { channel: u8, status: ConnectStatus },
    /// Liveness probe for an open channel.
    ConnectionStateRequest { channel: u8 },
    /// The gateway's answer to a state request.
    ConnectionStateResponse { channel: u8, state: ConnState },
    /// Either side asks to tear the tunnel down.
    DisconnectRequest { channel: u8, status: u8 },
    /// Confirmation of a disconnect request.
    DisconnectResponse { channel: u8, status: u8 },
    /// An application frame travelling through the tunnel.
    TunnelRequest {
        channel: u8,
        seq_number: u8,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
    /// Acknowledgement of a tunnel request, echoing its sequence number.
    TunnelResponse {
        channel: u8,
        seq_number: u8,
        status: u8,
    },
}

// Serde helper so payloads serialize as raw bytes rather than element-wise.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::ConnectResponse {
            channel: 7,
            status: ConnectStatus::Ok,
        };
        let serialized = bincode::serialize(&frame).unwrap();
        let deserialized: Frame = bincode::deserialize(&serialized).unwrap();
        assert_eq!(frame, deserialized);
    }

    #[test]
    fn test_tunnel_request_payload() {
        let payload = vec![0x11, 0x00, 0xbc, 0xe0];
        let frame = Frame::TunnelRequest {
            channel: 1,
            seq_number: 42,
            payload: payload.clone(),
        };

        let serialized = bincode::serialize(&frame).unwrap();
        let deserialized: Frame = bincode::deserialize(&serialized).unwrap();

        if let Frame::TunnelRequest {
            channel,
            seq_number,
            payload: recv_payload,
        } = deserialized
        {
            assert_eq!(channel, 1);
            assert_eq!(seq_number, 42);
            assert_eq!(recv_payload, payload);
        } else {
            panic!("Expected TunnelRequest frame");
        }
    }

    #[test]
    fn test_connect_status_display() {
        assert_eq!(ConnectStatus::Busy.to_string(), "gateway busy");
        assert_eq!(ConnState::BusError.to_string(), "bus error");
    }
}
