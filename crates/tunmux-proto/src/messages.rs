//! Protocol message types

use crate::conn_id::ConnId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A message travelling over the tunnel.
///
/// Data messages carry an opaque payload for the connection named by their
/// id. Control messages carry a protocol instruction instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Message {
    Data {
        id: ConnId,
        #[serde(with = "serde_bytes")]
        payload: Bytes,
    },
    Control(Control),
}

impl Message {
    pub fn data(id: ConnId, payload: impl Into<Bytes>) -> Self {
        Message::Data {
            id,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> ConnId {
        match self {
            Message::Data { id, .. } => *id,
            Message::Control(ctrl) => ctrl.id(),
        }
    }

    /// Application payload. Control messages have none.
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Data { payload, .. } => payload,
            Message::Control(_) => &[],
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Message::Control(_))
    }

    pub fn as_control(&self) -> Option<&Control> {
        match self {
            Message::Control(ctrl) => Some(ctrl),
            Message::Data { .. } => None,
        }
    }
}

impl From<Control> for Message {
    fn from(ctrl: Control) -> Self {
        Message::Control(ctrl)
    }
}

/// Control instruction codes.
///
/// Only the sync variants carry an acknowledgement number: the count of
/// data messages sent so far divided by the sender's sync ratio, truncated
/// to 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlCode {
    Connect,
    ConnectOk,
    ConnectReject,
    Disconnect,
    DisconnectOk,
    ReadClosed,
    WriteClosed,
    KeepAlive,
    SyncRequest { ack: u32 },
    SyncResponse { ack: u32 },
}

impl ControlCode {
    pub fn ack_number(&self) -> Option<u32> {
        match self {
            ControlCode::SyncRequest { ack } | ControlCode::SyncResponse { ack } => Some(*ack),
            _ => None,
        }
    }

    /// Sync codes belong to the tunnel itself and never reach a handler
    pub fn is_sync(&self) -> bool {
        self.ack_number().is_some()
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCode::Connect => f.write_str("CONNECT"),
            ControlCode::ConnectOk => f.write_str("CONNECT_OK"),
            ControlCode::ConnectReject => f.write_str("CONNECT_REJECT"),
            ControlCode::Disconnect => f.write_str("DISCONNECT"),
            ControlCode::DisconnectOk => f.write_str("DISCONNECT_OK"),
            ControlCode::ReadClosed => f.write_str("READ_CLOSED"),
            ControlCode::WriteClosed => f.write_str("WRITE_CLOSED"),
            ControlCode::KeepAlive => f.write_str("KEEP_ALIVE"),
            ControlCode::SyncRequest { ack } => write!(f, "SYNC_REQUEST({})", ack),
            ControlCode::SyncResponse { ack } => write!(f, "SYNC_RESPONSE({})", ack),
        }
    }
}

/// A control message addressed to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    id: ConnId,
    code: ControlCode,
}

impl Control {
    pub fn new(id: ConnId, code: ControlCode) -> Self {
        Self { id, code }
    }

    /// Flow-control request. Sync messages are tunnel-wide, so they use the
    /// unspecified connection id.
    pub fn sync_request(ack: u32) -> Self {
        Self::new(ConnId::UNSPECIFIED, ControlCode::SyncRequest { ack })
    }

    /// Answer to a sync request, echoing its ack number
    pub fn sync_response(ack: u32) -> Self {
        Self::new(ConnId::UNSPECIFIED, ControlCode::SyncResponse { ack })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn code(&self) -> ControlCode {
        self.code
    }

    pub fn ack_number(&self) -> Option<u32> {
        self.code.ack_number()
    }
}

mod serde_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<u8>::deserialize(deserializer).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn_id::IpProtocol;

    fn id() -> ConnId {
        ConnId::new(
            IpProtocol::Udp,
            "10.0.0.1:5000".parse().unwrap(),
            "10.0.0.2:53".parse().unwrap(),
        )
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::data(id(), vec![1, 2, 3, 4, 5]);
        let serialized = bincode::serialize(&msg).unwrap();
        let deserialized: Message = bincode::deserialize(&serialized).unwrap();
        assert_eq!(msg, deserialized);
        assert_eq!(deserialized.payload(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_control_has_no_payload() {
        let msg = Message::from(Control::new(id(), ControlCode::Connect));
        assert!(msg.is_control());
        assert!(msg.payload().is_empty());
        assert_eq!(msg.id(), id());
    }

    #[test]
    fn test_ack_number_only_on_sync_codes() {
        assert_eq!(ControlCode::Connect.ack_number(), None);
        assert_eq!(ControlCode::Disconnect.ack_number(), None);
        assert_eq!(ControlCode::SyncRequest { ack: 3 }.ack_number(), Some(3));
        assert_eq!(ControlCode::SyncResponse { ack: 4 }.ack_number(), Some(4));
        assert!(!ControlCode::KeepAlive.is_sync());
    }

    #[test]
    fn test_sync_controls_use_unspecified_id() {
        let request = Control::sync_request(7);
        assert_eq!(request.code(), ControlCode::SyncRequest { ack: 7 });
        assert_eq!(request.id(), ConnId::UNSPECIFIED);

        let response = Control::sync_response(7);
        assert_eq!(response.ack_number(), Some(7));
        assert_eq!(response.id(), ConnId::UNSPECIFIED);
    }

    #[test]
    fn test_control_code_display() {
        assert_eq!(ControlCode::DisconnectOk.to_string(), "DISCONNECT_OK");
        assert_eq!(
            ControlCode::SyncRequest { ack: 2 }.to_string(),
            "SYNC_REQUEST(2)"
        );
    }
}
