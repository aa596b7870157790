//! Application-facing values: what the receive path yields and what `send` accepts.
use bytes::Bytes;

use crate::{
    close::{self, CloseCode},
    frame::{Frame, OpCode},
};

/// Something that happened on a connection.
///
/// Text and binary messages are only produced once their final fragment arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// The peer closed the connection. No events follow.
    Close {
        code: Option<CloseCode>,
        reason: String,
    },
    /// The peer sent a ping. The pong reply has already been written.
    Ping(Bytes),
    /// The peer sent a pong.
    Pong(Bytes),
}

impl Event {
    /// Builds the close event for a received close payload.
    pub(crate) fn close(payload: &[u8]) -> Self {
        let (code, reason) = close::decode_payload(payload);
        Event::Close { code, reason }
    }
}

/// Payload of an outbound message. Sent as a text or a binary frame depending on its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Text(String),
    Binary(Bytes),
}

impl Data {
    pub fn opcode(&self) -> OpCode {
        match self {
            Data::Text(_) => OpCode::Text,
            Data::Binary(_) => OpCode::Binary,
        }
    }
}

impl From<Data> for Frame {
    fn from(data: Data) -> Self {
        match data {
            Data::Text(text) => Frame::text(text),
            Data::Binary(bytes) => Frame::binary(bytes),
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Text(value.to_owned())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Text(value)
    }
}

impl From<&[u8]> for Data {
    fn from(value: &[u8]) -> Self {
        Data::Binary(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Data::Binary(value.into())
    }
}

impl From<Bytes> for Data {
    fn from(value: Bytes) -> Self {
        Data::Binary(value)
    }
}
