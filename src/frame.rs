//! # Frame
//!
//! The `frame` module models a single WebSocket frame as defined in
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The mask key is an attribute of the frame value. The [`Encoder`](crate::codec::Encoder)
//! masks the payload with it, and the reading side calls [`Frame::unmask`] right after decoding.
//!
//! ```rust
//! use wsock::{frame::Frame, CloseCode};
//!
//! let text = Frame::text("Hello, WebSocket!");
//! let ping = Frame::ping("are you there?");
//! let close = Frame::close(CloseCode::Normal, "Normal closure");
//! ```
use bytes::{Bytes, BytesMut};

use crate::close::{self, CloseCode};

/// WebSocket operation code (OpCode) that determines the semantic meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8).
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected when decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes of payload.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Parses the low nibble of the first header byte. Returns `None` for reserved values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible header: 2 base bytes, 8 bytes of extended length and a 4 byte mask key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket frame.
///
/// Most code should deal in [`Event`](crate::Event)s and [`Data`](crate::Data) instead;
/// frames are what the [`codec`](crate::codec) reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit. `false` means more fragments of the same message follow.
    pub fin: bool,
    /// The opcode of the frame.
    pub opcode: OpCode,
    /// The masking key, if any.
    pub mask: Option<[u8; 4]>,
    /// The payload. Masked on the wire iff `mask` is set.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// A final text frame. The payload is expected to be UTF-8.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, None, payload.as_ref())
    }

    /// A final binary frame.
    pub fn binary(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Binary, None, payload.as_ref())
    }

    /// A final continuation frame.
    pub fn continuation(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload.as_ref())
    }

    /// A ping frame. The peer answers with a pong carrying the same payload.
    pub fn ping(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Ping, None, payload.as_ref())
    }

    /// A pong frame, the reply to a ping.
    pub fn pong(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Pong, None, payload.as_ref())
    }

    /// A close frame carrying `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        Self::close_raw(close::encode_payload(code, reason))
    }

    /// A close frame with an arbitrary payload.
    ///
    /// The payload is not checked to be a valid close payload.
    pub fn close_raw(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Close, None, payload.as_ref())
    }

    /// Sets the FIN bit.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the masking key used when the frame is encoded.
    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    /// Returns whether the frame carries a masking key.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Removes the masking key and unmasks the payload with it.
    ///
    /// Frames without a key are left untouched.
    pub fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// The close code of a close frame, if its payload carries one.
    pub fn close_code(&self) -> Option<CloseCode> {
        close::decode_payload(&self.payload).0
    }

    /// The reason of a close frame. Empty when absent.
    pub fn close_reason(&self) -> String {
        close::decode_payload(&self.payload).1
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload.freeze()
    }

    /// Formats the frame header into `head` and returns the number of bytes written.
    ///
    /// # Panics
    /// Panics if `head` is shorter than the header being written (at most [`MAX_HEAD_SIZE`]).
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
