//! `tokio_util` codec for WebSocket frames.
//!
//! The [`Decoder`] is driven by a [`FramedRead`](tokio_util::codec::FramedRead): it keeps
//! returning `Ok(None)` until a whole frame is buffered, so a frame is only produced once
//! exactly its declared number of payload bytes has been read. Decoded frames keep their
//! payload masked; callers unmask with [`Frame::unmask`].
//!
//! The [`Encoder`] writes a header and its payload into the output buffer in one go, masking
//! the payload with the frame's key when it has one.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    WebSocketError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The first two bytes were read, the extended length and mask key are pending.
    Header(Header),
    /// The whole header was read, the payload is pending.
    Payload(HeaderAndMask),
}

/// The fields held in the first two bytes of a frame.
struct Header {
    fin: bool,
    masked: bool,
    opcode: OpCode,
    /// Number of extended length bytes: 0, 2 or 8.
    extra: usize,
    /// The 7-bit length field.
    length_code: u8,
    /// Bytes remaining in the header after the first two.
    header_size: usize,
}

/// Header and mask data decoded ahead of the payload.
struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// A decoder for WebSocket frames.
///
/// Tracks which part of the frame (header or payload) is being read so partial input can be
/// resumed on the next call, and rejects frames larger than `max_payload_size`.
pub struct Decoder {
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` rejecting payloads larger than `max_payload_size` bytes.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes one frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))` once the header and the full payload have been consumed.
    /// - `Ok(None)` if more data is needed.
    /// - `Err(WebSocketError)` on a malformed header or a violated size limit.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let first = src[0];
                    let fin = first & 0b1000_0000 != 0;

                    // RSV1-3 must be zero, no extension is ever negotiated
                    if first & 0b0111_0000 != 0 {
                        return Err(WebSocketError::InvalidFrameHeader(first));
                    }

                    let opcode = OpCode::from_u8(first & 0b0000_1111)
                        .ok_or(WebSocketError::InvalidFrameHeader(first))?;
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        extra,
                        length_code,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len: usize = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        _ => usize::try_from(src.get_u64())
                            .map_err(|_| WebSocketError::FrameTooLarge)?,
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if header.opcode.is_control() {
                        if !header.fin {
                            return Err(WebSocketError::ControlFrameFragmented);
                        }
                        if payload_len > 125 {
                            return Err(WebSocketError::ControlFrameTooLarge);
                        }
                    }
                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    src.reserve(payload_len.saturating_sub(src.remaining()));

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let payload = src.split_to(payload_len);
                    break Ok(Some(Frame::new(header.fin, header.opcode, mask, payload)));
                }
            }
        }
    }

    /// Like [`decode`](codec::Decoder::decode), but the input has ended: leftover bytes or a
    /// half-read frame mean the stream was cut mid-frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && self.state.is_none() => Ok(None),
            None => Err(WebSocketError::StreamClosed),
        }
    }
}

/// WebSocket frame encoder.
///
/// Serializes the header of a [`Frame`] followed by its payload. When the frame has a mask
/// key, the key is written after the length and the payload is masked in place; the frame
/// is consumed, so the caller's data is never touched.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        if let Some(mask) = frame.mask {
            crate::mask::apply_mask(&mut frame.payload, mask);
        }

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}
