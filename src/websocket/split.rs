//! Read and write halves of a WebSocket connection.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedWrite;

use crate::{
    codec::Encoder,
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

use super::{ConnectionState, Options};

// ================ ReadHalf ====================

/// Reassembles fragmented messages from a sequence of unmasked frames.
///
/// [`ReadHalf`] does no I/O. It is fed frames one at a time and hands back complete
/// messages, with the opcode of the first fragment, and control frames, which are never
/// buffered and may arrive between the fragments of a message.
pub(super) struct ReadHalf {
    /// The message being reassembled, if any.
    fragment: Option<Fragment>,
    /// Payload of the fragments received so far.
    accumulated: BytesMut,
    /// Upper bound for `accumulated`.
    max_read_buffer: usize,
    /// Maximum time allowed to receive all fragments of a message.
    fragment_timeout: Option<Duration>,
}

/// Kind of a message being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MessageKind {
    Text,
    Binary,
}

impl From<MessageKind> for OpCode {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => OpCode::Text,
            MessageKind::Binary => OpCode::Binary,
        }
    }
}

/// Fragmented message header.
struct Fragment {
    started: Instant,
    kind: MessageKind,
}

impl ReadHalf {
    pub(super) fn new(options: &Options) -> Self {
        Self {
            fragment: None,
            accumulated: BytesMut::with_capacity(1024),
            max_read_buffer: options.read_buffer_limit(),
            fragment_timeout: options.fragment_timeout,
        }
    }

    /// Processes one frame.
    ///
    /// - `Text` and `Binary` frames with FIN set are returned as they are. Without FIN they
    ///   start a fragmented message, which is an error if one is already in progress.
    /// - `Continuation` frames extend the message in progress. The last one returns the
    ///   whole message, tagged with the opcode of its first fragment.
    /// - Control frames are returned as they are.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))` for a complete message or a control frame.
    /// - `Ok(None)` if the frame was buffered as part of an unfinished message.
    /// - `Err(WebSocketError)` on a fragmentation violation or an exceeded limit.
    pub(super) fn on_frame(&mut self, mut frame: Frame) -> Result<Option<Frame>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    return Ok(Some(frame));
                }

                let kind = if frame.opcode == OpCode::Text {
                    MessageKind::Text
                } else {
                    MessageKind::Binary
                };

                self.accumulate(&frame.payload)?;
                self.fragment = Some(Fragment {
                    started: Instant::now(),
                    kind,
                });

                Ok(None)
            }
            OpCode::Continuation => {
                if self.fragment.is_none() {
                    return Err(WebSocketError::InvalidContinuationFrame);
                }

                self.accumulate(&frame.payload)?;

                if frame.fin {
                    let Some(fragment) = self.fragment.take() else {
                        return Err(WebSocketError::InvalidContinuationFrame);
                    };
                    // hand over the buffer and start again from a small one
                    let payload =
                        std::mem::replace(&mut self.accumulated, BytesMut::with_capacity(1024));

                    frame.opcode = fragment.kind.into();
                    frame.payload = payload;

                    Ok(Some(frame))
                } else if self.timed_out() {
                    Err(WebSocketError::FragmentTimeout)
                } else {
                    Ok(None)
                }
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => Ok(Some(frame)),
        }
    }

    fn accumulate(&mut self, payload: &[u8]) -> Result<()> {
        if self.accumulated.len() + payload.len() > self.max_read_buffer {
            return Err(WebSocketError::FrameTooLarge);
        }

        self.accumulated.extend_from_slice(payload);
        Ok(())
    }

    fn timed_out(&self) -> bool {
        match (&self.fragment, self.fragment_timeout) {
            (Some(fragment), Some(timeout)) => fragment.started.elapsed() > timeout,
            _ => false,
        }
    }
}

// ================ WriteHalf ====================

/// Write half of the WebSocket connection and the connection state.
///
/// Lives behind the connection's write lock. Every frame, whether written by the application
/// or as an automatic reply, goes through [`WriteHalf::write_frame`] while the lock is held,
/// so the bytes of two frames never interleave. State transitions happen under the same
/// lock, which is what keeps the stream from being shut down twice.
pub(super) struct WriteHalf<S> {
    sink: FramedWrite<tokio::io::WriteHalf<S>, Encoder>,
    /// Key used to mask every outgoing frame.
    mask: Option<[u8; 4]>,
    state: ConnectionState,
}

impl<S> WriteHalf<S>
where
    S: AsyncWrite,
{
    pub(super) fn new(io: tokio::io::WriteHalf<S>, mask: Option<[u8; 4]>) -> Self {
        Self {
            sink: FramedWrite::new(io, Encoder),
            mask,
            state: ConnectionState::Open,
        }
    }

    pub(super) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Encodes `frame` with the connection mask key and flushes it.
    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.sink.send(frame.with_mask(self.mask)).await
    }

    /// Writes an application frame. Fails once the connection left [`ConnectionState::Open`].
    pub(super) async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(WebSocketError::SocketClosed);
        }

        self.write_frame(frame).await
    }

    /// Writes an automatic reply, unless the connection is already closing.
    pub(super) async fn reply(&mut self, frame: Frame) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Ok(());
        }

        self.write_frame(frame).await
    }

    /// Application-initiated close.
    ///
    /// The close frame is always written. Whatever the outcome of the write, the stream is
    /// shut down afterwards if it was not already. A write error is returned only if the
    /// connection was still open.
    pub(super) async fn close(&mut self, frame: Frame) -> Result<()> {
        let was_open = self.state == ConnectionState::Open;
        if was_open {
            self.state = ConnectionState::Closing;
        }

        let res = self.write_frame(frame).await;
        self.shutdown().await;

        match res {
            Err(_err) if !was_open => {
                #[cfg(feature = "logging")]
                log::debug!("close frame on a closed connection not delivered: {_err}");
                Ok(())
            }
            res => res,
        }
    }

    /// Closes the connection from the receive path: writes `frame` (a close echo or a protocol
    /// error notice) if the connection is still open, then shuts the stream down.
    ///
    /// Write failures are logged and ignored, the connection is being torn down regardless.
    pub(super) async fn terminate(&mut self, frame: Option<Frame>) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
            if let Some(frame) = frame {
                if let Err(_err) = self.write_frame(frame).await {
                    #[cfg(feature = "logging")]
                    log::debug!("writing close frame: {_err}");
                }
            }
        }

        self.shutdown().await;
    }

    /// Shuts the underlying stream down. Runs at most once per connection.
    async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        // straight to the stream: a frame left in the buffer after a failed write must not
        // keep the shutdown from happening
        if let Err(_err) = self.sink.get_mut().shutdown().await {
            #[cfg(feature = "logging")]
            log::debug!("shutting down stream: {_err}");
        }
    }
}
