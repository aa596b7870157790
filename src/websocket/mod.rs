//! WebSocket connection over a Tokio byte stream.

mod options;
mod split;
mod upgrade;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};
use tokio_util::codec::FramedRead;

use crate::{
    close::CloseCode,
    codec::Decoder,
    event::{Data, Event},
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

use split::{ReadHalf, WriteHalf};

// Re-exports
pub use options::Options;
pub use upgrade::{
    accept, accept_with_options, HttpResponse, UpgradeFut, UpgradeResult, UpgradedWebSocket,
};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit are rejected before their payload is read.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum size of a message reassembled from fragments, set to 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// The role the WebSocket endpoint is taking.
///
/// Servers do not mask the frames they write. Clients mask them with a key drawn once
/// when the connection is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Lifecycle of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames can be sent.
    Open,
    /// A close frame was sent or received and the stream is being torn down.
    Closing,
    /// The stream has been shut down. Sends fail with [`WebSocketError::SocketClosed`].
    Closed,
}

// ================== WebSocket ====================

/// A WebSocket connection.
///
/// The receive side is pulled with [`WebSocket::next_event`] (or the stream returned by
/// [`WebSocket::into_stream`]). While pulling, pings are answered with pongs and a close
/// frame from the peer is echoed before the stream is shut down; these replies are written
/// before the corresponding event is returned.
///
/// Outbound operations take `&mut self`, so a connection driven from a spawned task only
/// needs its stream to be `Send`. Other tasks write through a [`Sender`]. All writes,
/// including automatic replies, are serialized by one lock.
///
/// # Example
/// ```no_run
/// use wsock::{Event, WebSocket};
///
/// async fn echo(stream: tokio::net::TcpStream) -> wsock::Result<()> {
///     // the opening handshake already happened on `stream`
///     let mut ws = WebSocket::server(stream);
///     while let Some(event) = ws.next_event().await {
///         match event? {
///             Event::Text(text) => ws.send(text).await?,
///             Event::Binary(data) => ws.send(data).await?,
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct WebSocket<S> {
    stream: FramedRead<tokio::io::ReadHalf<S>, Decoder>,
    read_half: ReadHalf,
    sender: Sender<S>,
    role: Role,
    /// Set once a close event or an error was yielded.
    terminated: bool,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Creates a server-side connection over an upgraded stream. Outgoing frames are not masked.
    pub fn server(stream: S) -> Self {
        Self::from_stream(stream, Role::Server, Options::default())
    }

    /// Creates a client-side connection over an upgraded stream. Outgoing frames are masked
    /// with a random key.
    pub fn client(stream: S) -> Self {
        Self::from_stream(stream, Role::Client, Options::default())
    }

    /// Creates a connection over an upgraded stream.
    ///
    /// The outgoing mask key is `options.mask_key` if set, otherwise a random key for
    /// [`Role::Client`] and none for [`Role::Server`]. It never changes afterwards.
    pub fn from_stream(stream: S, role: Role, options: Options) -> Self {
        let mask = options
            .mask_key
            .or_else(|| (role == Role::Client).then(rand::random));

        #[cfg(feature = "logging")]
        log::debug!(
            "Established {role} connection (masked={}, max_payload_read={})",
            mask.is_some(),
            options.payload_limit()
        );

        let (reader, writer) = tokio::io::split(stream);

        Self {
            stream: FramedRead::new(reader, Decoder::new(options.payload_limit())),
            read_half: ReadHalf::new(&options),
            sender: Sender {
                inner: Arc::new(Mutex::new(WriteHalf::new(writer, mask))),
            },
            role,
            terminated: false,
        }
    }

    /// The role this endpoint was created with.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns a handle for writing to this connection from other tasks.
    pub fn sender(&self) -> Sender<S> {
        self.sender.clone()
    }

    /// Current state of the connection.
    pub async fn state(&mut self) -> ConnectionState {
        self.sender.state().await
    }

    /// Returns `true` once the stream has been shut down.
    pub async fn is_closed(&mut self) -> bool {
        self.sender.is_closed().await
    }

    /// Sends a text or binary message as a single frame. See [`Sender::send`].
    pub async fn send(&mut self, data: impl Into<Data>) -> Result<()> {
        self.sender.send(data).await
    }

    /// Sends a ping. See [`Sender::ping`].
    pub async fn ping(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.sender.ping(payload).await
    }

    /// Closes the connection. See [`Sender::close`].
    pub async fn close(&mut self, code: CloseCode, reason: Option<&str>) -> Result<()> {
        self.sender.close(code, reason).await
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once a close event or an error has been returned. Frames are read one
    /// at a time, and only when this method is polled.
    ///
    /// # Errors
    /// Protocol violations and I/O failures are returned once. Before returning a protocol
    /// error, a close frame with a matching code is sent to the peer; in every case the
    /// connection ends up [`ConnectionState::Closed`]. An input that ends without a close
    /// frame yields [`WebSocketError::StreamClosed`].
    pub async fn next_event(&mut self) -> Option<Result<Event>> {
        if self.terminated {
            return None;
        }

        loop {
            let mut frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Some(Err(self.fail(err).await)),
                None => return Some(Err(self.fail(WebSocketError::StreamClosed).await)),
            };

            // the frame's own key, independent of the one used for writing
            frame.unmask();

            let res = match self.read_half.on_frame(frame) {
                Ok(Some(frame)) => self.on_frame(frame).await,
                Ok(None) => continue,
                Err(err) => Err(err),
            };

            return Some(match res {
                Ok(event) => Ok(event),
                Err(err) => Err(self.fail(err).await),
            });
        }
    }

    /// Turns the connection into a [`Stream`] of events.
    ///
    /// The stream is lazy: a frame is only read when the next item is polled. Keep a
    /// [`Sender`] (see [`WebSocket::sender`]) around to write while consuming it.
    pub fn into_stream(self) -> impl Stream<Item = Result<Event>> {
        futures::stream::unfold(self, |mut ws| async move {
            let event = ws.next_event().await?;
            Some((event, ws))
        })
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Event> {
        match frame.opcode {
            OpCode::Text => into_text(frame).map(Event::Text),
            OpCode::Binary => Ok(Event::Binary(frame.into_payload())),
            OpCode::Ping => {
                let payload = frame.into_payload();
                self.sender
                    .inner
                    .lock()
                    .await
                    .reply(Frame::pong(&payload))
                    .await?;
                Ok(Event::Ping(payload))
            }
            OpCode::Pong => Ok(Event::Pong(frame.into_payload())),
            OpCode::Close => {
                self.terminated = true;

                #[cfg(feature = "logging")]
                log::debug!(
                    "{} received close frame (code={:?})",
                    self.role,
                    frame.close_code()
                );

                let event = Event::close(&frame.payload);
                self.sender
                    .inner
                    .lock()
                    .await
                    .terminate(Some(Frame::close_raw(&frame.payload)))
                    .await;

                Ok(event)
            }
            // folded into the first fragment by the read half
            OpCode::Continuation => Err(WebSocketError::InvalidContinuationFrame),
        }
    }

    /// Ends the receive path on `err`: notifies the peer if the error is a protocol
    /// violation, shuts the stream down and returns `err`.
    async fn fail(&mut self, err: WebSocketError) -> WebSocketError {
        self.terminated = true;

        let code = match &err {
            WebSocketError::InvalidFrameHeader(_)
            | WebSocketError::ControlFrameFragmented
            | WebSocketError::ControlFrameTooLarge
            | WebSocketError::InvalidFragment
            | WebSocketError::InvalidContinuationFrame
            | WebSocketError::FragmentTimeout => Some(CloseCode::Protocol),
            WebSocketError::FrameTooLarge => Some(CloseCode::Size),
            WebSocketError::InvalidUTF8 => Some(CloseCode::Invalid),
            _ => None,
        };

        #[cfg(feature = "logging")]
        log::debug!("{} receive path failed: {err}", self.role);

        let frame = code.map(|code| Frame::close(code, err.to_string()));
        self.sender.inner.lock().await.terminate(frame).await;

        err
    }
}

fn into_text(frame: Frame) -> Result<String> {
    #[cfg(feature = "simd")]
    let text = simdutf8::basic::from_utf8(&frame.payload).map_err(|_| WebSocketError::InvalidUTF8)?;
    #[cfg(not(feature = "simd"))]
    let text = std::str::from_utf8(&frame.payload).map_err(|_| WebSocketError::InvalidUTF8)?;

    Ok(text.to_owned())
}

// ================== Sender ====================

/// Cloneable write handle of a [`WebSocket`].
///
/// Every clone shares the connection's write lock with the receive path, so frames written
/// concurrently from several tasks, and the automatic pong and close replies, are emitted
/// one whole frame at a time.
pub struct Sender<S> {
    inner: Arc<Mutex<WriteHalf<S>>>,
}

impl<S> Clone for Sender<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Sender<S>
where
    S: AsyncWrite,
{
    /// Sends `data` as one final frame: a text frame for strings, a binary frame for bytes.
    ///
    /// # Errors
    /// [`WebSocketError::SocketClosed`] once the connection is closing or closed.
    pub async fn send(&self, data: impl Into<Data>) -> Result<()> {
        let frame = Frame::from(data.into());
        self.inner.lock().await.send(frame).await
    }

    /// Sends a ping frame carrying `payload`.
    ///
    /// # Errors
    /// [`WebSocketError::ControlFrameTooLarge`] if `payload` is longer than 125 bytes,
    /// [`WebSocketError::SocketClosed`] once the connection is closing or closed.
    pub async fn ping(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        let payload = payload.as_ref();
        if payload.len() > 125 {
            return Err(WebSocketError::ControlFrameTooLarge);
        }

        self.inner.lock().await.send(Frame::ping(payload)).await
    }

    /// Sends a close frame with `code` and `reason`, then shuts the stream down.
    ///
    /// The stream is shut down even if writing the close frame fails, and never more than
    /// once: on an already closed connection the frame write is still attempted, but its
    /// failure is ignored and the stream is left alone.
    ///
    /// # Errors
    /// [`WebSocketError::InvalidCloseCode`] for codes that must not appear in a close frame
    /// (see [`CloseCode::is_allowed`]) and [`WebSocketError::ControlFrameTooLarge`] for a
    /// reason longer than 123 bytes. Nothing is written and the connection stays as it was.
    pub async fn close(&self, code: CloseCode, reason: Option<&str>) -> Result<()> {
        if !code.is_allowed() {
            return Err(WebSocketError::InvalidCloseCode(code.into()));
        }

        let reason = reason.unwrap_or_default();
        // two bytes of the 125 go to the code
        if reason.len() > 123 {
            return Err(WebSocketError::ControlFrameTooLarge);
        }

        #[cfg(feature = "logging")]
        log::debug!("closing connection (code={code})");

        let frame = Frame::close(code, reason);
        self.inner.lock().await.close(frame).await
    }

    /// Current state of the connection.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state()
    }

    /// Returns `true` once the stream has been shut down.
    pub async fn is_closed(&self) -> bool {
        self.state().await == ConnectionState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        pin::Pin,
        sync::atomic::{AtomicUsize, Ordering},
        task::{Context, Poll},
    };

    use bytes::Bytes;
    use futures::{FutureExt, SinkExt};
    use tokio::io::{DuplexStream, ReadBuf};
    use tokio_util::codec::FramedWrite;

    use crate::codec::Encoder;

    /// Counts how many times the stream was shut down.
    struct CountingStream {
        inner: DuplexStream,
        shutdowns: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for CountingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            this.shutdowns.fetch_add(1, Ordering::SeqCst);
            Pin::new(&mut this.inner).poll_shutdown(cx)
        }
    }

    /// The remote endpoint, speaking raw frames.
    struct Peer {
        reader: FramedRead<tokio::io::ReadHalf<DuplexStream>, Decoder>,
        writer: FramedWrite<tokio::io::WriteHalf<DuplexStream>, Encoder>,
    }

    impl Peer {
        async fn send(&mut self, frame: Frame) {
            self.writer.send(frame).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Frame> {
            let mut frame = self.reader.next().await?.unwrap();
            frame.unmask();
            Some(frame)
        }
    }

    const PEER_KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn pair_with(options: Options) -> (WebSocket<CountingStream>, Peer, Arc<AtomicUsize>) {
        let (local, remote) = tokio::io::duplex(1 << 20);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let stream = CountingStream {
            inner: local,
            shutdowns: Arc::clone(&shutdowns),
        };

        let (reader, writer) = tokio::io::split(remote);
        let peer = Peer {
            reader: FramedRead::new(reader, Decoder::new(usize::MAX)),
            writer: FramedWrite::new(writer, Encoder),
        };

        (
            WebSocket::from_stream(stream, Role::Server, options),
            peer,
            shutdowns,
        )
    }

    fn pair() -> (WebSocket<CountingStream>, Peer, Arc<AtomicUsize>) {
        pair_with(Options::default())
    }

    mod receive_tests {
        use super::*;

        #[tokio::test]
        async fn test_masked_text_and_binary() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::text("hello").with_mask(Some(PEER_KEY)))
                .await;
            peer.send(Frame::binary([1, 2, 3])).await;

            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Text("hello".into())
            );
            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Binary(Bytes::from_static(&[1, 2, 3]))
            );
        }

        #[tokio::test]
        async fn test_fragmented_text_equals_unfragmented() {
            let (mut ws, mut peer, _) = pair();
            let message = "a message split over several frames";

            peer.send(Frame::text(&message[..5]).with_fin(false).with_mask(Some(PEER_KEY)))
                .await;
            peer.send(Frame::continuation(&message[5..12]).with_fin(false))
                .await;
            peer.send(Frame::continuation(&message[12..]).with_mask(Some(PEER_KEY)))
                .await;
            peer.send(Frame::text(message)).await;

            let fragmented = ws.next_event().await.unwrap().unwrap();
            let whole = ws.next_event().await.unwrap().unwrap();
            assert_eq!(fragmented, Event::Text(message.into()));
            assert_eq!(fragmented, whole);
        }

        #[tokio::test]
        async fn test_ping_is_answered_before_the_event() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::ping("are you there").with_mask(Some(PEER_KEY)))
                .await;

            let event = ws.next_event().await.unwrap().unwrap();
            assert_eq!(event, Event::Ping(Bytes::from_static(b"are you there")));

            // already written by the time the event was returned
            let pong = peer.recv().now_or_never().flatten().expect("pong written");
            assert_eq!(pong.opcode, OpCode::Pong);
            assert_eq!(&pong.payload[..], b"are you there");
            assert!(!ws.is_closed().await);
        }

        #[tokio::test]
        async fn test_pong_is_not_answered() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::pong("late")).await;
            peer.send(Frame::text("after")).await;

            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Pong(Bytes::from_static(b"late"))
            );
            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Text("after".into())
            );
            assert!(peer.recv().now_or_never().is_none());
        }

        #[tokio::test]
        async fn test_close_sequence() {
            let (mut ws, mut peer, shutdowns) = pair();

            peer.send(Frame::close(CloseCode::Normal, "bye").with_mask(Some(PEER_KEY)))
                .await;
            peer.send(Frame::text("never seen")).await;

            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Close {
                    code: Some(CloseCode::Normal),
                    reason: "bye".into()
                }
            );

            let echo = peer.recv().await.unwrap();
            assert_eq!(echo.opcode, OpCode::Close);
            assert_eq!(&echo.payload[..], b"\x03\xE8bye");
            assert!(peer.recv().await.is_none(), "stream shut down after echo");

            assert!(ws.next_event().await.is_none());
            assert_eq!(ws.state().await, ConnectionState::Closed);
            assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
            assert!(matches!(
                ws.send("too late").await,
                Err(WebSocketError::SocketClosed)
            ));
        }

        #[tokio::test]
        async fn test_close_without_code() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::close_raw([])).await;

            assert_eq!(
                ws.next_event().await.unwrap().unwrap(),
                Event::Close {
                    code: None,
                    reason: String::new()
                }
            );
            let echo = peer.recv().await.unwrap();
            assert!(echo.payload.is_empty());
        }

        #[tokio::test]
        async fn test_into_stream() {
            let (ws, mut peer, _) = pair();

            peer.send(Frame::text("one")).await;
            peer.send(Frame::close(CloseCode::Away, "")).await;

            let events: Vec<_> = ws.into_stream().collect().await;
            assert_eq!(events.len(), 2);
            assert_eq!(*events[0].as_ref().unwrap(), Event::Text("one".into()));
            assert!(matches!(
                events[1],
                Ok(Event::Close {
                    code: Some(CloseCode::Away),
                    ..
                })
            ));
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_invalid_header_closes_with_protocol_error() {
            let (mut ws, peer, shutdowns) = pair();
            let Peer { mut reader, writer } = peer;
            let mut raw = writer.into_inner();

            tokio::io::AsyncWriteExt::write_all(&mut raw, &[0xC1, 0x00])
                .await
                .unwrap();

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::InvalidFrameHeader(0xC1)))
            ));
            assert!(ws.next_event().await.is_none());

            let notice = reader.next().await.unwrap().unwrap();
            assert_eq!(notice.opcode, OpCode::Close);
            assert_eq!(notice.close_code(), Some(CloseCode::Protocol));

            assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
            assert!(matches!(
                ws.ping("").await,
                Err(WebSocketError::SocketClosed)
            ));
        }

        #[tokio::test]
        async fn test_continuation_without_start() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::continuation("orphan")).await;

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::InvalidContinuationFrame))
            ));
            assert!(ws.is_closed().await);
        }

        #[tokio::test]
        async fn test_interleaved_messages() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::text("first").with_fin(false)).await;
            peer.send(Frame::binary("second")).await;

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::InvalidFragment))
            ));
        }

        #[tokio::test]
        async fn test_invalid_utf8() {
            let (mut ws, mut peer, _) = pair();

            peer.send(Frame::text([0xFF, 0xFE])).await;

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::InvalidUTF8))
            ));
            let notice = peer.recv().await.unwrap();
            assert_eq!(notice.close_code(), Some(CloseCode::Invalid));
        }

        #[tokio::test]
        async fn test_payload_limit() {
            let (mut ws, mut peer, _) = pair_with(Options::default().with_max_payload_read(16));

            peer.send(Frame::binary([0u8; 17])).await;

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::FrameTooLarge))
            ));
            let notice = peer.recv().await.unwrap();
            assert_eq!(notice.close_code(), Some(CloseCode::Size));
        }

        #[tokio::test]
        async fn test_eof_mid_frame() {
            let (mut ws, peer, _) = pair();
            let mut raw = peer.writer.into_inner();

            tokio::io::AsyncWriteExt::write_all(&mut raw, &[0x81, 0x05, b'h', b'e'])
                .await
                .unwrap();
            tokio::io::AsyncWriteExt::shutdown(&mut raw).await.unwrap();

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::StreamClosed))
            ));
            assert!(ws.next_event().await.is_none());
            assert!(ws.is_closed().await);
        }

        #[tokio::test]
        async fn test_eof_without_close_frame() {
            let (mut ws, peer, _) = pair();
            let mut raw = peer.writer.into_inner();
            tokio::io::AsyncWriteExt::shutdown(&mut raw).await.unwrap();

            assert!(matches!(
                ws.next_event().await,
                Some(Err(WebSocketError::StreamClosed))
            ));
        }
    }

    mod send_tests {
        use super::*;

        #[tokio::test]
        async fn test_send_selects_opcode_by_origin() {
            let (mut ws, mut peer, _) = pair();

            ws.send("text").await.unwrap();
            ws.send(vec![1u8, 2, 3]).await.unwrap();

            let frame = peer.recv().await.unwrap();
            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(&frame.payload[..], b"text");

            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(&frame.payload[..], &[1, 2, 3]);
        }

        #[tokio::test]
        async fn test_server_does_not_mask() {
            let (mut ws, peer, _) = pair();
            let Peer { mut reader, .. } = peer;

            ws.send("plain").await.unwrap();

            let frame = reader.next().await.unwrap().unwrap();
            assert!(!frame.is_masked());
            assert_eq!(&frame.payload[..], b"plain");
        }

        #[tokio::test]
        async fn test_configured_mask_key() {
            let key = [0xDE, 0xAD, 0xBE, 0xEF];
            let (mut ws, peer, _) = pair_with(Options::default().with_mask_key(key));
            let Peer { mut reader, .. } = peer;

            ws.send("masked").await.unwrap();
            ws.send("again").await.unwrap();

            for expected in [&b"masked"[..], &b"again"[..]] {
                let mut frame = reader.next().await.unwrap().unwrap();
                assert_eq!(frame.mask, Some(key));
                frame.unmask();
                assert_eq!(&frame.payload[..], expected);
            }
        }

        #[tokio::test]
        async fn test_client_masks_with_one_key() {
            let (local, remote) = tokio::io::duplex(1024);
            let mut ws = WebSocket::client(local);
            assert_eq!(ws.role(), Role::Client);

            let mut reader = FramedRead::new(remote, Decoder::new(usize::MAX));
            ws.send("a").await.unwrap();
            ws.send("b").await.unwrap();

            let first = reader.next().await.unwrap().unwrap();
            let second = reader.next().await.unwrap().unwrap();
            assert!(first.is_masked());
            assert_eq!(first.mask, second.mask);
        }

        #[tokio::test]
        async fn test_ping_uses_ping_opcode() {
            let (mut ws, mut peer, _) = pair();

            ws.ping("hb").await.unwrap();

            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.opcode, OpCode::Ping);
            assert_eq!(&frame.payload[..], b"hb");
        }

        #[tokio::test]
        async fn test_ping_payload_limit() {
            let (mut ws, _peer, _) = pair();
            assert!(matches!(
                ws.ping([0u8; 126]).await,
                Err(WebSocketError::ControlFrameTooLarge)
            ));
        }
    }

    mod close_tests {
        use super::*;

        #[tokio::test]
        async fn test_close_writes_frame_and_shuts_down() {
            let (mut ws, mut peer, shutdowns) = pair();

            ws.close(CloseCode::Normal, Some("done")).await.unwrap();

            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.opcode, OpCode::Close);
            assert_eq!(&frame.payload[..], b"\x03\xE8done");
            assert!(peer.recv().await.is_none());

            assert_eq!(ws.state().await, ConnectionState::Closed);
            assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_close_without_reason() {
            let (mut ws, mut peer, _) = pair();

            ws.close(CloseCode::Away, None).await.unwrap();

            let frame = peer.recv().await.unwrap();
            assert_eq!(&frame.payload[..], b"\x03\xE9");
        }

        #[tokio::test]
        async fn test_close_reason_fits_in_control_frame() {
            let (mut ws, mut peer, shutdowns) = pair();

            assert!(matches!(
                ws.close(CloseCode::Normal, Some(&"x".repeat(124))).await,
                Err(WebSocketError::ControlFrameTooLarge)
            ));
            assert_eq!(ws.state().await, ConnectionState::Open);
            assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

            // the longest reason still decodes on the other end
            let reason = "x".repeat(123);
            ws.close(CloseCode::Normal, Some(&reason)).await.unwrap();

            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.payload.len(), 125);
            assert_eq!(frame.close_reason(), reason);
        }

        #[tokio::test]
        async fn test_reserved_close_codes_are_rejected() {
            let (mut ws, _peer, shutdowns) = pair();

            for code in [CloseCode::Status, CloseCode::Abnormal, CloseCode::Tls] {
                let expected = u16::from(code);
                assert!(matches!(
                    ws.close(code, None).await,
                    Err(WebSocketError::InvalidCloseCode(c)) if c == expected
                ));
            }

            assert!(!ws.is_closed().await);
            assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
            ws.send("still open").await.unwrap();
        }

        #[tokio::test]
        async fn test_post_close_invariants() {
            let (mut ws, _peer, shutdowns) = pair();

            ws.close(CloseCode::Normal, None).await.unwrap();
            ws.close(CloseCode::Normal, None).await.unwrap();
            ws.sender().close(CloseCode::Away, Some("again")).await.unwrap();

            assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
            assert!(matches!(
                ws.send("x").await,
                Err(WebSocketError::SocketClosed)
            ));
            assert!(matches!(
                ws.ping("x").await,
                Err(WebSocketError::SocketClosed)
            ));
        }

        #[tokio::test]
        async fn test_close_reply_is_not_echoed_after_local_close() {
            let (mut ws, mut peer, shutdowns) = pair();

            ws.close(CloseCode::Normal, None).await.unwrap();
            assert_eq!(peer.recv().await.unwrap().opcode, OpCode::Close);

            // the peer answers the close handshake
            peer.send(Frame::close(CloseCode::Normal, "")).await;

            assert!(matches!(
                ws.next_event().await,
                Some(Ok(Event::Close {
                    code: Some(CloseCode::Normal),
                    ..
                }))
            ));
            assert!(peer.recv().await.is_none(), "no second close frame");
            assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_ping_after_local_close_is_not_answered() {
            let (mut ws, mut peer, _) = pair();

            ws.close(CloseCode::Normal, None).await.unwrap();
            peer.recv().await.unwrap();

            peer.send(Frame::ping("still there?")).await;
            assert!(matches!(
                ws.next_event().await,
                Some(Ok(Event::Ping(_)))
            ));
            assert!(peer.recv().await.is_none());
        }
    }

    mod bound_tests {
        use super::*;

        use std::{cell::Cell, marker::PhantomData};

        /// A stream that can move between threads but not be shared, like hyper's `Upgraded`.
        struct Unshared {
            inner: DuplexStream,
            _not_sync: PhantomData<Cell<()>>,
        }

        impl AsyncRead for Unshared {
            fn poll_read(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
            }
        }

        impl AsyncWrite for Unshared {
            fn poll_write(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<std::io::Result<usize>> {
                Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
            }

            fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
                Pin::new(&mut self.get_mut().inner).poll_flush(cx)
            }

            fn poll_shutdown(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
            ) -> Poll<std::io::Result<()>> {
                Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
            }
        }

        fn assert_send<T: Send>(_: &T) {}

        #[test]
        fn test_echo_loop_is_send_over_unshared_stream() {
            let (local, _remote) = tokio::io::duplex(64);
            let mut ws = WebSocket::server(Unshared {
                inner: local,
                _not_sync: PhantomData,
            });
            let sender = ws.sender();

            let echo = async move {
                while let Some(Ok(event)) = ws.next_event().await {
                    match event {
                        Event::Text(text) => ws.send(text).await?,
                        Event::Binary(data) => ws.send(data).await?,
                        _ => {}
                    }
                }
                ws.ping("bye").await?;
                let _ = ws.is_closed().await;
                ws.close(CloseCode::Normal, None).await
            };
            assert_send(&echo);

            let heartbeat = async move { sender.ping("beat").await };
            assert_send(&heartbeat);
        }

        #[tokio::test]
        async fn test_continuation_never_becomes_an_event() {
            let (mut ws, _peer, _) = pair();
            assert!(matches!(
                ws.on_frame(Frame::continuation("stray")).await,
                Err(WebSocketError::InvalidContinuationFrame)
            ));
        }
    }

    mod concurrency_tests {
        use super::*;

        #[tokio::test]
        async fn test_concurrent_writers_do_not_interleave() {
            let (ws, mut peer, _) = pair();
            let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 70_000]).collect();

            let tasks: Vec<_> = payloads
                .iter()
                .cloned()
                .map(|payload| {
                    let sender = ws.sender();
                    tokio::spawn(async move {
                        for _ in 0..5 {
                            sender.send(payload.clone()).await.unwrap();
                        }
                    })
                })
                .collect();

            let mut received = 0;
            while received < 20 {
                let frame = peer.recv().await.unwrap();
                assert_eq!(frame.opcode, OpCode::Binary);
                assert_eq!(frame.payload.len(), 70_000);
                // one writer per frame
                let first = frame.payload[0];
                assert!(frame.payload.iter().all(|b| *b == first));
                received += 1;
            }

            for task in tasks {
                task.await.unwrap();
            }
        }

        #[tokio::test]
        async fn test_sender_and_receive_path_share_the_lock() {
            let (mut ws, mut peer, _) = pair();
            let sender = ws.sender();

            for i in 0..10u8 {
                peer.send(Frame::ping([i])).await;
            }

            let writer = tokio::spawn(async move {
                for _ in 0..10 {
                    sender.send(vec![0u8; 10_000]).await.unwrap();
                }
            });

            for i in 0..10u8 {
                assert_eq!(
                    ws.next_event().await.unwrap().unwrap(),
                    Event::Ping(Bytes::from(vec![i]))
                );
            }
            writer.await.unwrap();

            let mut binaries = 0;
            let mut pongs = Vec::new();
            while binaries < 10 || pongs.len() < 10 {
                let frame = peer.recv().await.unwrap();
                match frame.opcode {
                    OpCode::Binary => {
                        assert_eq!(frame.payload.len(), 10_000);
                        binaries += 1;
                    }
                    OpCode::Pong => pongs.push(frame.payload[0]),
                    other => panic!("unexpected {other:?}"),
                }
            }
            assert_eq!(pongs, (0..10).collect::<Vec<u8>>());
        }
    }
}
