//! # wsock
//! Implementation of the WebSocket protocol (RFC 6455) on top of an already established
//! byte stream: frame encoding and decoding, masking, fragmentation reassembly, automatic
//! handling of control frames and the server side of the opening handshake.
//!
//! The HTTP plumbing around the handshake is delegated to [`hyper`]; once a connection is
//! upgraded, everything else happens over any `tokio` stream implementing
//! [`AsyncRead`](tokio::io::AsyncRead) and [`AsyncWrite`](tokio::io::AsyncWrite).
//!
//! # Features
//! - `logging`: Enables debug logging of the handshake, control frames and connection teardown
//!   using the `log` crate.
//! - `simd`: Validates text messages with `simdutf8`.
//!
//! # Server Example
//! ```no_run
//! use hyper::{body::Incoming, Request};
//! use wsock::{Event, HttpResponse};
//!
//! async fn server_upgrade(mut req: Request<Incoming>) -> wsock::Result<HttpResponse> {
//!     let (response, fut) = wsock::accept(&mut req)?;
//!
//!     tokio::spawn(async move {
//!         let Ok(mut ws) = fut.await else { return };
//!         while let Some(Ok(event)) = ws.next_event().await {
//!             match event {
//!                 Event::Text(text) => {
//!                     let _ = ws.send(text).await;
//!                 }
//!                 Event::Binary(data) => {
//!                     let _ = ws.send(data).await;
//!                 }
//!                 _ => {}
//!             }
//!         }
//!     });
//!
//!     Ok(response)
//! }
//! ```
//!
//! # Concurrent writers
//! The receive path answers pings and close frames on its own. Application writes from other
//! tasks go through a [`Sender`], which shares the same write lock so frames never interleave
//! on the wire:
//! ```no_run
//! use tokio::io::DuplexStream;
//! use wsock::WebSocket;
//!
//! async fn heartbeat(ws: &WebSocket<DuplexStream>) {
//!     let sender = ws.sender();
//!     tokio::spawn(async move {
//!         while sender.ping("beat").await.is_ok() {
//!             tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!         }
//!     });
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod mask;
mod websocket;

use thiserror::Error;

pub use close::CloseCode;
pub use event::{Data, Event};
pub use frame::{Frame, OpCode};
pub use websocket::*;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors fall into a few groups:
///
/// - Protocol errors detected while reading frames (malformed headers, bad fragmentation)
/// - Data validation errors (invalid UTF-8, oversized payloads)
/// - Lifecycle errors (the stream ended, the connection is closed, the request cannot be upgraded)
/// - I/O and HTTP errors from the collaborating layers
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The first header byte of a frame carries reserved bits or an unknown opcode.
    /// The offending byte is included.
    #[error("Invalid frame header (byte={0:#04x})")]
    InvalidFrameHeader(u8),

    /// A control frame (close, ping or pong) was received with the FIN bit cleared.
    /// RFC 6455 forbids fragmenting control frames.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame declared a payload longer than 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// A frame or a reassembled message exceeds the configured size limits.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A new text or binary frame started while a fragmented message was still in progress.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived without a preceding text or binary frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// The fragments of a message did not all arrive within the configured timeout.
    #[error("Fragmented message timed out")]
    FragmentTimeout,

    /// The close code may not be sent in a close frame (1005, 1006, 1015 and reserved values).
    #[error("Close code {0} is not allowed on the wire")]
    InvalidCloseCode(u16),

    /// A text message is not valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// The underlying stream ended in the middle of a frame, or before a close frame was seen.
    #[error("Stream closed")]
    StreamClosed,

    /// An outbound operation was attempted after the connection was closed.
    /// The connection cannot be used for writing anymore.
    #[error("Socket is closed")]
    SocketClosed,

    /// The HTTP request does not carry `Upgrade: websocket` and a `Sec-WebSocket-Key`.
    #[error("Request is not upgradable to a WebSocket")]
    NotUpgradable,

    /// Wraps standard I/O errors from the underlying stream.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from hyper while completing the connection upgrade.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}
