//! Server-side upgrade of a hyper request.

use std::{
    borrow::BorrowMut,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{header, upgrade::Upgraded, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pin_project::pin_project;

use crate::{handshake, Result, WebSocketError};

use super::{Options, Role, WebSocket};

/// Response sent back to the client to complete the handshake.
///
/// The body is empty: after the `101 Switching Protocols` status line and headers, the
/// connection speaks the WebSocket protocol.
pub type HttpResponse = Response<Empty<Bytes>>;

/// Result of [`accept`].
///
/// Both parts must be handled for the upgrade to succeed:
/// 1. Return the response from the service so hyper sends it.
/// 2. Await the future to obtain the connection.
pub type UpgradeResult = Result<(HttpResponse, UpgradeFut)>;

/// A server connection over a stream upgraded by hyper.
pub type UpgradedWebSocket = WebSocket<TokioIo<Upgraded>>;

/// Accepts a WebSocket upgrade request with default [`Options`].
///
/// # Errors
/// [`WebSocketError::NotUpgradable`] if the request lacks `Upgrade: websocket` or
/// `Sec-WebSocket-Key`.
pub fn accept<B>(request: impl BorrowMut<Request<B>>) -> UpgradeResult {
    accept_with_options(request, Options::default())
}

/// Accepts a WebSocket upgrade request.
///
/// Returns the `101 Switching Protocols` response carrying the `Sec-WebSocket-Accept`
/// value derived from the client key, and a future resolving to the server-side
/// connection once hyper hands over the upgraded stream.
pub fn accept_with_options<B>(
    mut request: impl BorrowMut<Request<B>>,
    options: Options,
) -> UpgradeResult {
    let request = request.borrow_mut();

    if !handshake::is_upgrade_request(request.headers()) {
        return Err(WebSocketError::NotUpgradable);
    }

    let key = request
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(WebSocketError::NotUpgradable)?;

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(
            header::SEC_WEBSOCKET_ACCEPT,
            handshake::compute_accept(key.as_bytes()),
        )
        .body(Empty::new())
        .expect("bug: failed to build response");

    #[cfg(feature = "logging")]
    log::debug!("accepted websocket upgrade for {}", request.uri());

    let fut = UpgradeFut {
        inner: hyper::upgrade::on(request),
        options: Some(options),
    };

    Ok((response, fut))
}

/// Future resolving to the server-side [`WebSocket`] once hyper completed the upgrade.
///
/// # Example
/// ```no_run
/// use hyper::{body::Incoming, Request};
/// use wsock::{HttpResponse, UpgradeFut};
///
/// async fn handle_client(fut: UpgradeFut) -> wsock::Result<()> {
///     let mut ws = fut.await?;
///     while let Some(event) = ws.next_event().await {
///         println!("{:?}", event?);
///     }
///     Ok(())
/// }
///
/// async fn server_upgrade(mut req: Request<Incoming>) -> wsock::Result<HttpResponse> {
///     let (response, fut) = wsock::accept(&mut req)?;
///
///     tokio::spawn(async move {
///         if let Err(e) = handle_client(fut).await {
///             eprintln!("Error in websocket connection: {e}");
///         }
///     });
///
///     Ok(response)
/// }
/// ```
#[pin_project]
#[derive(Debug)]
pub struct UpgradeFut {
    #[pin]
    inner: hyper::upgrade::OnUpgrade,
    options: Option<Options>,
}

impl Future for UpgradeFut {
    type Output = Result<UpgradedWebSocket>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let upgraded = match this.inner.poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(x) => x?,
        };

        let options = this.options.take().unwrap_or_default();

        Poll::Ready(Ok(WebSocket::from_stream(
            TokioIo::new(upgraded),
            Role::Server,
            options,
        )))
    }
}
