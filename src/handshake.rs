//! Server side of the opening handshake
//! ([RFC 6455 Section 4.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2)).
//!
//! ```http
//! GET /chat HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//!
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
use base64::prelude::*;
use http::{header, HeaderMap};
use sha1::{Digest, Sha1};

/// Appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
///
/// ```
/// assert_eq!(
///     wsock::handshake::compute_accept(b"dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Returns `true` if the headers ask for a WebSocket upgrade.
///
/// Only `Upgrade: websocket` (any case) and the presence of `Sec-WebSocket-Key` are
/// required. `Sec-WebSocket-Version` and `Connection` are not inspected.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|h| h.trim().eq_ignore_ascii_case("websocket"));

    upgrade && headers.contains_key(header::SEC_WEBSOCKET_KEY)
}
