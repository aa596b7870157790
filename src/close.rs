//! Close status codes and close frame payloads
//! ([RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4)).
//!
//! A close frame payload is either empty, or a big-endian `u16` status code optionally
//! followed by a UTF-8 reason.
use bytes::Bytes;

/// Status code carried by a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away, e.g. a server shutting down.
    Away,
    /// 1002: the peer violated the protocol.
    Protocol,
    /// 1003: the peer sent a type of data this endpoint cannot accept.
    Unsupported,
    /// 1005: no status code was present. Never sent on the wire.
    Status,
    /// 1006: the connection dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007: a message carried data inconsistent with its type, e.g. non UTF-8 text.
    Invalid,
    /// 1008: a message violated the endpoint's policy.
    Policy,
    /// 1009: a message was too big to process.
    Size,
    /// 1010: the client expected an extension the server did not negotiate.
    Extension,
    /// 1011: the server hit an unexpected condition.
    Error,
    /// 1012: the service is restarting.
    Restart,
    /// 1013: try again later.
    Again,
    /// 1015: TLS handshake failure. Never sent on the wire.
    Tls,
    /// 1004, 1014 and 1016..=2999: reserved for future revisions of the protocol.
    Reserved(u16),
    /// 3000..=3999: registered with IANA for libraries and frameworks.
    Iana(u16),
    /// 4000..=4999: private use by applications.
    Library(u16),
    /// Anything below 1000 or above 4999.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if this code may appear in a close frame sent on the wire.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
                | CloseCode::Reserved(_)
                | CloseCode::Bad(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1004 | 1014 | 1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Builds a close frame payload: the big-endian code followed by the reason bytes.
pub fn encode_payload(code: CloseCode, reason: impl AsRef<[u8]>) -> Bytes {
    let reason = reason.as_ref();
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason);
    payload.into()
}

/// Splits a close frame payload into its code and reason.
///
/// Payloads shorter than two bytes carry no code. The reason is decoded lossily, so a
/// malformed reason never prevents the close handshake from completing.
pub fn decode_payload(payload: &[u8]) -> (Option<CloseCode>, String) {
    match payload {
        [hi, lo, reason @ ..] => (
            Some(CloseCode::from(u16::from_be_bytes([*hi, *lo]))),
            String::from_utf8_lossy(reason).into_owned(),
        ),
        _ => (None, String::new()),
    }
}
