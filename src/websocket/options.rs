use std::time::Duration;

use super::{MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// Configuration options for a WebSocket connection.
///
/// `Options` bounds how much a connection will read and buffer, and decides whether frames
/// written by this endpoint are masked.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use wsock::Options;
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_fragment_timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Maximum allowed payload size for a single incoming frame, in bytes.
    ///
    /// Default: 1 MiB as defined in [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,

    /// Maximum size of a message reassembled from fragments, in bytes.
    ///
    /// Default: [`MAX_READ_BUFFER`] (2 MiB), or twice `max_payload_read` if that is set.
    pub max_read_buffer: Option<usize>,

    /// Maximum time between the first and the last fragment of a message.
    ///
    /// Default: no limit.
    pub fragment_timeout: Option<Duration>,

    /// Key used to mask every frame this endpoint writes.
    ///
    /// Default: none for servers, a random key drawn once per connection for clients.
    pub mask_key: Option<[u8; 4]>,
}

impl Options {
    /// Sets the maximum allowed payload size of a single incoming frame.
    ///
    /// Frames declaring a longer payload are rejected before their payload is read.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a message reassembled from fragments.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Fails the receive path with [`FragmentTimeout`](crate::WebSocketError::FragmentTimeout)
    /// when the fragments of a message take longer than `timeout` to arrive.
    pub fn with_fragment_timeout(self, timeout: Duration) -> Self {
        Self {
            fragment_timeout: Some(timeout),
            ..self
        }
    }

    /// Masks every outgoing frame with `key`, regardless of the connection role.
    pub fn with_mask_key(self, key: [u8; 4]) -> Self {
        Self {
            mask_key: Some(key),
            ..self
        }
    }

    pub(super) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(super) fn read_buffer_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read * 2)
                .unwrap_or(MAX_READ_BUFFER),
        )
    }
}
