//! XOR masking of frame payloads ([RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3)).
//!
//! Masking is an involution: applying the same key twice yields the original bytes, so
//! [`apply_mask`] serves both the write path (mask) and the read path (unmask).

/// Masks or unmasks `buf` in place with `key`.
///
/// Byte `i` is XORed with `key[i % 4]`. The bulk of the buffer is processed four bytes at
/// a time; the tail falls back to byte-wise processing.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let word = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let masked = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // the remainder starts on a multiple of 4, so the key index restarts at 0
    apply_mask_bytewise(chunks.into_remainder(), key);
}

#[inline]
fn apply_mask_bytewise(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
