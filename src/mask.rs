//! WebSocket payload masking
//!
//! XOR masking is its own inverse, so the same routine masks outbound
//! payloads and unmasks inbound ones. Payloads arrive and leave in
//! arbitrary chunks, so every entry point takes the byte offset of the
//! chunk within its frame and keeps the mask phase continuous.
//!
//! Supports multiple RNG backends via feature flags:
//! - `fastrand`: fast PRNG (default)
//! - `getrandom`: OS-backed RNG

/// Apply a 4-byte mask in place, starting at mask index 0.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // Process 8 bytes at a time using u64
    let mask_u64 = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // Remainder starts on a multiple of 8, so the phase is still 0
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Apply a mask to a chunk that starts `offset` bytes into the frame payload.
///
/// Calling this on consecutive chunks with their running offsets yields the
/// same bytes as one `apply_mask` over the whole payload.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: u64) {
    let offset = (offset & 3) as usize;
    if offset == 0 {
        apply_mask(data, mask);
        return;
    }

    // Rotate mask to account for offset
    let rotated_mask = [
        mask[offset],
        mask[(offset + 1) & 3],
        mask[(offset + 2) & 3],
        mask[(offset + 3) & 3],
    ];
    apply_mask(data, rotated_mask);
}

/// Generate a fresh mask key for an outbound frame.
///
/// The key obfuscates the wire bytes; it does not need to be
/// cryptographically strong. If multiple RNG features are enabled,
/// `getrandom` wins.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    generate_mask_inner()
}

#[cfg(feature = "getrandom")]
#[inline]
fn generate_mask_inner() -> [u8; 4] {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_err() {
        // OS RNG unavailable: fall back to a time-derived key
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        buf = nanos.to_ne_bytes();
    }
    buf
}

#[cfg(all(feature = "fastrand", not(feature = "getrandom")))]
#[inline]
fn generate_mask_inner() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}

#[cfg(not(any(feature = "fastrand", feature = "getrandom")))]
fn generate_mask_inner() -> [u8; 4] {
    compile_error!("At least one RNG feature must be enabled: fastrand or getrandom");
}
