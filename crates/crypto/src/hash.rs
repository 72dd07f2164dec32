//! # BLAKE3 Hashing Utilities
//!
//! This module provides the BLAKE3 hashing functions used throughout
//! Conductor for content addressing, message digests, Merkle trees and
//! the sequential VDF chain.
//!
//! ## Functions
//!
//! - `blake3_hash` - Hash a single byte slice
//! - `blake3_concat` - Hash multiple byte slices concatenated
//!
//! ## Streaming Hasher
//!
//! For large or incremental data, use the `Hasher` struct:
//!
//! ```rust
//! use conductor_crypto::hash::Hasher;
//!
//! let mut hasher = Hasher::new();
//! hasher.update(b"hello");
//! hasher.update(b" world");
//! let hash = hasher.finalize();
//! ```

/// Compute the BLAKE3 hash of the input data.
///
/// This is the standard hash function used throughout Conductor for
/// event fingerprints, batch digests, day seeds and block digests.
///
/// # Arguments
///
/// * `data` - The byte slice to hash
///
/// # Returns
///
/// A 32-byte array containing the BLAKE3 hash
///
/// # Example
///
/// ```rust
/// use conductor_crypto::blake3_hash;
///
/// let hash = blake3_hash(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
#[inline]
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute the BLAKE3 hash of multiple concatenated inputs.
///
/// This is more efficient than manually concatenating the inputs
/// and then hashing, as it avoids allocating a temporary buffer.
///
/// # Arguments
///
/// * `parts` - A slice of byte slices to hash together
///
/// # Returns
///
/// A 32-byte array containing the BLAKE3 hash of the concatenated inputs
///
/// # Example
///
/// ```rust
/// use conductor_crypto::blake3_concat;
///
/// let hash = blake3_concat(&[b"hello", b" ", b"world"]);
/// // Equivalent to: blake3_hash(b"hello world")
/// ```
#[inline]
pub fn blake3_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// A streaming BLAKE3 hasher for incremental hashing.
///
/// Use this when you need to hash data that arrives in chunks
/// or when the full data is too large to fit in memory.
///
/// # Example
///
/// ```rust
/// use conductor_crypto::Hasher;
///
/// let mut hasher = Hasher::new();
/// hasher.update(b"part1");
/// hasher.update(b"part2");
/// let hash = hasher.finalize();
/// ```
#[derive(Clone)]
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a new BLAKE3 hasher.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Update the hasher with additional data.
    ///
    /// This can be called multiple times to feed data incrementally.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Update the hasher with multiple data chunks.
    #[inline]
    pub fn update_many(&mut self, parts: &[&[u8]]) {
        for part in parts {
            self.inner.update(part);
        }
    }

    /// Finalize the hasher and return the hash.
    ///
    /// This consumes the hasher. To continue hashing, create a new `Hasher`.
    #[inline]
    pub fn finalize(self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }

    /// Fill `out` with extendable output derived from the absorbed data.
    ///
    /// Used by the threshold-encryption keystream, which needs more than
    /// 32 bytes of output.
    #[inline]
    pub fn finalize_xof_into(self, out: &mut [u8]) {
        self.inner.finalize_xof().fill(out);
    }

    /// Reset the hasher to its initial state.
    #[inline]
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").finish_non_exhaustive()
    }
}
