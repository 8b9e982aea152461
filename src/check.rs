//! CRC-32 checksum tracking for compressed members.
//!
//! A [`Crc32`] wraps [`flate2::Crc`] and additionally tracks the number of
//! bytes that have gone into it, since the gzip ISIZE trailer needs that
//! count independent of the running checksum.

use flate2::Crc;

/// Running CRC-32 plus byte count, the pair that gzip stores in a member's
/// 8-byte trailer.
#[derive(Debug)]
pub struct Crc32 {
    crc: Crc,
}

impl Crc32 {
    /// Create a fresh, zeroed checksum.
    #[inline]
    pub fn new() -> Self {
        Self { crc: Crc::new() }
    }

    /// Feed more bytes into the running checksum.
    #[inline]
    pub fn update(&mut self, bytes: &[u8]) {
        self.crc.update(bytes);
    }

    /// The CRC-32 of all bytes seen so far.
    #[inline]
    pub fn sum(&self) -> u32 {
        self.crc.sum()
    }

    /// The number of bytes seen so far, truncated to u32 (matches ISIZE's
    /// mod-2^32 semantics).
    #[inline]
    pub fn amount(&self) -> u32 {
        self.crc.amount()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
