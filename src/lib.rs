//! `pgz` — a parallel, randomly-seekable gzip codec.
//!
//! A `pgz` stream is an ordinary RFC 1952 gzip file made of many independent
//! members, each one a self-contained `flate2`-compressed block. Every member
//! this crate writes carries a small `'I','G'` subfield in its `FEXTRA` extra
//! field recording the member's total on-disk size, which lets [`index`]
//! build a seek table without decompressing anything. Streams produced by
//! other tools (no subfield, or a single member) are still readable: the
//! reader falls back to ordinary synchronous streaming DEFLATE in that case.
//!
//! The four pieces:
//!
//! - [`member`] reads and writes individual members (header, body, trailer).
//! - [`write`] is the parallel write pipeline ([`ParGzWriter`]).
//! - [`read`] is the parallel read pipeline ([`ParGzReader`]).
//! - [`index`] builds and queries a seek table ([`GzIndex`]).
//!
//! [`pool`] is the worker-pool adaptor shared by the write and read
//! pipelines.

pub mod check;
pub mod index;
pub mod member;
pub mod pool;
pub mod read;
pub mod write;

pub use flate2::Compression;
pub use index::{GzIndex, IndexEntry};
pub use read::{ParGzReader, ParGzReaderBuilder};
pub use write::{ParGzWriter, ParGzWriterBuilder};

use thiserror::Error;

/// Default block size for both pipelines: 10^8 bytes, matching the reference
/// implementation this format was distilled from.
pub const DEFAULT_BLOCKSIZE: usize = 100_000_000;

/// Chunk size used by the synchronous-fallback read path when a member has
/// no indexing subfield and must be streamed the ordinary way.
pub const SYNC_CHUNK_SIZE: usize = 64 * 1024;

/// Everything that can go wrong reading or writing a `pgz` stream.
#[derive(Error, Debug)]
pub enum GzpError {
    /// The next two bytes were not `1F 8B`.
    #[error("not a gzip stream: bad magic bytes")]
    BadMagic,

    /// The member's compression method byte was not 8 (DEFLATE).
    #[error("unsupported compression method (expected DEFLATE)")]
    UnknownMethod,

    /// The stream ended before a complete member (or its trailer) was read.
    #[error("stream ended before a complete gzip member was read")]
    TruncatedStream,

    /// A member's computed CRC-32 did not match its trailer.
    #[error("CRC32 mismatch: computed {found:#010x}, trailer says {expected:#010x}")]
    CrcMismatch { found: u32, expected: u32 },

    /// A member's computed size did not match its trailer ISIZE.
    #[error("size mismatch: decompressed {found} bytes, trailer says {expected}")]
    SizeMismatch { found: u64, expected: u64 },

    /// An index was requested over a stream that lacks the `'I','G'`
    /// subfield on one or more members.
    #[error("stream is not indexable: a member has no 'I','G' subfield")]
    NotIndexable,

    /// Attempted to write through a reader, or read through a writer.
    #[error("invalid operation for this stream's mode: {0}")]
    InvalidMode(&'static str),

    /// The raw-deflate compressor rejected input.
    #[error("compression failed: {0}")]
    CompressError(#[from] flate2::CompressError),

    /// The raw-deflate decompressor rejected input.
    #[error("decompression failed: {0}")]
    DecompressError(#[from] flate2::DecompressError),

    /// An operation was attempted after the stream was closed.
    #[error("stream is closed")]
    ClosedStream,

    /// A job could not be handed to the worker pool (the pool has shut
    /// down, which should only happen after a prior fatal error).
    #[error("failed to submit job to worker pool")]
    ChannelSend,

    /// A job result could not be retrieved from the worker pool.
    #[error("failed to receive job result from worker pool")]
    ChannelReceive,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<GzpError> for std::io::Error {
    fn from(e: GzpError) -> Self {
        match e {
            GzpError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

/// Number of worker threads to use when the caller asks for the default
/// (`0`, or omitted): all available CPUs for compression, half for
/// decompression (decompression is cheaper per byte, so fewer workers tend
/// to saturate I/O just as well while leaving headroom for the caller).
pub(crate) fn default_write_threads() -> usize {
    num_cpus::get().max(1)
}

pub(crate) fn default_read_threads() -> usize {
    (num_cpus::get() / 2).max(1)
}
