//! The parallel write pipeline: [`ParGzWriter`].
//!
//! Writes smaller than a block accumulate in a small in-memory buffer; once
//! that buffer (or a single write) reaches the configured block size, its
//! contents are handed to the worker pool as one compression job and a
//! handle for the eventual compressed bytes is pushed onto a FIFO. The
//! owning thread drains that FIFO in submission order — never completion
//! order — writing each finished member to the sink as soon as it's at the
//! front of the queue, which is what keeps output byte-for-byte independent
//! of how the pool happens to schedule its workers.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use flate2::{Compress, Compression, FlushCompress};
use log::{debug, trace, warn};

use crate::check::Crc32;
use crate::member;
use crate::pool::{JobHandle, WorkerPool};
use crate::{default_write_threads, GzpError, DEFAULT_BLOCKSIZE};

type CompressedBlock = Result<(Vec<u8>, u32, u64), GzpError>;

fn compress_block(
    prefix: Option<Bytes>,
    payload: Bytes,
    level: Compression,
) -> CompressedBlock {
    let mut compressor = Compress::new(level, false);
    let mut out = Vec::with_capacity(payload.len() / 2 + 64);
    let mut crc = Crc32::new();

    if let Some(prefix) = &prefix {
        compressor.compress_vec(prefix, &mut out, FlushCompress::None)?;
        crc.update(prefix);
    }
    compressor.compress_vec(&payload, &mut out, FlushCompress::Finish)?;
    crc.update(&payload);

    let raw_len = prefix.map(|p| p.len()).unwrap_or(0) as u64 + payload.len() as u64;
    Ok((out, crc.sum(), raw_len))
}

/// Current wall-clock time as a gzip `MTIME` field (seconds since the Unix
/// epoch, truncated to u32 the same way the format does).
fn now_mtime() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Configures and builds a [`ParGzWriter`].
pub struct ParGzWriterBuilder {
    blocksize: usize,
    thread: usize,
    compression_level: Compression,
    mtime: Option<u32>,
    filename: Option<Vec<u8>>,
}

impl ParGzWriterBuilder {
    pub fn new() -> Self {
        Self {
            blocksize: DEFAULT_BLOCKSIZE,
            thread: 0,
            compression_level: Compression::new(9),
            mtime: None,
            filename: None,
        }
    }

    /// Minimum 1 byte; defaults to 10^8.
    pub fn blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize.max(1);
        self
    }

    /// `0` (the default) means "all available CPUs".
    pub fn thread(mut self, thread: usize) -> Self {
        self.thread = thread;
        self
    }

    pub fn compression_level(mut self, level: Compression) -> Self {
        self.compression_level = level;
        self
    }

    /// Embed this mtime in every member this writer produces. Defaults to
    /// the current wall-clock time (seconds since the Unix epoch,
    /// truncated to u32) if never called.
    pub fn mtime(mut self, mtime: u32) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Embed this filename (its `.gz` suffix stripped) in every member this
    /// writer produces. Silently omitted if it isn't Latin-1 representable.
    pub fn filename(mut self, filename: &str) -> Self {
        self.filename = member::sanitize_filename(filename);
        self
    }

    pub fn build<W: Write + Send + 'static>(self, writer: W) -> ParGzWriter<W> {
        let thread = if self.thread == 0 {
            default_write_threads()
        } else {
            self.thread
        };
        let mtime = self.mtime.unwrap_or_else(now_mtime);
        debug!(
            "opening parallel gzip writer: {} threads, blocksize {}",
            thread, self.blocksize
        );
        ParGzWriter {
            writer: Some(writer),
            pool: WorkerPool::new(thread),
            thread,
            blocksize: self.blocksize,
            compression_level: self.compression_level,
            mtime,
            filename: self.filename,
            small_buffer: BytesMut::new(),
            pending: VecDeque::new(),
            total_emitted: 0,
            closed: false,
        }
    }
}

impl Default for ParGzWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A `Write` implementation that splits its input into blocks, compresses
/// them across a worker pool, and writes each one out as its own
/// independently-decompressible, independently-seekable gzip member.
pub struct ParGzWriter<W: Write + Send + 'static> {
    writer: Option<W>,
    pool: WorkerPool,
    thread: usize,
    blocksize: usize,
    compression_level: Compression,
    mtime: u32,
    filename: Option<Vec<u8>>,
    small_buffer: BytesMut,
    pending: VecDeque<JobHandle<CompressedBlock>>,
    total_emitted: u64,
    closed: bool,
}

impl<W: Write + Send + 'static> ParGzWriter<W> {
    pub fn builder() -> ParGzWriterBuilder {
        ParGzWriterBuilder::new()
    }

    /// Accept `data`, splitting and submitting blocks as needed. Returns the
    /// number of bytes accepted, always `data.len()` unless a prior drain
    /// failed.
    pub fn write_data(&mut self, data: &[u8]) -> Result<usize, GzpError> {
        if self.closed {
            return Err(GzpError::ClosedStream);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let blocksize = self.blocksize;
        if data.len() >= 2 * blocksize {
            let mut offset = 0;
            let mut first = true;
            while offset < data.len() {
                let end = (offset + blocksize).min(data.len());
                let chunk = Bytes::copy_from_slice(&data[offset..end]);
                let prefix = if first { self.take_small_buffer() } else { None };
                first = false;
                self.submit_block(prefix, chunk);
                self.drain(false)?;
                offset = end;
            }
        } else if data.len() >= blocksize {
            let prefix = self.take_small_buffer();
            self.submit_block(prefix, Bytes::copy_from_slice(data));
        } else {
            self.small_buffer.extend_from_slice(data);
            if self.small_buffer.len() >= blocksize {
                let full = self.small_buffer.split().freeze();
                self.submit_block(None, full);
            }
        }

        self.drain(false)?;
        Ok(data.len())
    }

    /// Force every pending block to finish and be written, then flush the
    /// underlying sink. Does not close the stream.
    pub fn flush_data(&mut self) -> Result<(), GzpError> {
        self.drain(true)?;
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    /// Flush any buffered small-write bytes as a final member, drain the
    /// pool, and release the sink. Idempotent.
    pub fn close(&mut self) -> Result<(), GzpError> {
        if self.closed {
            return Ok(());
        }
        if !self.small_buffer.is_empty() {
            let full = self.small_buffer.split().freeze();
            self.submit_block(None, full);
        }
        self.drain(true)?;
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        self.closed = true;
        Ok(())
    }

    /// Number of uncompressed bytes written out as members so far.
    pub fn tell(&self) -> u64 {
        self.total_emitted
    }

    fn take_small_buffer(&mut self) -> Option<Bytes> {
        if self.small_buffer.is_empty() {
            None
        } else {
            Some(self.small_buffer.split().freeze())
        }
    }

    fn submit_block(&mut self, prefix: Option<Bytes>, payload: Bytes) {
        trace!(
            "submitting block: {} prefix bytes, {} payload bytes",
            prefix.as_ref().map(|p| p.len()).unwrap_or(0),
            payload.len()
        );
        let level = self.compression_level;
        let handle = self.pool.submit(move || compress_block(prefix, payload, level));
        self.pending.push_back(handle);
    }

    /// Write out finished members in submission order. With `force`, drains
    /// everything; otherwise keeps up to `thread` jobs in flight so writers
    /// stay ahead of compressors without unbounded memory growth.
    fn drain(&mut self, force: bool) -> Result<(), GzpError> {
        while (force && !self.pending.is_empty()) || self.pending.len() > self.thread {
            let handle = self.pending.pop_front().expect("checked non-empty above");
            let (compressed, crc, raw_len) = handle.wait()??;
            let writer = self.writer.as_mut().ok_or(GzpError::ClosedStream)?;
            member::write_member(
                writer,
                &compressed,
                crc,
                raw_len,
                self.filename.as_deref(),
                self.mtime,
            )?;
            self.total_emitted += raw_len;
        }
        Ok(())
    }
}

impl<W: Write + Send + 'static> Write for ParGzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_data(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_data()?)
    }
}

impl<W: Write + Send + 'static> Drop for ParGzWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("error closing ParGzWriter during drop: {}", e);
            }
        }
    }
}
