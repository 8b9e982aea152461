//! The parallel read pipeline: [`ParGzReader`].
//!
//! The owning thread does all stream I/O: it parses member headers one at a
//! time, and for each member that carries the `'I','G'` indexing subfield it
//! reads the whole compressed body up front and hands it to the worker pool
//! as a decompression job, keeping up to `thread` jobs in flight before it
//! has to block. Output bytes are appended to the caller's buffer in
//! submission order, so a reader never needs to reorder anything itself.
//!
//! A member with no subfield (a foreign gzip file, or the tail member of a
//! stream some other tool appended to) can't be sized without decompressing
//! it, so it's handled differently: the owning thread decompresses it
//! synchronously, one chunk at a time, pushing back whatever the
//! decompressor didn't consume so the following member's header is never
//! swallowed.

use std::collections::VecDeque;
use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Bytes, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, trace};

use crate::check::Crc32;
use crate::member::{self, Pushback};
use crate::pool::{JobHandle, WorkerPool};
use crate::{default_read_threads, GzpError, SYNC_CHUNK_SIZE};

struct DecodedBlock {
    bytes: Vec<u8>,
    computed_crc: u32,
    trailer_crc: u32,
    rsize: u64,
}

fn decode_block(compressed: Bytes, trailer_crc: u32, trailer_isize: u32) -> Result<DecodedBlock, GzpError> {
    let mut decoder = Decompress::new(false);
    let mut out = Vec::with_capacity(trailer_isize as usize);
    decoder.decompress_vec(&compressed, &mut out, FlushDecompress::Finish)?;

    // Tolerate decoders that leave a residue of unconsumed input at the end
    // of a member's body by appending it; a well-formed member never has
    // any, so this is a no-op in the common case.
    let consumed = decoder.total_in() as usize;
    if consumed < compressed.len() {
        out.extend_from_slice(&compressed[consumed..]);
    }

    let mut crc = Crc32::new();
    crc.update(&out);
    Ok(DecodedBlock {
        bytes: out,
        computed_crc: crc.sum(),
        trailer_crc,
        rsize: trailer_isize as u64,
    })
}

/// Configures and builds a [`ParGzReader`].
pub struct ParGzReaderBuilder {
    thread: usize,
}

impl ParGzReaderBuilder {
    pub fn new() -> Self {
        Self { thread: 0 }
    }

    /// `0` (the default) means half the available CPUs.
    pub fn thread(mut self, thread: usize) -> Self {
        self.thread = thread;
        self
    }

    pub fn build<R: Read + Send + 'static>(self, reader: R) -> ParGzReader<R> {
        let thread = if self.thread == 0 {
            default_read_threads()
        } else {
            self.thread
        };
        debug!("opening parallel gzip reader: {} threads", thread);
        ParGzReader {
            reader: Some(Pushback::new(reader)),
            pool: WorkerPool::new(thread),
            thread,
            pending: VecDeque::new(),
            out_buffer: BytesMut::new(),
            eof: false,
            bytes_produced: 0,
            sync: None,
        }
    }
}

impl Default for ParGzReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the synchronous streaming-decompression fallback, active while
/// decoding a single non-indexable member.
struct SyncState {
    decoder: Decompress,
    crc: Crc32,
}

/// A `Read` implementation over a multi-member gzip stream. Indexable
/// members are decompressed in parallel; members without the indexing
/// subfield are streamed synchronously.
pub struct ParGzReader<R: Read + Send + 'static> {
    reader: Option<Pushback<R>>,
    pool: WorkerPool,
    thread: usize,
    pending: VecDeque<JobHandle<Result<DecodedBlock, GzpError>>>,
    out_buffer: BytesMut,
    eof: bool,
    bytes_produced: u64,
    sync: Option<SyncState>,
}

impl<R: Read + Send + 'static> ParGzReader<R> {
    pub fn builder() -> ParGzReaderBuilder {
        ParGzReaderBuilder::new()
    }

    /// Read up to `buf.len()` decompressed bytes. Returns `0` only at the
    /// true end of the stream.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, GzpError> {
        loop {
            if !self.out_buffer.is_empty() {
                let n = buf.len().min(self.out_buffer.len());
                let chunk = self.out_buffer.split_to(n);
                buf[..n].copy_from_slice(&chunk);
                self.bytes_produced += n as u64;
                return Ok(n);
            }

            if self.sync.is_some() {
                self.sync_step()?;
                continue;
            }

            // Keep the pipeline full: parse and submit new members while we
            // have worker capacity and haven't hit end of stream. A `false`
            // result means the member turned out non-indexable (now in
            // `self.sync`) or the stream ended (`self.eof`); either way,
            // loop back around and let the top of the loop react to it.
            if !self.eof && self.pending.len() < self.thread {
                self.parse_next_member()?;
                continue;
            }

            if let Some(handle) = self.pending.pop_front() {
                let block = handle.wait()??;
                if block.bytes.len() as u64 != block.rsize {
                    return Err(GzpError::SizeMismatch {
                        found: block.bytes.len() as u64,
                        expected: block.rsize,
                    });
                }
                if block.computed_crc != block.trailer_crc {
                    return Err(GzpError::CrcMismatch {
                        found: block.computed_crc,
                        expected: block.trailer_crc,
                    });
                }
                self.out_buffer.extend_from_slice(&block.bytes);
                continue;
            }

            if self.eof {
                return Ok(0);
            }
        }
    }

    /// Read the whole remaining stream into a single buffer.
    pub fn read_all(&mut self) -> Result<Vec<u8>, GzpError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = self.read_data(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Number of decompressed bytes produced to the caller so far.
    pub fn tell(&self) -> u64 {
        self.bytes_produced
    }

    /// Parse the next member header. Returns `true` if an indexable member
    /// was submitted to the pool (caller should loop and keep filling the
    /// pipeline), `false` if the stream ended or a non-indexable member was
    /// entered (in which case `self.sync` is now set, or `self.eof` is).
    fn parse_next_member(&mut self) -> Result<bool, GzpError> {
        let reader = self.reader.as_mut().ok_or(GzpError::ClosedStream)?;
        let header = match member::read_header(reader)? {
            None => {
                self.eof = true;
                return Ok(false);
            }
            Some(h) => h,
        };

        match header.member_size {
            Some(member_size) => {
                let body_size = (member_size as usize)
                    .checked_sub(header.header_size + 8)
                    .ok_or(GzpError::TruncatedStream)?;
                let mut compressed = vec![0u8; body_size];
                reader.read_exact(&mut compressed)?;
                let (trailer_crc, trailer_isize) = member::read_trailer(reader)?;

                trace!("submitting indexable member: {} compressed bytes", body_size);
                let compressed = Bytes::from(compressed);
                let handle = self
                    .pool
                    .submit(move || decode_block(compressed, trailer_crc, trailer_isize));
                self.pending.push_back(handle);
                Ok(true)
            }
            None => {
                debug!("member has no indexing subfield, falling back to synchronous decode");
                self.sync = Some(SyncState {
                    decoder: Decompress::new(false),
                    crc: Crc32::new(),
                });
                Ok(false)
            }
        }
    }

    /// Advance the synchronous fallback by one chunk. Returns `true` if any
    /// bytes were appended to `out_buffer` or the member completed (so the
    /// caller should loop back around), `false` if it made no progress (in
    /// practice only possible right at a truncated stream, which is an
    /// error, not a quiet stop).
    fn sync_step(&mut self) -> Result<bool, GzpError> {
        let mut chunk = [0u8; SYNC_CHUNK_SIZE];
        let n = {
            let reader = self.reader.as_mut().ok_or(GzpError::ClosedStream)?;
            reader.read(&mut chunk)?
        };
        if n == 0 {
            return Err(GzpError::TruncatedStream);
        }
        let input = &chunk[..n];

        let state = self.sync.as_mut().expect("sync_step only called while sync is Some");
        let mut out = vec![0u8; SYNC_CHUNK_SIZE.max(n * 4)];
        let before_in = state.decoder.total_in();
        let before_out = state.decoder.total_out();
        let status = state.decoder.decompress(input, &mut out, FlushDecompress::None)?;
        let consumed = (state.decoder.total_in() - before_in) as usize;
        let produced = (state.decoder.total_out() - before_out) as usize;

        state.crc.update(&out[..produced]);
        self.out_buffer.extend_from_slice(&out[..produced]);

        if consumed < input.len() {
            self.reader.as_mut().unwrap().unread(&input[consumed..]);
        }

        if status == Status::StreamEnd {
            self.finish_sync_member()?;
        }

        Ok(produced > 0 || status == Status::StreamEnd)
    }

    /// Read the trailer following a synchronously-decoded member, validate
    /// it, and return to indexable-dispatch mode.
    fn finish_sync_member(&mut self) -> Result<(), GzpError> {
        let state = self.sync.take().expect("finish_sync_member requires sync state");
        let reader = self.reader.as_mut().ok_or(GzpError::ClosedStream)?;
        let crc = reader.read_u32::<LittleEndian>().map_err(map_truncated)?;
        let isize_val = reader.read_u32::<LittleEndian>().map_err(map_truncated)?;

        if state.crc.sum() != crc {
            return Err(GzpError::CrcMismatch {
                found: state.crc.sum(),
                expected: crc,
            });
        }
        if state.crc.amount() != isize_val {
            return Err(GzpError::SizeMismatch {
                found: state.crc.amount() as u64,
                expected: isize_val as u64,
            });
        }
        Ok(())
    }
}

fn map_truncated(e: io::Error) -> GzpError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        GzpError::TruncatedStream
    } else {
        GzpError::Io(e)
    }
}

impl<R: Read + Send + 'static> Read for ParGzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_data(buf)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::ParGzWriterBuilder;
    use std::io::Write;

    fn write_multi_member(blocksize: usize, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = ParGzWriterBuilder::new().blocksize(blocksize).thread(3).build(&mut out);
        writer.write_all(data).unwrap();
        writer.close().unwrap();
        out
    }

    #[test]
    fn test_reads_back_multi_member_stream() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let stream = write_multi_member(4_096, &data);
        let mut reader = ParGzReaderBuilder::new().thread(4).build(&stream[..]);
        let result = reader.read_all().unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_reads_foreign_single_member_gzip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"not produced by this crate at all").unwrap();
        let plain = encoder.finish().unwrap();

        let mut reader = ParGzReaderBuilder::new().thread(2).build(&plain[..]);
        let result = reader.read_all().unwrap();
        assert_eq!(result, b"not produced by this crate at all");
    }

    #[test]
    fn test_empty_stream_reads_as_empty() {
        let stream = write_multi_member(1_000, b"");
        let mut reader = ParGzReaderBuilder::new().build(&stream[..]);
        assert_eq!(reader.read_all().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_detects_corrupted_crc() {
        let data = vec![9u8; 5_000];
        let mut stream = write_multi_member(5_000, &data);
        // Flip a byte inside the compressed body, well clear of the header.
        let i = stream.len() - 20;
        stream[i] ^= 0xFF;

        let mut reader = ParGzReaderBuilder::new().build(&stream[..]);
        let err = reader.read_all().unwrap_err();
        assert!(matches!(
            err,
            GzpError::CrcMismatch { .. } | GzpError::DecompressError(_)
        ));
    }

    #[test]
    fn test_detects_truncated_stream() {
        let data = vec![3u8; 5_000];
        let stream = write_multi_member(5_000, &data);
        let truncated = &stream[..stream.len() - 4];
        let mut reader = ParGzReaderBuilder::new().build(truncated);
        assert!(reader.read_all().is_err());
    }

    #[test]
    fn test_small_read_buffer_still_reassembles_whole_stream() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 97) as u8).collect();
        let stream = write_multi_member(3_000, &data);
        let mut reader = ParGzReaderBuilder::new().thread(3).build(&stream[..]);
        let mut out = Vec::new();
        let mut small = [0u8; 37];
        loop {
            let n = reader.read_data(&mut small).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&small[..n]);
        }
        assert_eq!(out, data);
    }
}
