//! Reading and writing individual gzip members.
//!
//! Every member this crate writes carries an 8-byte `FEXTRA` extra field: a
//! subfield with ID `'I','G'`, length 4, holding the member's total on-disk
//! size (`MEMBER_SIZE`: header through trailer, inclusive). A reader that
//! finds this subfield can locate the next member without decompressing
//! anything; a reader that doesn't (a foreign gzip file, or a single-member
//! stream some other tool produced) falls back to ordinary synchronous
//! streaming decompression for that member.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::GzpError;

const MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

pub(crate) const SUBFIELD_ID: [u8; 2] = *b"IG";

/// Fixed portion written by [`write_header`] for a member with no filename:
/// 10-byte base header + 2-byte XLEN + 8-byte extra field body.
pub(crate) const BASE_HEADER_SIZE: usize = 20;

/// A parsed member header.
pub struct MemberHeader {
    /// Total bytes consumed from the stream reading this header (base
    /// header, extra field, optional name/comment/crc16).
    pub header_size: usize,
    /// `Some(member_size)` if the `'I','G'` subfield was present.
    pub member_size: Option<u32>,
}

impl MemberHeader {
    pub fn is_indexable(&self) -> bool {
        self.member_size.is_some()
    }
}

/// Drop a filename's `.gz` suffix and check it's representable in Latin-1
/// (gzip's `FNAME` field has no encoding of its own). Returns `None` if it
/// isn't, in which case the caller should simply omit the filename rather
/// than fail the write.
pub fn sanitize_filename(name: &str) -> Option<Vec<u8>> {
    let stripped = name.strip_suffix(".gz").unwrap_or(name);
    if stripped.is_empty() {
        return None;
    }
    let mut bytes = Vec::with_capacity(stripped.len());
    for ch in stripped.chars() {
        let codepoint = ch as u32;
        if codepoint > 0xFF {
            return None;
        }
        bytes.push(codepoint as u8);
    }
    Some(bytes)
}

/// Write one member: header, compressed body, trailer. Returns the total
/// number of bytes written (the member's `MEMBER_SIZE`).
#[allow(clippy::too_many_arguments)]
pub fn write_member<W: Write>(
    w: &mut W,
    compressed: &[u8],
    crc: u32,
    raw_size: u64,
    filename: Option<&[u8]>,
    mtime: u32,
) -> Result<usize, GzpError> {
    let fname_len = filename.map(|f| f.len() + 1).unwrap_or(0);
    let member_size = BASE_HEADER_SIZE + fname_len + compressed.len() + 8;

    let mut flags = FEXTRA;
    if filename.is_some() {
        flags |= FNAME;
    }

    let mut buf = Vec::with_capacity(member_size);
    buf.extend_from_slice(&MAGIC);
    buf.push(METHOD_DEFLATE);
    buf.push(flags);
    buf.write_u32::<LittleEndian>(mtime)?;
    buf.push(2); // XFL: slowest/best compression, matches flate2's own headers
    buf.push(255); // OS: unknown
    buf.write_u16::<LittleEndian>(8)?; // XLEN
    buf.extend_from_slice(&SUBFIELD_ID);
    buf.write_u16::<LittleEndian>(4)?; // subfield length
    buf.write_u32::<LittleEndian>(member_size as u32)?;
    if let Some(name) = filename {
        buf.extend_from_slice(name);
        buf.push(0);
    }
    buf.extend_from_slice(compressed);
    buf.write_u32::<LittleEndian>(crc)?;
    buf.write_u32::<LittleEndian>((raw_size & 0xFFFF_FFFF) as u32)?;

    w.write_all(&buf)?;
    Ok(buf.len())
}

/// Read one member header from `r`. Returns `Ok(None)` on a clean EOF (no
/// bytes at all before the magic, i.e. the normal end of the stream).
pub fn read_header<R: Read>(r: &mut R) -> Result<Option<MemberHeader>, GzpError> {
    let mut one = [0u8; 1];
    loop {
        match r.read(&mut one)? {
            0 => return Ok(None),
            _ if one[0] == 0 => continue, // inter-member zero padding
            _ => break,
        }
    }
    if one[0] != MAGIC[0] {
        return Err(GzpError::BadMagic);
    }
    let second = r.read_u8().map_err(map_truncated)?;
    if second != MAGIC[1] {
        return Err(GzpError::BadMagic);
    }

    let method = r.read_u8().map_err(map_truncated)?;
    let flags = r.read_u8().map_err(map_truncated)?;
    let mut mtime_buf = [0u8; 4];
    r.read_exact(&mut mtime_buf).map_err(map_truncated)?;
    let _xfl = r.read_u8().map_err(map_truncated)?;
    let _os = r.read_u8().map_err(map_truncated)?;
    if method != METHOD_DEFLATE {
        return Err(GzpError::UnknownMethod);
    }

    let mut header_size = 10usize;
    let mut member_size = None;

    if flags & FEXTRA != 0 {
        let xlen = r.read_u16::<LittleEndian>().map_err(map_truncated)? as usize;
        header_size += 2;
        let mut extra = vec![0u8; xlen];
        r.read_exact(&mut extra).map_err(map_truncated)?;
        header_size += xlen;
        if xlen >= 8 && extra[0..2] == SUBFIELD_ID {
            let inner_len = u16::from_le_bytes([extra[2], extra[3]]) as usize;
            if inner_len >= 4 {
                member_size = Some(u32::from_le_bytes([
                    extra[4], extra[5], extra[6], extra[7],
                ]));
            }
        }
    }
    if flags & FNAME != 0 {
        header_size += read_cstring(r)?;
    }
    if flags & FCOMMENT != 0 {
        header_size += read_cstring(r)?;
    }
    if flags & FHCRC != 0 {
        r.read_u16::<LittleEndian>().map_err(map_truncated)?;
        header_size += 2;
    }

    Ok(Some(MemberHeader {
        header_size,
        member_size,
    }))
}

/// Read an 8-byte CRC32+ISIZE trailer.
pub fn read_trailer<R: Read>(r: &mut R) -> Result<(u32, u32), GzpError> {
    let crc = r.read_u32::<LittleEndian>().map_err(map_truncated)?;
    let isize_val = r.read_u32::<LittleEndian>().map_err(map_truncated)?;
    Ok((crc, isize_val))
}

fn read_cstring<R: Read>(r: &mut R) -> Result<usize, GzpError> {
    let mut n = 0usize;
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte).map_err(map_truncated)?;
        n += 1;
        if byte[0] == 0 {
            return Ok(n);
        }
    }
}

fn map_truncated(e: io::Error) -> GzpError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        GzpError::TruncatedStream
    } else {
        GzpError::Io(e)
    }
}

/// A reader wrapper that lets bytes be pushed back for a later read, used by
/// the read pipeline's synchronous-decompression fallback to "unread" the
/// tail end of an over-read chunk (the decompressor may not consume every
/// byte handed to it, and those leftover bytes belong to the next member's
/// header or trailer).
pub struct Pushback<R> {
    inner: R,
    buf: VecDeque<u8>,
}

impl<R: Read> Pushback<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: VecDeque::new(),
        }
    }

    /// Make `bytes` the next bytes returned by `read`, in order.
    pub fn unread(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.buf.push_front(b);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Pushback<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buf.is_empty() {
            return self.inner.read(out);
        }
        let n = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}
