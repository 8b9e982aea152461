//! Building and querying a seek index over an indexable `pgz` stream.
//!
//! [`GzIndex::build`] walks a stream once, reading only each member's fixed
//! 20-byte header prefix and the 4 trailing ISIZE bytes — never
//! decompressing a single block — to learn every member's on-disk size and
//! uncompressed length. [`GzIndex::seek_to_uncompressed`] then turns an
//! uncompressed byte offset into "which member, and how far into it",
//! using a cached prefix-sum table so repeat lookups don't re-walk anything.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::member::SUBFIELD_ID;
use crate::GzpError;

/// One member's position and size, as recorded in its indexing subfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of this member's first byte within the file.
    pub offset: u64,
    /// Total on-disk size of this member (header through trailer).
    pub member_size: u32,
    /// Uncompressed size of this member's payload.
    pub isize: u32,
}

/// A seek table over an indexable stream.
pub struct GzIndex {
    entries: Vec<IndexEntry>,
    /// `prefix_sums[i]` is the sum of `isize` over `entries[..i]`; has one
    /// extra trailing element equal to the total uncompressed size.
    prefix_sums: Vec<u64>,
}

impl GzIndex {
    /// Walk `reader` from the start, recording each member's offset, size,
    /// and uncompressed length. Restores the reader's original position
    /// before returning. Fails with [`GzpError::NotIndexable`] if any
    /// member lacks the `'I','G'` subfield.
    pub fn build<R: Read + Seek>(reader: &mut R) -> Result<Self, GzpError> {
        let original_pos = reader.stream_position()?;
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let mut head = [0u8; 20];
            let n = read_fill(reader, &mut head)?;
            if n == 0 {
                break;
            }
            if n < 20 {
                return Err(GzpError::TruncatedStream);
            }
            if head[0..2] != [0x1f, 0x8b] {
                return Err(GzpError::BadMagic);
            }
            let sid = [head[12], head[13]];
            if sid != SUBFIELD_ID {
                return Err(GzpError::NotIndexable);
            }
            let member_size = u32::from_le_bytes([head[16], head[17], head[18], head[19]]);

            reader.seek(SeekFrom::Start(offset + member_size as u64 - 4))?;
            let isize_val = reader.read_u32::<LittleEndian>()?;

            entries.push(IndexEntry {
                offset,
                member_size,
                isize: isize_val,
            });

            offset += member_size as u64;
            reader.seek(SeekFrom::Start(offset))?;
        }

        reader.seek(SeekFrom::Start(original_pos))?;

        let mut prefix_sums = Vec::with_capacity(entries.len() + 1);
        let mut cumulative = 0u64;
        prefix_sums.push(0);
        for e in &entries {
            cumulative += e.isize as u64;
            prefix_sums.push(cumulative);
        }

        Ok(Self {
            entries,
            prefix_sums,
        })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total uncompressed size across every member.
    pub fn total_uncompressed_size(&self) -> u64 {
        *self.prefix_sums.last().unwrap_or(&0)
    }

    /// Print a one-line summary per member: `index offset member_size isize`.
    pub fn show_index(&self) -> Vec<String> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{} {} {} {}", i, e.offset, e.member_size, e.isize))
            .collect()
    }

    /// Find which member contains uncompressed offset `pos`, and how far
    /// into that member's uncompressed payload `pos` falls. Binary search
    /// over the cached prefix-sum table, `O(log n)`. Returns `None` if
    /// `pos` is at or past the end of the stream.
    pub fn seek_to_uncompressed(&self, pos: u64) -> Option<(usize, u64)> {
        if pos >= self.total_uncompressed_size() {
            return None;
        }
        // partition_point finds the first index i such that prefix_sums[i] > pos;
        // the containing member is i - 1.
        let idx = self.prefix_sums.partition_point(|&cum| cum <= pos);
        let member_index = idx - 1;
        let within = pos - self.prefix_sums[member_index];
        Some((member_index, within))
    }
}

fn read_fill<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, GzpError> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
