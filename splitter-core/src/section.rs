use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitterError};

/// The serialized face of a section: the fields that survive into the
/// manifest and the chunk sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMeta {
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub number: u32,
    pub hash: String,
}

impl SectionMeta {
    /// Deterministic structural fingerprint of the window, emitted as
    /// decimal digits. Chunk identifiers are additionally namespaced by file
    /// path and index in the storage key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.start.to_le_bytes());
        hasher.update(&self.end.to_le_bytes());
        hasher.update(&self.size.to_le_bytes());
        hasher.update(&u64::from(self.number).to_le_bytes());
        let digest = hasher.finalize();
        let word = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());
        format!("{word}")
    }
}

/// A `[start, start + size)` window of a source or destination file.
///
/// The section borrows its handles: a positional reader during snapshot, a
/// positional writer during restore. It owns neither file, so a section
/// cannot outlive the handle it reads from or writes to.
pub struct Section<'f> {
    pub meta: SectionMeta,
    reader: Option<&'f File>,
    writer: Option<&'f File>,
    pos: u64,
}

impl<'f> Section<'f> {
    pub fn new(
        start: u64,
        size: u64,
        number: u32,
        reader: Option<&'f File>,
        writer: Option<&'f File>,
    ) -> Self {
        Self {
            meta: SectionMeta {
                start,
                end: start + size,
                size,
                number,
                hash: String::new(),
            },
            reader,
            writer,
            pos: 0,
        }
    }

    /// Reads the whole window into memory, then records the structural hash
    /// on the section.
    pub fn data(&mut self) -> Result<Vec<u8>> {
        let reader = self
            .reader
            .ok_or_else(|| SplitterError::Format("section has no reader".to_string()))?;
        let mut buf = vec![0u8; self.meta.size as usize];
        reader.read_exact_at(&mut buf, self.meta.start)?;
        self.meta.hash = self.meta.fingerprint();
        Ok(buf)
    }

    /// Positional write of `bytes` at the section's start offset.
    pub fn merge(&self, bytes: &[u8]) -> Result<usize> {
        let writer = self
            .writer
            .ok_or_else(|| SplitterError::Format("section has no writer".to_string()))?;
        writer.write_all_at(bytes, self.meta.start)?;
        Ok(bytes.len())
    }
}

impl Read for Section<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self
            .reader
            .ok_or_else(|| SplitterError::Format("section has no reader".to_string()).into_io())?;
        let remaining = self.meta.size.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(remaining as usize);
        let n = reader.read_at(&mut buf[..want], self.meta.start + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Splits a file of `file_size` bytes into `(start, size)` windows of
/// `chunk_size`; the last window carries the remainder.
pub fn spans(file_size: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if file_size == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let count = file_size.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            (start, chunk_size.min(file_size - start))
        })
        .collect()
}
