//! Container file format.
//!
//! A container is a single flat file:
//!
//! ```text
//! [8B magic "COLDPACK"][1B version]
//! repeated: [4B LE meta length][meta JSON][payload bytes]
//! [4B LE zero]  (end marker)
//! ```
//!
//! Entry metadata carries the owning dataset code, the path relative to the
//! dataset root and the payload size, so stats and extraction never need an
//! external index.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use coldpack_types::{ColdpackError, DatasetCode, Result};

/// Magic bytes at the start of every container file.
pub const PACK_MAGIC: &[u8; 8] = b"COLDPACK";
/// Container format version.
pub const PACK_VERSION: u8 = 1;

/// Refuse to parse entry metadata larger than this; anything bigger means a
/// corrupt or foreign file.
const MAX_META_LEN: u32 = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct EntryMeta {
    pub code: DatasetCode,
    pub rel_path: String,
    pub size: u64,
}

/// Byte statistics of a container, used by the post-archive sanity check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// Sum of all payload bytes.
    pub total_bytes: u64,
    pub entry_count: usize,
    /// Payload bytes per member dataset.
    pub per_dataset: HashMap<DatasetCode, u64>,
}

pub(super) struct PackWriter<W: Write> {
    out: BufWriter<W>,
    total_payload: u64,
}

impl<W: Write> PackWriter<W> {
    pub fn new(out: W) -> Result<Self> {
        let mut out = BufWriter::new(out);
        out.write_all(PACK_MAGIC)?;
        out.write_all(&[PACK_VERSION])?;
        Ok(Self {
            out,
            total_payload: 0,
        })
    }

    pub fn add_entry(
        &mut self,
        code: &DatasetCode,
        rel_path: &str,
        size: u64,
        mut payload: impl Read,
    ) -> Result<()> {
        let meta = serde_json::to_vec(&EntryMeta {
            code: code.clone(),
            rel_path: rel_path.to_string(),
            size,
        })?;
        self.out.write_all(&(meta.len() as u32).to_le_bytes())?;
        self.out.write_all(&meta)?;
        let copied = std::io::copy(&mut payload, &mut self.out)?;
        if copied != size {
            return Err(ColdpackError::InvalidFormat(format!(
                "entry '{rel_path}' of {code}: expected {size} bytes, wrote {copied}"
            )));
        }
        self.total_payload += size;
        Ok(())
    }

    /// Write the end marker and flush. Returns total payload bytes.
    pub fn finish(mut self) -> Result<u64> {
        self.out.write_all(&0u32.to_le_bytes())?;
        self.out.flush()?;
        Ok(self.total_payload)
    }
}

pub(super) struct PackReader {
    input: BufReader<File>,
}

impl PackReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut input = BufReader::new(File::open(path)?);
        let mut header = [0u8; 9];
        input.read_exact(&mut header).map_err(|_| {
            ColdpackError::InvalidFormat(format!("{}: truncated header", path.display()))
        })?;
        if &header[..8] != PACK_MAGIC {
            return Err(ColdpackError::InvalidFormat(format!(
                "{}: bad magic",
                path.display()
            )));
        }
        if header[8] != PACK_VERSION {
            return Err(ColdpackError::InvalidFormat(format!(
                "{}: unsupported container version {}",
                path.display(),
                header[8]
            )));
        }
        Ok(Self { input })
    }

    /// Read the next entry's metadata, leaving the reader positioned at the
    /// start of its payload. Returns `None` at the end marker.
    pub fn next_meta(&mut self) -> Result<Option<EntryMeta>> {
        let mut len_buf = [0u8; 4];
        self.input.read_exact(&mut len_buf)?;
        let meta_len = u32::from_le_bytes(len_buf);
        if meta_len == 0 {
            return Ok(None);
        }
        if meta_len > MAX_META_LEN {
            return Err(ColdpackError::InvalidFormat(format!(
                "entry metadata of {meta_len} bytes exceeds the limit"
            )));
        }
        let mut meta_buf = vec![0u8; meta_len as usize];
        self.input.read_exact(&mut meta_buf)?;
        Ok(Some(serde_json::from_slice(&meta_buf)?))
    }

    /// Skip over the current entry's payload.
    pub fn skip_payload(&mut self, size: u64) -> Result<()> {
        self.input.seek(SeekFrom::Current(size as i64))?;
        Ok(())
    }

    /// Copy the current entry's payload into `out`.
    pub fn read_payload(&mut self, size: u64, out: &mut impl Write) -> Result<()> {
        let copied = std::io::copy(&mut (&mut self.input).take(size), out)?;
        if copied != size {
            return Err(ColdpackError::InvalidFormat(format!(
                "truncated payload: expected {size} bytes, got {copied}"
            )));
        }
        Ok(())
    }
}

/// Scan a container and collect its byte statistics.
pub(super) fn read_stats(path: &Path) -> Result<ContainerStats> {
    let mut reader = PackReader::open(path)?;
    let mut stats = ContainerStats::default();
    while let Some(meta) = reader.next_meta()? {
        reader.skip_payload(meta.size)?;
        stats.total_bytes += meta.size;
        stats.entry_count += 1;
        *stats.per_dataset.entry(meta.code).or_insert(0) += meta.size;
    }
    Ok(stats)
}
