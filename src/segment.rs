//! Segment state and position-table loading.
//!
//! A segment is a file holding a contiguous run of entries, named by its
//! first entry index. Entry offsets are not stored on disk; they are
//! reconstructed by one linear scan of the file on first touch, which
//! keeps the on-disk format a pure append stream.

use std::fs;
use std::path::PathBuf;

use tracing::trace;

use crate::config::LogFormat;
use crate::error::Result;
use crate::format::entry::framed_len;

/// In-memory state for one on-disk segment.
///
/// `ebuf` and `epos` are populated only while the segment is hot: the
/// tail is always hot, cold segments are loaded lazily on read and
/// released again when evicted from the cache.
#[derive(Debug)]
pub(crate) struct Segment {
    /// Index of the first entry in this segment (≥ 1).
    pub index: u64,
    /// Absolute path of the segment file.
    pub path: PathBuf,
    /// Full encoded contents of the file.
    pub ebuf: Vec<u8>,
    /// `(start, end)` byte offsets into `ebuf`, one pair per entry.
    /// Consecutive pairs touch; the last `end` equals `ebuf.len()`.
    pub epos: Vec<(usize, usize)>,
}

impl Segment {
    pub fn new(index: u64, path: PathBuf) -> Self {
        Segment {
            index,
            path,
            ebuf: Vec::new(),
            epos: Vec::new(),
        }
    }

    /// Whether `index` addresses an entry held by this segment.
    ///
    /// Only meaningful while the position table is loaded.
    pub fn contains(&self, index: u64) -> bool {
        index >= self.index && index - self.index < self.epos.len() as u64
    }

    /// The framed bytes of the entry at `index`.
    ///
    /// The caller must have established that the segment is loaded and
    /// `contains(index)` holds.
    pub fn entry_bytes(&self, index: u64) -> &[u8] {
        let (start, end) = self.epos[(index - self.index) as usize];
        &self.ebuf[start..end]
    }

    /// Read the segment file and rebuild the position table.
    ///
    /// Walks the buffer from offset 0, framing one entry at a time until
    /// the end of the buffer is reached exactly. Any framing failure or
    /// residual bytes surface as `Corrupt`. Idempotent; reloading an
    /// already-hot segment rebuilds the same table.
    pub fn load(&mut self, format: LogFormat) -> Result<()> {
        self.ebuf = fs::read(&self.path)?;
        self.epos.clear();

        let mut pos = 0;
        while pos < self.ebuf.len() {
            let n = framed_len(&self.ebuf[pos..], format)?;
            self.epos.push((pos, pos + n));
            pos += n;
        }

        trace!(
            path = %self.path.display(),
            entries = self.epos.len(),
            bytes = self.ebuf.len(),
            "loaded segment"
        );
        Ok(())
    }

    /// Release the decoded buffer and position table, returning their
    /// backing capacity, so the segment is truly cold again.
    pub fn release(&mut self) {
        self.ebuf = Vec::new();
        self.epos = Vec::new();
    }
}
