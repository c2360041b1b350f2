//! The log facade and storage engine.
//!
//! A log is a directory of segment files. A single writer appends to the
//! tail segment and cycles it when it crosses the configured size. Reads
//! resolve the owning segment (tail first, then the cache, then a bisect
//! of the list), lazily loading cold position tables. Truncation at
//! either end rewrites one boundary segment through a temp file and a
//! pair of renames; the first rename is the commit point, and the loader
//! reconciles anything a crash leaves behind:
//!
//! - crash before `TEMP` → marker rename: the stray `TEMP` is ignored.
//! - crash after it: the `.START`/`.END` marker names the surviving
//!   boundary segment; every segment it supersedes is deleted and the
//!   marker is promoted to a plain name on the next open.
//! - both markers present at once: unreconcilable, the open fails with
//!   `Corrupt`.
//!
//! Every public operation locks the log, then checks the sticky
//! `corrupt` flag, then the `closed` flag.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::cache::SegmentCache;
use crate::config::{LogFormat, Options};
use crate::error::{Error, Result};
use crate::format::entry::{append_entry, read_binary, read_json};
use crate::format::{self, NameKind, TEMP_FILE};
use crate::segment::Segment;

/// A durable append-only log of indexed entries.
///
/// Entries are addressed by strictly sequential 64-bit indices starting
/// at 1 for a fresh log. All methods take `&self`; an internal mutex
/// serializes every operation, so a `Log` can be shared across threads.
///
/// # Example
///
/// ```no_run
/// use seglog::{Log, Options};
///
/// # fn main() -> seglog::Result<()> {
/// let log = Log::open("mylog", Options::default())?;
/// log.write(1, b"hello")?;
/// assert_eq!(log.read(1)?, b"hello");
/// log.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Log {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Absolute path of the log directory.
    path: PathBuf,
    opts: Options,
    /// Segments ordered by starting index, strictly increasing.
    segments: Vec<Segment>,
    /// First segment's starting index.
    first_index: u64,
    /// Index of the newest entry; 0 while the log is empty.
    last_index: u64,
    /// Open append handle for the tail segment.
    sfile: Option<File>,
    cache: SegmentCache,
    /// Reusable staging batch backing `write`.
    wbatch: Batch,
    corrupt: bool,
    closed: bool,
}

impl Log {
    /// Open or create a log in the directory at `path`.
    ///
    /// Runs crash recovery: stray `TEMP` files are ignored, pending
    /// truncation markers are promoted or rolled forward, and the tail
    /// segment is opened for append. The literal path `":memory:"` is
    /// reserved and rejected with [`Error::Invalid`].
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Log> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Err(Error::Invalid("in-memory log not supported".into()));
        }

        let mut opts = opts;
        opts.normalize();

        create_dir(path, opts.dir_perms)?;
        let path = std::path::absolute(path)?;

        let mut inner = Inner {
            path,
            cache: SegmentCache::new(opts.segment_cache_size),
            opts,
            segments: Vec::new(),
            first_index: 0,
            last_index: 0,
            sfile: None,
            wbatch: Batch::new(),
            corrupt: false,
            closed: false,
        };
        inner.load()?;

        debug!(
            path = %inner.path.display(),
            segments = inner.segments.len(),
            first_index = inner.first_index,
            last_index = inner.last_index,
            "opened log"
        );
        Ok(Log {
            inner: Mutex::new(inner),
        })
    }

    /// Append a single entry at `index`.
    ///
    /// `index` must be exactly `last_index + 1` (1 for a fresh log);
    /// anything else fails with [`Error::OutOfOrder`] and leaves the log
    /// unchanged.
    pub fn write(&self, index: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;

        let mut batch = mem::take(&mut inner.wbatch);
        batch.clear();
        batch.write(index, data);
        let result = inner.write_batch(&mut batch);
        inner.wbatch = batch;
        result
    }

    /// Append every entry staged in `batch`.
    ///
    /// Batch indices must continue the log's sequence without gaps. On
    /// success the batch is cleared for reuse; on failure the log is
    /// unchanged. An empty batch is a no-op.
    pub fn write_batch(&self, batch: &mut Batch) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.write_batch(batch)
    }

    /// Read the entry stored at `index`.
    ///
    /// Fails with [`Error::NotFound`] when `index` is zero or outside
    /// `[first_index, last_index]`.
    pub fn read(&self, index: u64) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.read(index)
    }

    /// Index of the oldest entry, or 0 when the log is empty.
    pub fn first_index(&self) -> Result<u64> {
        let inner = self.inner.lock();
        inner.check_open()?;
        if inner.last_index == 0 {
            return Ok(0);
        }
        Ok(inner.first_index)
    }

    /// Index of the newest entry, or 0 when the log is empty.
    pub fn last_index(&self) -> Result<u64> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.last_index)
    }

    /// Discard all entries before `index`, making it the new first index.
    ///
    /// `index` must lie within `[first_index, last_index]`; truncating to
    /// the current first index is a no-op.
    pub fn truncate_front(&self, index: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.truncate_front(index)
    }

    /// Discard all entries after `index`, making it the new last index.
    ///
    /// `index` must lie within `[first_index, last_index]`; truncating to
    /// the current last index is a no-op.
    pub fn truncate_back(&self, index: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.truncate_back(index)
    }

    /// Durably flush the tail segment.
    ///
    /// A no-op when `no_sync` is set.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.sync()
    }

    /// Release every cached cold segment's buffers and forget them.
    pub fn clear_cache(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.clear_cache();
        Ok(())
    }

    /// Flush and close the log.
    ///
    /// Idempotent. A closed log rejects every other operation with
    /// [`Error::Closed`]. If the sticky corrupt flag is set, the log
    /// still closes but `close` reports [`Error::Corrupt`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            if inner.corrupt {
                return Err(Error::Corrupt);
            }
            return Ok(());
        }

        let flushed = if inner.corrupt { Ok(()) } else { inner.sync() };
        inner.sfile = None;
        inner.closed = true;

        flushed?;
        if inner.corrupt {
            return Err(Error::Corrupt);
        }
        Ok(())
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.closed {
            if !inner.corrupt {
                let _ = inner.sync();
            }
            inner.sfile = None;
            inner.closed = true;
        }
    }
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if self.corrupt {
            return Err(Error::Corrupt);
        }
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Scan the directory, reconcile pending truncations, and open the
    /// tail for append. Runs exactly once, at construction.
    fn load(&mut self) -> Result<()> {
        struct Candidate {
            index: u64,
            kind: NameKind,
            path: PathBuf,
        }

        let mut found: Vec<Candidate> = Vec::new();
        for dent in fs::read_dir(&self.path)? {
            let dent = dent?;
            if !dent.file_type()?.is_file() {
                continue;
            }
            let name = dent.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((index, kind)) = format::parse_segment_name(name) else {
                continue;
            };
            found.push(Candidate {
                index,
                kind,
                path: dent.path(),
            });
        }

        // On index ties a plain name sorts before its marker variant, so
        // the stale file a crashed truncation leaves behind sits directly
        // before the marker that supersedes it.
        found.sort_by_key(|c| (c.index, c.kind != NameKind::Plain));

        if found.is_empty() {
            let path = format::segment_path(&self.path, 1);
            let file = create_file(&path, self.opts.file_perms)?;
            self.segments.push(Segment::new(1, path));
            self.first_index = 1;
            self.last_index = 0;
            self.sfile = Some(file);
            return Ok(());
        }

        let start_pos = found.iter().position(|c| c.kind == NameKind::Start);
        let end_pos = found.iter().position(|c| c.kind == NameKind::End);
        if start_pos.is_some() && end_pos.is_some() {
            return Err(Error::Corrupt);
        }

        if let Some(s) = start_pos {
            // Victims of a truncate-front that crashed before its final
            // rename, including the boundary segment's original copy.
            for victim in &found[..s] {
                fs::remove_file(&victim.path)?;
                warn!(
                    path = %victim.path.display(),
                    "removed segment superseded by pending truncate-front"
                );
            }
            found.drain(..s);
            let plain = format::segment_path(&self.path, found[0].index);
            fs::rename(&found[0].path, &plain)?;
            found[0].path = plain;
        }

        if let Some(e) = end_pos {
            for victim in &found[e + 1..] {
                fs::remove_file(&victim.path)?;
                warn!(
                    path = %victim.path.display(),
                    "removed segment superseded by pending truncate-back"
                );
            }
            found.truncate(e + 1);

            // The old tail's plain file is a stale remnant; the .END
            // version carries the truncated contents and wins. Its file
            // is overwritten by the rename below.
            let n = found.len();
            if n >= 2 && found[n - 2].index == found[n - 1].index {
                found.remove(n - 2);
            }

            let tail = found.len() - 1;
            let plain = format::segment_path(&self.path, found[tail].index);
            fs::rename(&found[tail].path, &plain)?;
            found[tail].path = plain;
        }

        self.segments = found
            .into_iter()
            .map(|c| Segment::new(c.index, c.path))
            .collect();
        self.first_index = self.segments[0].index;

        let tail_pos = self.segments.len() - 1;
        let mut file = open_file_rw(&self.segments[tail_pos].path)?;
        file.seek(SeekFrom::End(0))?;
        self.segments[tail_pos].load(self.opts.log_format)?;

        let tail = &self.segments[tail_pos];
        self.last_index = tail.index + tail.epos.len() as u64 - 1;
        self.sfile = Some(file);
        Ok(())
    }

    fn write_batch(&mut self, batch: &mut Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        for (i, entry) in batch.entries.iter().enumerate() {
            if entry.index != self.last_index + i as u64 + 1 {
                return Err(Error::OutOfOrder);
            }
        }

        if self.tail().ebuf.len() > self.opts.segment_size {
            self.cycle()?;
        }

        let format = self.opts.log_format;
        let threshold = self.opts.segment_size;
        let mut mark = self.tail().ebuf.len();
        let mut data_pos = 0;

        for entry in &batch.entries {
            let data = &batch.data[data_pos..data_pos + entry.size];
            data_pos += entry.size;

            let tail_pos = self.segments.len() - 1;
            let reached_threshold = {
                let seg = &mut self.segments[tail_pos];
                let pos = append_entry(&mut seg.ebuf, entry.index, data, format);
                seg.epos.push(pos);
                seg.ebuf.len() >= threshold
            };

            if reached_threshold {
                let buf = &self.segments[tail_pos].ebuf[mark..];
                self.sfile
                    .as_mut()
                    .expect("tail segment is open for append")
                    .write_all(buf)?;
                self.last_index = entry.index;
                self.cycle()?;
                mark = 0;
            }
        }

        let tail_pos = self.segments.len() - 1;
        if self.segments[tail_pos].ebuf.len() > mark {
            let buf = &self.segments[tail_pos].ebuf[mark..];
            self.sfile
                .as_mut()
                .expect("tail segment is open for append")
                .write_all(buf)?;
            self.last_index = batch.entries[batch.entries.len() - 1].index;
        }

        if !self.opts.no_sync {
            self.sfile
                .as_mut()
                .expect("tail segment is open for append")
                .sync_all()?;
        }

        batch.clear();
        Ok(())
    }

    /// Seal the tail segment and start a new one at `last_index + 1`.
    fn cycle(&mut self) -> Result<()> {
        let file = self
            .sfile
            .as_mut()
            .expect("tail segment is open for append");
        if !self.opts.no_sync {
            file.sync_all()?;
        }
        self.sfile = None;
        self.push_cache(self.segments.len() - 1);

        let index = self.last_index + 1;
        let path = format::segment_path(&self.path, index);
        let file = create_file(&path, self.opts.file_perms)?;
        self.segments.push(Segment::new(index, path));
        self.sfile = Some(file);
        debug!(index, "cycled tail segment");
        Ok(())
    }

    fn read(&mut self, index: u64) -> Result<Vec<u8>> {
        if index == 0 || index < self.first_index || index > self.last_index {
            return Err(Error::NotFound);
        }

        let pos = self.locate_segment(index)?;
        let edata = self.segments[pos].entry_bytes(index);
        match self.opts.log_format {
            LogFormat::Binary => read_binary(edata),
            LogFormat::Json => read_json(edata),
        }
    }

    /// Resolve the list position of the segment holding `index`, loading
    /// its position table when cold: tail first, then the cache, then a
    /// bisect of the list.
    ///
    /// The caller must have established `first_index <= index <=
    /// last_index`.
    fn locate_segment(&mut self, index: u64) -> Result<usize> {
        let tail_pos = self.segments.len() - 1;
        if index >= self.segments[tail_pos].index {
            return Ok(tail_pos);
        }

        for pos in self.cache.iter() {
            if self.segments[pos].contains(index) {
                return Ok(pos);
            }
        }

        let pos = self.find_segment(index);
        if self.segments[pos].epos.is_empty() {
            let format = self.opts.log_format;
            self.segments[pos].load(format)?;
        }
        self.push_cache(pos);
        Ok(pos)
    }

    /// Upper-bound bisect of the segment list by starting index.
    fn find_segment(&self, index: u64) -> usize {
        self.segments.partition_point(|s| s.index <= index) - 1
    }

    fn push_cache(&mut self, pos: usize) {
        if let Some(evicted) = self.cache.insert(pos) {
            // The tail's buffers must never be released.
            if evicted != self.segments.len() - 1 {
                self.segments[evicted].release();
            }
        }
    }

    fn truncate_front(&mut self, index: u64) -> Result<()> {
        if index == 0
            || self.last_index == 0
            || index < self.first_index
            || index > self.last_index
        {
            return Err(Error::OutOfRange);
        }
        if index == self.first_index {
            return Ok(());
        }

        let pos = self.locate_segment(index)?;
        let seg = &self.segments[pos];
        let split = (index - seg.index) as usize;
        let off = seg.epos[split].0;
        let new_ebuf: Vec<u8> = seg.ebuf[off..].to_vec();
        let new_epos: Vec<(usize, usize)> = seg.epos[split..]
            .iter()
            .map(|&(s, e)| (s - off, e - off))
            .collect();

        let temp_path = self.path.join(TEMP_FILE);
        write_temp(&temp_path, &new_ebuf, self.opts.file_perms)?;

        // Commit point: after this rename the truncation is completable
        // by the next open even if everything below fails.
        let start_path = self
            .path
            .join(format!("{}.START", format::segment_name(index)));
        fs::rename(&temp_path, &start_path)?;

        match self.finish_truncate_front(pos, index, &start_path, new_ebuf, new_epos) {
            Ok(()) => {
                debug!(first_index = index, "truncated front");
                Ok(())
            }
            Err(err) => {
                self.corrupt = true;
                error!(error = %err, index, "truncate-front failed past its commit rename");
                Err(Error::Corrupt)
            }
        }
    }

    fn finish_truncate_front(
        &mut self,
        pos: usize,
        index: u64,
        start_path: &Path,
        new_ebuf: Vec<u8>,
        new_epos: Vec<(usize, usize)>,
    ) -> Result<()> {
        let was_tail = pos == self.segments.len() - 1;
        if was_tail {
            self.sfile = None;
        }

        for seg in &self.segments[..=pos] {
            fs::remove_file(&seg.path)?;
        }

        let new_path = format::segment_path(&self.path, index);
        fs::rename(start_path, &new_path)?;

        let new_len = new_ebuf.len() as u64;
        {
            let seg = &mut self.segments[pos];
            seg.path = new_path.clone();
            seg.index = index;
            seg.ebuf = new_ebuf;
            seg.epos = new_epos;
        }
        self.segments.drain(..pos);
        self.first_index = index;
        self.cache.clear();

        if was_tail {
            let mut file = open_file_rw(&new_path)?;
            let end = file.seek(SeekFrom::End(0))?;
            if end != new_len {
                return Err(Error::Corrupt);
            }
            self.sfile = Some(file);
        }
        Ok(())
    }

    fn truncate_back(&mut self, index: u64) -> Result<()> {
        if index == 0
            || self.last_index == 0
            || index < self.first_index
            || index > self.last_index
        {
            return Err(Error::OutOfRange);
        }
        if index == self.last_index {
            return Ok(());
        }

        let pos = self.locate_segment(index)?;
        let seg = &self.segments[pos];
        let keep = (index - seg.index) as usize;
        let end_off = seg.epos[keep].1;
        let new_ebuf: Vec<u8> = seg.ebuf[..end_off].to_vec();
        let new_epos: Vec<(usize, usize)> = seg.epos[..=keep].to_vec();
        let seg_index = seg.index;

        let temp_path = self.path.join(TEMP_FILE);
        write_temp(&temp_path, &new_ebuf, self.opts.file_perms)?;

        // Commit point, as in truncate_front. The marker carries the
        // boundary segment's own starting index, not the truncation
        // index.
        let end_path = self
            .path
            .join(format!("{}.END", format::segment_name(seg_index)));
        fs::rename(&temp_path, &end_path)?;

        match self.finish_truncate_back(pos, index, seg_index, &end_path, new_ebuf, new_epos) {
            Ok(()) => {
                debug!(last_index = index, "truncated back");
                Ok(())
            }
            Err(err) => {
                self.corrupt = true;
                error!(error = %err, index, "truncate-back failed past its commit rename");
                Err(Error::Corrupt)
            }
        }
    }

    fn finish_truncate_back(
        &mut self,
        pos: usize,
        index: u64,
        seg_index: u64,
        end_path: &Path,
        new_ebuf: Vec<u8>,
        new_epos: Vec<(usize, usize)>,
    ) -> Result<()> {
        self.sfile = None;

        for seg in &self.segments[pos..] {
            fs::remove_file(&seg.path)?;
        }

        let new_path = format::segment_path(&self.path, seg_index);
        fs::rename(end_path, &new_path)?;

        let mut file = open_file_rw(&new_path)?;
        let end = file.seek(SeekFrom::End(0))?;
        if end != new_ebuf.len() as u64 {
            return Err(Error::Corrupt);
        }

        {
            let seg = &mut self.segments[pos];
            seg.path = new_path;
            seg.ebuf = new_ebuf;
            seg.epos = new_epos;
        }
        self.segments.truncate(pos + 1);
        self.last_index = index;
        self.sfile = Some(file);
        self.cache.clear();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.sfile.as_mut() {
            if !self.opts.no_sync {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn clear_cache(&mut self) {
        let tail_pos = self.segments.len() - 1;
        let cached: Vec<usize> = self.cache.iter().collect();
        for pos in cached {
            if pos != tail_pos {
                self.segments[pos].release();
            }
        }
        self.cache.clear();
    }

    fn tail(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }
}

fn create_dir(path: &Path, perms: u32) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(perms);
    }
    #[cfg(not(unix))]
    let _ = perms;
    builder.create(path)
}

fn create_file(path: &Path, perms: u32) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(perms);
    }
    #[cfg(not(unix))]
    let _ = perms;
    opts.open(path)
}

fn open_file_rw(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

fn write_temp(path: &Path, contents: &[u8], perms: u32) -> Result<()> {
    let mut file = create_file(path, perms)?;
    file.write_all(contents)?;
    Ok(())
}
