//! Append-only log behind the filesystem driver
//!
//! Write ordering for every mutation:
//! 1. Encode entry with CRC32C
//! 2. Append to the current segment
//! 3. durable_sync() when durable writes are enabled
//! 4. Return; only then does the caller update its RAM table
//!
//! Opening a store replays every segment in sequence order, then cuts any
//! torn tail off the newest segment before the writer appends to it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{BurrowError, BurrowResult};
use crate::format::{decode_entry, encode_entry, EntryLimits, LogEntry, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::durable_sync;
use crate::value::Document;

const SEGMENT_PREFIX: &str = "log-";
const SEGMENT_SUFFIX: &str = ".brw";
/// Suffix of a compacted segment that has not been renamed into place yet.
pub(crate) const COMPACT_SUFFIX: &str = ".compact";

pub(crate) fn segment_name(sequence: u64) -> String {
    format!("{}{:016x}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX)
}

fn parse_segment_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// Writer settings derived from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub durable: bool,
    pub rotation_bytes: u64,
    pub limits: EntryLimits,
}

/// Appends entries to the newest segment of a store directory.
///
/// INVARIANT: `append_put`/`append_delete` return only after the bytes are
/// written (and synced when `durable`); callers mutate RAM afterwards.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    size: u64,
    dir: PathBuf,
    sequence: u64,
    options: LogOptions,
}

impl LogWriter {
    /// Open the last segment in `dir` for appending, creating `dir` if needed.
    pub fn open<P: AsRef<Path>>(dir: P, options: LogOptions) -> BurrowResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| BurrowError::io_at(&dir, &e, "failed to create log directory"))?;

        remove_stale_compactions(&dir)?;
        let sequence = list_segments(&dir)?.last().map(|(seq, _)| *seq).unwrap_or(0);
        let path = dir.join(segment_name(sequence));
        let file = open_append(&path)?;
        let size = file
            .metadata()
            .map_err(|e| BurrowError::io_at(&path, &e, "failed to stat log segment"))?
            .len();

        Ok(Self { file, path, size, dir, sequence, options })
    }

    pub fn append_put(&mut self, key: &str, value: &Document) -> BurrowResult<()> {
        let bytes = encode_entry(key, Some(value), self.options.limits)?;
        self.append(&bytes)
    }

    pub fn append_delete(&mut self, key: &str) -> BurrowResult<()> {
        let bytes = encode_entry(key, None, self.options.limits)?;
        self.append(&bytes)
    }

    /// Append several pre-validated puts, syncing once at the end.
    pub fn append_batch(&mut self, items: &[(String, Document)]) -> BurrowResult<()> {
        let mut encoded = Vec::with_capacity(items.len());
        for (key, value) in items {
            encoded.push(encode_entry(key, Some(value), self.options.limits)?);
        }
        for bytes in &encoded {
            self.write_bytes(bytes)?;
        }
        if self.options.durable {
            self.sync()?;
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> BurrowResult<()> {
        self.write_bytes(bytes)?;
        if self.options.durable {
            self.sync()?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> BurrowResult<()> {
        if self.size > 0 && self.size + bytes.len() as u64 > self.options.rotation_bytes {
            self.rotate()?;
        }
        self.file
            .write_all(bytes)
            .map_err(|e| BurrowError::io_at(&self.path, &e, "log write failed"))?;
        self.size += bytes.len() as u64;
        Ok(())
    }

    /// Sync the current segment, then continue in a fresh one.
    fn rotate(&mut self) -> BurrowResult<()> {
        self.sync()?;
        self.sequence += 1;
        let path = self.dir.join(segment_name(self.sequence));
        self.file = open_append(&path)?;
        self.path = path;
        self.size = 0;
        tracing::debug!(segment = %self.path.display(), "rotated log segment");
        Ok(())
    }

    pub fn sync(&self) -> BurrowResult<()> {
        durable_sync(&self.file).map_err(|e| BurrowError::io_at(&self.path, &e, "log sync failed"))
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn limits(&self) -> EntryLimits {
        self.options.limits
    }

    /// Continue appending to `file`, already renamed into place as segment
    /// `sequence` and positioned at its end.
    pub(crate) fn adopt(&mut self, file: File, path: PathBuf, sequence: u64, size: u64) {
        self.file = file;
        self.path = path;
        self.sequence = sequence;
        self.size = size;
    }
}

/// Delete compaction output left behind by a crash before its rename.
fn remove_stale_compactions(dir: &Path) -> BurrowResult<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| BurrowError::io_at(dir, &e, "failed to read log directory"))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| BurrowError::io_at(dir, &e, "failed to read directory entry"))?;
        let path = entry.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(COMPACT_SUFFIX));
        if stale {
            tracing::warn!(file = %path.display(), "removing unfinished compaction output");
            std::fs::remove_file(&path)
                .map_err(|e| BurrowError::io_at(&path, &e, "failed to remove stale file"))?;
        }
    }
    Ok(())
}

fn open_append(path: &Path) -> BurrowResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BurrowError::io_at(path, &e, "failed to open log segment"))
}

/// Segments in `dir` sorted by sequence number.
pub(crate) fn list_segments(dir: &Path) -> BurrowResult<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| BurrowError::io_at(dir, &e, "failed to read log directory"))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| BurrowError::io_at(dir, &e, "failed to read directory entry"))?;
        let path = entry.path();
        if let Some(seq) = path.file_name().and_then(|n| n.to_str()).and_then(parse_segment_name) {
            segments.push((seq, path));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Bytes at the end of the newest segment that hold no complete entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    pub path: PathBuf,
    /// End of the last entry that decoded cleanly
    pub valid_len: u64,
    pub file_len: u64,
}

/// Everything recovered from a store directory.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Entries in write order
    pub entries: Vec<LogEntry>,
    /// Set when the newest segment ends in a torn or corrupt entry
    pub tail: Option<TornTail>,
}

impl Recovery {
    /// Cut the torn tail off the newest segment so new appends follow the
    /// last good entry. Returns whether anything was cut.
    pub fn truncate_torn_tail(&self) -> BurrowResult<bool> {
        let Some(tail) = &self.tail else {
            return Ok(false);
        };
        let file = OpenOptions::new()
            .write(true)
            .open(&tail.path)
            .map_err(|e| BurrowError::io_at(&tail.path, &e, "failed to open torn segment"))?;
        file.set_len(tail.valid_len)
            .map_err(|e| BurrowError::io_at(&tail.path, &e, "failed to truncate torn segment"))?;
        durable_sync(&file)
            .map_err(|e| BurrowError::io_at(&tail.path, &e, "failed to sync truncated segment"))?;
        tracing::warn!(
            segment = %tail.path.display(),
            valid_len = tail.valid_len,
            dropped = tail.file_len - tail.valid_len,
            "truncated torn segment tail"
        );
        Ok(true)
    }
}

/// Replays every segment of a store directory.
pub struct LogReader {
    dir: PathBuf,
}

impl LogReader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// All recoverable entries in write order. A missing directory is empty.
    pub fn recover_entries(&self) -> BurrowResult<Vec<LogEntry>> {
        Ok(self.recover()?.entries)
    }

    /// Entries plus the torn tail of the newest segment, if any.
    ///
    /// Per segment: a bad magic or checksum resyncs at the next magic; a torn
    /// entry is the crash point and ends that segment.
    pub fn recover(&self) -> BurrowResult<Recovery> {
        if !self.dir.exists() {
            return Ok(Recovery::default());
        }
        let segments = list_segments(&self.dir)?;
        let mut recovery = Recovery::default();
        for (position, (_, path)) in segments.iter().enumerate() {
            let segment = recover_segment(path)?;
            recovery.entries.extend(segment.entries);
            let newest = position + 1 == segments.len();
            if newest && segment.valid_len < segment.file_len {
                recovery.tail = Some(TornTail {
                    path: path.clone(),
                    valid_len: segment.valid_len,
                    file_len: segment.file_len,
                });
            }
        }
        Ok(recovery)
    }
}

struct SegmentScan {
    entries: Vec<LogEntry>,
    valid_len: u64,
    file_len: u64,
}

fn recover_segment(path: &Path) -> BurrowResult<SegmentScan> {
    let mut buffer = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut buffer))
        .map_err(|e| BurrowError::io_at(path, &e, "failed to read log segment"))?;

    let mut entries = Vec::new();
    let mut offset = 0;
    let mut valid_len = 0;

    while offset + HEADER_SIZE <= buffer.len() {
        if buffer[offset..offset + 4] != MAGIC_ARRAY {
            tracing::warn!(segment = %path.display(), offset, "bad magic, scanning for next entry");
            match find_next_magic(&buffer, offset + 1) {
                Some(next) => {
                    offset = next;
                    continue;
                }
                None => break,
            }
        }

        let length = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;
        let total = HEADER_SIZE + length;

        if offset + total > buffer.len() {
            tracing::warn!(
                segment = %path.display(),
                offset,
                needed = total,
                available = buffer.len() - offset,
                "torn write at end of segment"
            );
            break;
        }

        match decode_entry(&buffer[offset..offset + total]) {
            Ok(entry) => {
                entries.push(entry);
                offset += total;
                valid_len = offset;
            }
            Err(e) => {
                tracing::warn!(
                    segment = %path.display(),
                    offset,
                    error = %e,
                    "corrupt log entry skipped"
                );
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => offset = next,
                    None => break,
                }
            }
        }
    }

    Ok(SegmentScan { entries, valid_len: valid_len as u64, file_len: buffer.len() as u64 })
}

fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(MAGIC_ARRAY.len())
        .position(|w| w == MAGIC_ARRAY)
        .map(|pos| start + pos)
}
