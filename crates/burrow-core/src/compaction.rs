//! Compaction: rewrite a store's log as a snapshot of its live records
//!
//! Every overwrite and delete appends to the log, so without compaction the
//! log (and replay time at open) grows with write history instead of with
//! the live set.
//!
//! Compaction uses the atomic rename pattern for crash safety:
//! 1. Write `Clear` followed by one `Put` per live record to
//!    `log-{next}.brw.compact`
//! 2. durable_sync the new file
//! 3. Rename it to `log-{next}.brw` and sync the directory
//! 4. Delete every older segment
//!
//! A crash before the rename leaves an orphan that the next open deletes.
//! A crash after it replays the old segments first, and the `Clear` entry
//! then resets the table before the snapshot is applied.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::error::{BurrowError, BurrowResult};
use crate::format::{encode_clear, encode_entry};
use crate::platform_durability::{durable_sync, sync_dir};
use crate::value::Document;
use crate::wal::{list_segments, segment_name, LogWriter, COMPACT_SUFFIX};

/// When a store's log is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Compact once the log holds this many entries per live record; 0 disables
    pub factor: u64,
    /// Never compact a log with fewer entries than this
    pub min_entries: u64,
}

impl CompactionPolicy {
    pub fn disabled() -> Self {
        Self { factor: 0, min_entries: 0 }
    }

    pub fn should_compact(&self, log_entries: u64, live_records: usize) -> bool {
        if self.factor == 0 || log_entries < self.min_entries {
            return false;
        }
        log_entries >= self.factor.saturating_mul((live_records as u64).max(1))
    }
}

/// Result of a compaction operation.
#[derive(Debug)]
pub struct CompactionResult {
    /// The segment now holding the snapshot
    pub segment: PathBuf,
    /// Entries in the log before compaction
    pub original_entries: u64,
    /// Live records written to the snapshot
    pub live_entries: usize,
    /// Older segments deleted
    pub removed_segments: usize,
    /// Size of the snapshot segment in bytes
    pub compacted_bytes: u64,
}

impl CompactionResult {
    /// Entries the new log holds: the live records plus the `Clear` marker.
    pub fn log_entries(&self) -> u64 {
        self.live_entries as u64 + 1
    }
}

/// Replace the log behind `writer` with a snapshot of `live`, in order.
///
/// On success the writer appends to the snapshot segment. On failure before
/// the rename the writer and the old segments are untouched.
pub fn compact_log<'a, I>(
    writer: &mut LogWriter,
    original_entries: u64,
    live: I,
) -> BurrowResult<CompactionResult>
where
    I: IntoIterator<Item = (&'a str, &'a Document)>,
{
    writer.sync()?;
    let dir = writer.dir().to_path_buf();
    let limits = writer.limits();
    let sequence = writer.sequence() + 1;
    let segment = dir.join(segment_name(sequence));
    let staging = dir.join(format!("{}{}", segment_name(sequence), COMPACT_SUFFIX));

    let write_snapshot = || -> BurrowResult<(fs::File, usize, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)
            .map_err(|e| BurrowError::io_at(&staging, &e, "failed to create compaction file"))?;
        let mut out = BufWriter::new(file);
        let mut bytes = 0u64;
        let mut count = 0usize;

        let clear = encode_clear();
        out.write_all(&clear)
            .map_err(|e| BurrowError::io_at(&staging, &e, "compaction write failed"))?;
        bytes += clear.len() as u64;
        for (key, value) in live {
            let entry = encode_entry(key, Some(value), limits)?;
            out.write_all(&entry)
                .map_err(|e| BurrowError::io_at(&staging, &e, "compaction write failed"))?;
            bytes += entry.len() as u64;
            count += 1;
        }

        let file = out
            .into_inner()
            .map_err(|e| BurrowError::io_at(&staging, e.error(), "compaction flush failed"))?;
        durable_sync(&file)
            .map_err(|e| BurrowError::io_at(&staging, &e, "failed to sync compaction file"))?;
        Ok((file, count, bytes))
    };

    let (file, live_entries, compacted_bytes) = match write_snapshot() {
        Ok(done) => done,
        Err(e) => {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&staging, &segment) {
        let _ = fs::remove_file(&staging);
        return Err(BurrowError::io_at(&segment, &e, "failed to install compacted segment"));
    }
    // the handle still points at the renamed file, positioned at its end
    writer.adopt(file, segment.clone(), sequence, compacted_bytes);
    sync_dir(&dir).map_err(|e| BurrowError::io_at(&dir, &e, "failed to sync log directory"))?;

    let mut removed_segments = 0;
    for (seq, path) in list_segments(&dir)? {
        if seq < sequence {
            fs::remove_file(&path)
                .map_err(|e| BurrowError::io_at(&path, &e, "failed to remove old segment"))?;
            removed_segments += 1;
        }
    }
    sync_dir(&dir).map_err(|e| BurrowError::io_at(&dir, &e, "failed to sync log directory"))?;

    Ok(CompactionResult {
        segment,
        original_entries,
        live_entries,
        removed_segments,
        compacted_bytes,
    })
}
