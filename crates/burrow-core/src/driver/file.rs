//! Filesystem fallback driver.
//!
//! Each store is a directory under the driver root holding an append-only
//! log (see `wal`). Reads are served from a RAM table rebuilt by replaying
//! the log on open; writes hit the log first, RAM second.
//!
//! **Read path**: RAM only, under a read lock
//! **Write path**: log append (+ fsync) on the blocking pool, then RAM, then
//! compaction once the log outgrows the live set

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{Driver, Store, Visit};
use crate::compaction::{compact_log, CompactionPolicy};
use crate::config::Config;
use crate::error::{BurrowError, BurrowResult};
use crate::format::{EntryLimits, Operation};
use crate::ordered::OrderedTable;
use crate::platform_durability::sync_dir;
use crate::value::Document;
use crate::wal::{LogOptions, LogReader, LogWriter};

/// Run blocking filesystem work off the async scheduler.
async fn run_blocking<T, F>(f: F) -> BurrowResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BurrowResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BurrowError::Internal(format!("blocking task failed: {}", e)))?
}

/// Directory name for a store: ASCII alphanumerics, `-` and `_` pass
/// through, every other byte is `%XX`-escaped so names cannot walk out of
/// the root.
fn store_dir_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub struct FileDriver {
    root: PathBuf,
    options: LogOptions,
    compaction: CompactionPolicy,
}

impl FileDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.data_dir.clone(),
            options: LogOptions {
                durable: config.durable_writes,
                rotation_bytes: config.log_rotation_bytes,
                limits: EntryLimits {
                    max_key_size: config.max_key_size,
                    max_value_size: config.max_value_size,
                },
            },
            compaction: CompactionPolicy {
                factor: config.compaction_factor,
                min_entries: config.compaction_min_entries,
            },
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the store called `name` keeps its log.
    pub fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(store_dir_name(name))
    }
}

#[async_trait]
impl Driver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open(&self, name: &str) -> BurrowResult<Arc<dyn Store>> {
        let name = name.to_string();
        let dir = self.store_dir(&name);
        let root = self.root.clone();
        let options = self.options;
        let compaction = self.compaction;

        let inner = run_blocking(move || {
            let recovery = LogReader::new(&dir).recover()?;
            recovery.truncate_torn_tail()?;

            let mut table = OrderedTable::new();
            let replayed = recovery.entries.len();
            for entry in recovery.entries {
                match (entry.operation, entry.value) {
                    (Operation::Put, Some(value)) => table.insert(entry.key, value),
                    (Operation::Delete, _) => {
                        table.remove(&entry.key);
                    }
                    (Operation::Clear, _) => table.clear(),
                    (Operation::Put, None) => {}
                }
            }

            let writer = LogWriter::open(&dir, options)?;
            sync_dir(&root)
                .map_err(|e| BurrowError::io_at(&root, &e, "failed to sync data directory"))?;

            if replayed > 0 {
                tracing::debug!(
                    store = %name,
                    replayed,
                    live = table.len(),
                    "recovered store from log"
                );
            }

            Ok(FileStoreInner {
                name,
                dir,
                table: RwLock::new(table),
                log: Mutex::new(Some(Journal { writer, entries: replayed as u64 })),
                compaction,
            })
        })
        .await?;

        Ok(Arc::new(FileStore { inner: Arc::new(inner) }))
    }
}

/// The open log plus the number of entries it holds.
struct Journal {
    writer: LogWriter,
    entries: u64,
}

struct FileStoreInner {
    name: String,
    dir: PathBuf,
    table: RwLock<OrderedTable>,
    /// `None` once the store has been dropped
    log: Mutex<Option<Journal>>,
    compaction: CompactionPolicy,
}

impl FileStoreInner {
    fn dropped(&self) -> BurrowError {
        BurrowError::StoreDropped { name: self.name.clone() }
    }

    fn is_live(&self) -> bool {
        self.log.lock().is_some()
    }

    /// Log first, then RAM, both under the log lock so replay order matches
    /// the table.
    fn put(&self, key: String, value: Document) -> BurrowResult<()> {
        let mut log = self.log.lock();
        let journal = log.as_mut().ok_or_else(|| self.dropped())?;
        journal.writer.append_put(&key, &value)?;
        journal.entries += 1;
        self.table.write().insert(key, value);
        self.maybe_compact(journal);
        Ok(())
    }

    fn put_many(&self, items: Vec<(String, Document)>) -> BurrowResult<()> {
        let mut log = self.log.lock();
        let journal = log.as_mut().ok_or_else(|| self.dropped())?;
        journal.writer.append_batch(&items)?;
        journal.entries += items.len() as u64;
        {
            let mut table = self.table.write();
            for (key, value) in items {
                table.insert(key, value);
            }
        }
        self.maybe_compact(journal);
        Ok(())
    }

    fn remove(&self, key: &str) -> BurrowResult<()> {
        let mut log = self.log.lock();
        let journal = log.as_mut().ok_or_else(|| self.dropped())?;
        if self.table.read().get(key).is_none() {
            return Ok(());
        }
        journal.writer.append_delete(key)?;
        journal.entries += 1;
        self.table.write().remove(key);
        self.maybe_compact(journal);
        Ok(())
    }

    /// Rewrite the log as a snapshot of the table once it is too long.
    ///
    /// Runs after the mutation is durable, so a failure here is logged and
    /// retried on a later write instead of failing the caller.
    fn maybe_compact(&self, journal: &mut Journal) {
        let table = self.table.read();
        if !self.compaction.should_compact(journal.entries, table.len()) {
            return;
        }
        match compact_log(&mut journal.writer, journal.entries, table.iter()) {
            Ok(result) => {
                tracing::debug!(
                    store = %self.name,
                    before = result.original_entries,
                    live = result.live_entries,
                    removed_segments = result.removed_segments,
                    "compacted store log"
                );
                journal.entries = result.log_entries();
            }
            Err(e) => {
                tracing::warn!(store = %self.name, error = %e, "log compaction failed");
            }
        }
    }

    fn destroy(&self) -> BurrowResult<()> {
        let mut log = self.log.lock();
        if log.take().is_none() {
            return Err(self.dropped());
        }
        self.table.write().clear();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BurrowError::io_at(&self.dir, &e, "failed to remove store directory")),
        }
    }
}

pub struct FileStore {
    inner: Arc<FileStoreInner>,
}

impl FileStore {
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }
}

#[async_trait]
impl Store for FileStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn get(&self, key: &str) -> BurrowResult<Option<Document>> {
        if !self.inner.is_live() {
            return Err(self.inner.dropped());
        }
        Ok(self.inner.table.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Document) -> BurrowResult<()> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        run_blocking(move || inner.put(key, value)).await
    }

    async fn set_many(&self, items: Vec<(String, Document)>) -> BurrowResult<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.put_many(items)).await
    }

    async fn delete(&self, key: &str) -> BurrowResult<()> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        run_blocking(move || inner.remove(&key)).await
    }

    async fn iterate(&self, visit: Visit<'_>) -> BurrowResult<()> {
        if !self.inner.is_live() {
            return Err(self.inner.dropped());
        }
        self.inner.table.read().for_each(visit);
        Ok(())
    }

    async fn drop_instance(&self) -> BurrowResult<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.destroy()).await
    }
}
