//! In-memory primary driver.
//!
//! Stores live in a registry owned by the driver, so reopening a name sees
//! the same records until the store is dropped. Fault injection covers the
//! cases the driver selector has to survive: a backend that refuses to
//! open, one whose writes fail, and one that silently loses writes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use super::{Driver, Store, Visit};
use crate::error::{BurrowError, BurrowResult};
use crate::ordered::OrderedTable;
use crate::value::Document;

/// Faults applied to every store a [`MemoryDriver`] opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryFaults {
    /// `open` fails with `DriverUnavailable`
    pub fail_open: bool,
    /// `set`, `set_many` and `delete` fail with `SimulatedFault`
    pub fail_writes: bool,
    /// Writes succeed but `get` always reads back nothing
    pub blank_reads: bool,
}

type Registry = Mutex<HashMap<String, Arc<MemoryStore>>>;

pub struct MemoryDriver {
    registry: Arc<Registry>,
    faults: MemoryFaults,
    opens: AtomicU64,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_faults(MemoryFaults::default())
    }

    pub fn with_faults(faults: MemoryFaults) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            faults,
            opens: AtomicU64::new(0),
        }
    }

    /// Number of `open` calls served, successful or not.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Names of stores that currently exist.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, name: &str) -> BurrowResult<Arc<dyn Store>> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        if self.faults.fail_open {
            return Err(BurrowError::DriverUnavailable {
                driver: "memory",
                reason: "backend disabled".into(),
            });
        }

        let mut registry = self.registry.lock();
        let store = registry
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryStore {
                    name: name.to_string(),
                    table: RwLock::new(OrderedTable::new()),
                    faults: self.faults,
                    dropped: AtomicBool::new(false),
                    registry: Arc::downgrade(&self.registry),
                })
            })
            .clone();
        Ok(store)
    }
}

pub struct MemoryStore {
    name: String,
    table: RwLock<OrderedTable>,
    faults: MemoryFaults,
    dropped: AtomicBool,
    registry: Weak<Registry>,
}

impl MemoryStore {
    fn check_live(&self) -> BurrowResult<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(BurrowError::StoreDropped { name: self.name.clone() });
        }
        Ok(())
    }

    fn check_writable(&self, operation: &'static str) -> BurrowResult<()> {
        self.check_live()?;
        if self.faults.fail_writes {
            return Err(BurrowError::SimulatedFault { operation });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> BurrowResult<Option<Document>> {
        self.check_live()?;
        if self.faults.blank_reads {
            return Ok(None);
        }
        Ok(self.table.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Document) -> BurrowResult<()> {
        self.check_writable("set")?;
        self.table.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn set_many(&self, items: Vec<(String, Document)>) -> BurrowResult<()> {
        self.check_writable("set_many")?;
        let mut table = self.table.write();
        for (key, value) in items {
            table.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> BurrowResult<()> {
        self.check_writable("delete")?;
        self.table.write().remove(key);
        Ok(())
    }

    async fn iterate(&self, visit: Visit<'_>) -> BurrowResult<()> {
        self.check_live()?;
        self.table.read().for_each(visit);
        Ok(())
    }

    async fn drop_instance(&self) -> BurrowResult<()> {
        if self.dropped.swap(true, Ordering::AcqRel) {
            return Err(BurrowError::StoreDropped { name: self.name.clone() });
        }
        self.table.write().clear();
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock();
            let is_self = registry
                .get(&self.name)
                .map_or(false, |s| std::ptr::eq(Arc::as_ptr(s), self));
            if is_self {
                registry.remove(&self.name);
            }
        }
        Ok(())
    }
}
