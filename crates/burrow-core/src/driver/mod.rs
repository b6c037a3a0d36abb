//! Backend driver contract.
//!
//! A [`Driver`] opens named stores; a [`Store`] is one logical database's
//! handle. Backends only need forward iteration: every query feature is
//! computed by the engine on top of [`Store::iterate`].

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BurrowResult;
use crate::value::Document;

pub mod file;
pub mod memory;

pub use file::FileDriver;
pub use memory::{MemoryDriver, MemoryFaults};

/// Visitor passed to [`Store::iterate`]: `(key, value, ordinal)`, ordinal from 1.
pub type Visit<'a> = &'a mut (dyn FnMut(&str, &Document, u64) -> ControlFlow<()> + Send);

/// Factory for named stores.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Open the store called `name`, creating it if it does not exist.
    async fn open(&self, name: &str) -> BurrowResult<Arc<dyn Store>>;
}

/// Handle to one named store.
///
/// After [`Store::drop_instance`] every call fails with `StoreDropped`.
#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> BurrowResult<Option<Document>>;

    /// Upsert.
    async fn set(&self, key: &str, value: Document) -> BurrowResult<()>;

    /// Upsert many. Drivers with a cheaper batch path override this.
    async fn set_many(&self, items: Vec<(String, Document)>) -> BurrowResult<()> {
        for (key, value) in items {
            self.set(&key, value).await?;
        }
        Ok(())
    }

    /// Delete; an absent key is not an error.
    async fn delete(&self, key: &str) -> BurrowResult<()>;

    /// Walk records in backend-native order until `visit` breaks.
    async fn iterate(&self, visit: Visit<'_>) -> BurrowResult<()>;

    /// Irreversibly delete every record and the store itself.
    async fn drop_instance(&self) -> BurrowResult<()>;
}
