//! Per-database view over the query engine.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::QueryEngine;
use crate::error::BurrowResult;
use crate::query::{QueryResult, QuerySpec};
use crate::value::{Document, Record};

/// Field holding the item list of a stored batch.
pub const BATCH_FIELD: &str = "txns";

/// One logical database: every call is forwarded to the shared
/// [`QueryEngine`] with this database's name.
#[derive(Clone)]
pub struct Database {
    engine: Arc<QueryEngine>,
    name: String,
}

impl Database {
    pub fn new(engine: Arc<QueryEngine>, name: impl Into<String>) -> Self {
        Self { engine, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn store(&self, key: &str, value: Document) -> BurrowResult<()> {
        self.engine.store(&self.name, key, value).await
    }

    pub async fn store_bulk(&self, items: Vec<(String, Document)>) -> BurrowResult<()> {
        self.engine.store_bulk(&self.name, items).await
    }

    pub async fn read(&self, key: &str) -> BurrowResult<Vec<Record>> {
        self.engine.read(&self.name, key).await
    }

    pub async fn read_all(&self, spec: &QuerySpec) -> BurrowResult<Vec<Record>> {
        self.engine.read_all(&self.name, spec).await
    }

    pub async fn find(&self, spec: &QuerySpec) -> BurrowResult<QueryResult> {
        self.engine.find(&self.name, spec).await
    }

    pub async fn update(&self, key: &str, value: Document) -> BurrowResult<()> {
        self.engine.update(&self.name, key, value).await
    }

    pub async fn remove(&self, key: &str) -> BurrowResult<()> {
        self.engine.remove(&self.name, key).await
    }

    /// Irreversibly destroy this database. The handle stays usable and
    /// sees an empty store afterwards.
    pub async fn remove_database(&self) -> BurrowResult<()> {
        self.engine.remove_database(&self.name).await
    }

    pub async fn iterate<T, F>(&self, callback: F) -> BurrowResult<Option<T>>
    where
        T: Send,
        F: FnMut(&Document, &str, u64) -> Option<T> + Send,
    {
        self.engine.iterate(&self.name, callback).await
    }

    /// Store a batch of items that share one sequence identifier.
    ///
    /// The batch lands under `sequence.to_string()` as `{"txns": items}`,
    /// replacing whatever batch was stored for that identifier before.
    pub async fn store_batch(&self, sequence: u64, items: Vec<Value>) -> BurrowResult<()> {
        let mut doc = Document::new();
        doc.insert(BATCH_FIELD.to_string(), Value::Array(items));
        self.store(&sequence.to_string(), doc).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}
