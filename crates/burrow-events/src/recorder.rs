//! Middleware that writes every batch it sees into a Burrow database.

use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::{BurrowError, BurrowResult, Database};

use crate::event::EventRecord;
use crate::router::{EventRouter, Flow, Middleware};

/// Stores each batch under its block number (stringified) via
/// `Database::store_batch`, replacing any earlier batch for that block.
pub struct BatchRecorder {
    database: Database,
}

impl BatchRecorder {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Install a recorder for `database` at the end of `router`'s chain.
    pub fn attach(router: &mut EventRouter, database: Database) {
        router.use_middleware(Arc::new(Self::new(database)));
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl Middleware for BatchRecorder {
    async fn handle(&self, batch: &[EventRecord]) -> BurrowResult<Flow> {
        let first = batch
            .first()
            .ok_or_else(|| BurrowError::validation("batch", "must contain at least one event"))?;
        let sequence = first.sequence();

        let items = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        self.database.store_batch(sequence, items).await?;
        tracing::debug!(
            database = self.database.name(),
            block = sequence,
            events = batch.len(),
            "batch recorded"
        );
        Ok(Flow::Next)
    }
}
