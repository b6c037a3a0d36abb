//! Middleware chain that event batches flow through.

use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::BurrowResult;

use crate::event::EventRecord;

/// What the chain does after a middleware returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the batch to the next middleware
    Next,
    /// Stop here; later middleware does not see this batch
    End,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, batch: &[EventRecord]) -> BurrowResult<Flow>;
}

/// Runs every batch through its middleware in registration order.
#[derive(Default, Clone)]
pub struct EventRouter {
    chain: Vec<Arc<dyn Middleware>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.chain.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Dispatch one batch. Returns the flow of the last middleware that ran
    /// (`Next` for an empty chain); the first error aborts the chain.
    pub async fn dispatch(&self, batch: &[EventRecord]) -> BurrowResult<Flow> {
        for (position, middleware) in self.chain.iter().enumerate() {
            if middleware.handle(batch).await? == Flow::End {
                tracing::debug!(position, events = batch.len(), "chain ended early");
                return Ok(Flow::End);
            }
        }
        Ok(Flow::Next)
    }
}
