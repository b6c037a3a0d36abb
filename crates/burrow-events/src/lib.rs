//! Burrow adapter for blockchain event ingestion
//!
//! Event sources deliver decoded log events in batches, one batch per
//! block. Batches run through an `EventRouter` middleware chain; a
//! `BatchRecorder` in that chain persists each batch into a Burrow
//! database as `{"txns": [...]}` under the block number.
//!
//! # Architecture
//!
//! - `EventRecord` is the camelCase event shape sources emit
//! - `EventRouter` runs middleware in registration order until one ends the chain
//! - `BatchRecorder` turns a batch into a `Database::store_batch` call

pub mod event;
pub mod recorder;
pub mod router;

pub use event::EventRecord;
pub use recorder::BatchRecorder;
pub use router::{EventRouter, Flow, Middleware};
