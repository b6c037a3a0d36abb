//! Burrow Core: Key-Value Storage with an In-Process Query Engine
//!
//! Burrow stores JSON documents under string keys in named logical
//! databases and answers queries by scanning, because its backends offer
//! nothing but forward iteration.
//!
//! # Architecture
//!
//! - **DriverSelector**: probes the primary driver once, falls back to the
//!   filesystem driver if the probe fails
//! - **InstancePool**: one lazily opened, cached handle per database name,
//!   single-flight on first access
//! - **QueryEngine**: CRUD, `find` (equality selector, offset/limit window,
//!   optional exact total) and `read_all`, both sorted by repeated stable passes
//! - **Database**: the engine bound to one name
//!
//! Write failures are returned as `BurrowError::WriteFailed`, never dropped.
//!
//! ```no_run
//! use burrow_core::{Burrow, Config, QuerySpec, Selector, SortKey};
//! use serde_json::json;
//!
//! # async fn demo() -> burrow_core::BurrowResult<()> {
//! let burrow = Burrow::open(Config::default()).await?;
//! let blocks = burrow.database("blocks");
//! blocks.store("1", json!({"n": 1}).as_object().cloned().unwrap()).await?;
//!
//! let page = blocks
//!     .find(&QuerySpec::new()
//!         .selector(Selector::all().eq("n", "1"))
//!         .sort_by(SortKey::asc("n"))
//!         .include_total(true))
//!     .await?;
//! assert_eq!(page.total(), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod config;
pub mod context;
pub mod database;
pub mod driver;
pub mod engine;
pub mod error;
pub mod format;
mod ordered;
pub mod platform_durability;
pub mod pool;
pub mod query;
pub mod selection;
pub mod value;
pub mod wal;

pub use config::Config;
pub use context::{Burrow, BurrowBuilder};
pub use database::Database;
pub use driver::{Driver, FileDriver, MemoryDriver, MemoryFaults, Store};
pub use engine::QueryEngine;
pub use error::{BurrowError, BurrowResult, WriteOp};
pub use pool::InstancePool;
pub use query::{QueryResult, QuerySpec, Selector, SortKey, SortOrder};
pub use selection::DriverSelector;
pub use value::{Document, Record, Scalar};
