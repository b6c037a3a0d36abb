//! Decoded contract events as delivered by an event source.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded log event.
///
/// Field names follow the camelCase JSON shape event sources emit, so a
/// stored batch can be queried with selectors such as `blockNumber`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    /// Event name, e.g. `Transfer`
    pub event: String,
    /// Decoded event arguments
    #[serde(default)]
    pub return_values: Value,
}

impl EventRecord {
    pub fn new(
        block_number: u64,
        transaction_hash: impl Into<String>,
        log_index: u32,
        event: impl Into<String>,
    ) -> Self {
        Self {
            block_number,
            transaction_hash: transaction_hash.into(),
            log_index,
            event: event.into(),
            return_values: Value::Null,
        }
    }

    pub fn with_return_values(mut self, values: Value) -> Self {
        self.return_values = values;
        self
    }

    /// Sequence identifier shared by every event of a batch.
    pub fn sequence(&self) -> u64 {
        self.block_number
    }
}
