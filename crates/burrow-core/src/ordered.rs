//! Insertion-ordered RAM table shared by the bundled drivers.
//!
//! Iteration follows first-insertion order; overwriting a key keeps its
//! slot, deleting it frees the slot for good.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use hashbrown::HashMap;

use crate::value::Document;

#[derive(Debug, Default)]
pub(crate) struct OrderedTable {
    /// key -> insertion sequence
    index: HashMap<String, u64>,
    /// insertion sequence -> entry, in iteration order
    entries: BTreeMap<u64, (String, Document)>,
    next_seq: u64,
}

impl OrderedTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Document> {
        let seq = self.index.get(key)?;
        self.entries.get(seq).map(|(_, doc)| doc)
    }

    pub(crate) fn insert(&mut self, key: String, value: Document) {
        if let Some(seq) = self.index.get(&key) {
            if let Some(slot) = self.entries.get_mut(seq) {
                slot.1 = value;
                return;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key.clone(), seq);
        self.entries.insert(seq, (key, value));
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(seq) => self.entries.remove(&seq).is_some(),
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in iteration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Document)> + '_ {
        self.entries.values().map(|(key, value)| (key.as_str(), value))
    }

    /// Visit entries in order with a 1-based ordinal until `visit` breaks.
    pub(crate) fn for_each(
        &self,
        visit: &mut (dyn FnMut(&str, &Document, u64) -> ControlFlow<()> + Send),
    ) {
        for (ordinal, (key, value)) in (1u64..).zip(self.entries.values()) {
            if visit(key, value, ordinal).is_break() {
                break;
            }
        }
    }
}
