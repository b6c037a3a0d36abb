//! Typed query specifications and the multi-key sort.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BurrowError;
use crate::value::{compare_fields, Document, Record, Scalar};

/// Field sorted on when a query gives no sort at all.
pub const DEFAULT_SORT_FIELD: &str = "blockNumber";

/// Flat equality filter: every predicate must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    predicates: Vec<(String, Scalar)>,
}

impl Selector {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a `field == value` predicate. A repeated field replaces the earlier value.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.predicates.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.predicates.push((field, value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[(String, Scalar)] {
        &self.predicates
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.predicates
            .iter()
            .all(|(field, want)| want.matches(doc.get(field)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc", alias = "ASC")]
    Ascending,
    #[serde(rename = "desc", alias = "DESC")]
    Descending,
}

impl FromStr for SortOrder {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Ascending),
            "desc" => Ok(SortOrder::Descending),
            other => Err(BurrowError::validation(
                "sort.order",
                format!("expected 'asc' or 'desc', got '{}'", other),
            )),
        }
    }
}

/// One pass of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Ascending }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Descending }
    }
}

/// Predicate over `(value, key, ordinal)` used by `read_all`.
#[derive(Clone)]
pub struct Filter(Arc<dyn Fn(&Document, &str, u64) -> bool + Send + Sync>);

impl Filter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Document, &str, u64) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn keep(&self, value: &Document, key: &str, ordinal: u64) -> bool {
        (self.0)(value, key, ordinal)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

/// Parameters for `find` and `read_all`.
///
/// `find` reads `selector`, `sort`, `limit`, `offset` and `include_total`.
/// `read_all` reads `filter`, `sort` and `limit`.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub selector: Selector,
    /// `None` sorts by `blockNumber` descending; `Some(vec![])` keeps iteration order.
    pub sort: Option<Vec<SortKey>>,
    /// Window size; `None` uses the configured `query_size_limit`.
    pub limit: Option<usize>,
    pub offset: usize,
    pub include_total: bool,
    pub filter: Option<Filter>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Append a sort pass. Later passes dominate earlier ones.
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(key);
        self
    }

    /// Keep iteration order instead of the default `blockNumber` sort.
    pub fn unsorted(mut self) -> Self {
        self.sort = Some(Vec::new());
        self
    }

    /// Window size. Zero is rejected with a `limit` validation error when
    /// the query runs; leave the limit unset to get the configured default.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn include_total(mut self, include: bool) -> Self {
        self.include_total = include;
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document, &str, u64) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Filter::new(f));
        self
    }

    pub(crate) fn resolve_limit(&self, default_limit: usize) -> Result<usize, BurrowError> {
        match self.limit {
            Some(0) => Err(BurrowError::validation("limit", "must be greater than zero")),
            Some(n) => Ok(n),
            None => Ok(default_limit),
        }
    }
}

/// Output of `find`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Records(Vec<Record>),
    Paged { total: usize, data: Vec<Record> },
}

impl QueryResult {
    /// The returned window, whichever shape it came in.
    pub fn records(&self) -> &[Record] {
        match self {
            QueryResult::Records(data) | QueryResult::Paged { data, .. } => data,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            QueryResult::Records(data) | QueryResult::Paged { data, .. } => data,
        }
    }

    /// Total match count, present only when it was requested.
    pub fn total(&self) -> Option<usize> {
        match self {
            QueryResult::Paged { total, .. } => Some(*total),
            QueryResult::Records(_) => None,
        }
    }
}

/// Sort `records` by applying one full stable sort per key, in list order.
///
/// Each pass keeps the relative order of records it considers equal, so the
/// last key is the primary ordering and earlier keys only break its ties.
pub fn apply_sort(records: &mut [Record], sort: Option<&[SortKey]>) {
    let default_sort = [SortKey::desc(DEFAULT_SORT_FIELD)];
    let keys = sort.unwrap_or(&default_sort);
    for key in keys {
        records.sort_by(|a, b| {
            let ord = compare_fields(a.field(&key.field), b.field(&key.field));
            match key.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
    }
}
