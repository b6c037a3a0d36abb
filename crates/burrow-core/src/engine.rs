//! Query engine: CRUD plus filtering, sorting and paging over a store that
//! can only iterate.
//!
//! **Read path**: errors propagate unchanged
//! **Write path**: errors are logged and returned as `WriteFailed`
//!
//! Paging caveat: `find` and `read_all` assume the store does not change
//! while they scan. A write that lands during a scan can move records across
//! the offset boundary, so a page may repeat or miss a record. Callers that
//! need stable pages must hold writes off while paging.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::driver::Store;
use crate::error::{BurrowError, BurrowResult, WriteOp};
use crate::pool::InstancePool;
use crate::query::{apply_sort, QueryResult, QuerySpec};
use crate::value::{Document, Record};

fn check_key(key: &str) -> BurrowResult<()> {
    if key.is_empty() {
        return Err(BurrowError::validation("key", "must not be empty"));
    }
    Ok(())
}

/// Executes operations against store handles from an [`InstancePool`].
/// Every method names its logical database explicitly.
pub struct QueryEngine {
    pool: Arc<InstancePool>,
    query_size_limit: usize,
}

impl QueryEngine {
    pub fn new(pool: Arc<InstancePool>, query_size_limit: usize) -> Self {
        Self { pool, query_size_limit }
    }

    pub fn pool(&self) -> &Arc<InstancePool> {
        &self.pool
    }

    pub fn query_size_limit(&self) -> usize {
        self.query_size_limit
    }

    async fn handle(&self, database: &str) -> BurrowResult<Arc<dyn Store>> {
        self.pool.get(database).await
    }

    /// Surface a driver write error as `WriteFailed`, logging it on the way.
    fn write_result(
        database: &str,
        operation: WriteOp,
        result: BurrowResult<()>,
    ) -> BurrowResult<()> {
        result.map_err(|e| {
            tracing::error!(database, %operation, error = %e, "write failed");
            BurrowError::write_failed(database, operation, e)
        })
    }

    /// Upsert `value` under `key`.
    pub async fn store(&self, database: &str, key: &str, value: Document) -> BurrowResult<()> {
        check_key(key)?;
        let store = self.handle(database).await?;
        Self::write_result(database, WriteOp::Store, store.set(key, value).await)
    }

    /// Same upsert as `store`; kept separate so failures name the operation.
    pub async fn update(&self, database: &str, key: &str, value: Document) -> BurrowResult<()> {
        check_key(key)?;
        let store = self.handle(database).await?;
        Self::write_result(database, WriteOp::Update, store.set(key, value).await)
    }

    pub async fn store_bulk(
        &self,
        database: &str,
        items: Vec<(String, Document)>,
    ) -> BurrowResult<()> {
        for (key, _) in &items {
            check_key(key)?;
        }
        let store = self.handle(database).await?;
        Self::write_result(database, WriteOp::StoreBulk, store.set_many(items).await)
    }

    /// Zero or one record.
    pub async fn read(&self, database: &str, key: &str) -> BurrowResult<Vec<Record>> {
        check_key(key)?;
        let store = self.handle(database).await?;
        Ok(store
            .get(key)
            .await?
            .map(|value| Record::new(key, value))
            .into_iter()
            .collect())
    }

    /// Delete `key`; an absent key is a no-op.
    pub async fn remove(&self, database: &str, key: &str) -> BurrowResult<()> {
        check_key(key)?;
        let store = self.handle(database).await?;
        Self::write_result(database, WriteOp::Remove, store.delete(key).await)
    }

    /// Irreversibly destroy `database`.
    pub async fn remove_database(&self, database: &str) -> BurrowResult<()> {
        self.pool.drop_database(database).await
    }

    /// Call `callback(value, key, ordinal)` for each record in store order.
    /// The first `Some` stops the walk and is returned.
    pub async fn iterate<T, F>(&self, database: &str, mut callback: F) -> BurrowResult<Option<T>>
    where
        T: Send,
        F: FnMut(&Document, &str, u64) -> Option<T> + Send,
    {
        let store = self.handle(database).await?;
        let mut found = None;
        store
            .iterate(&mut |key: &str, value: &Document, ordinal: u64| {
                match callback(value, key, ordinal) {
                    Some(v) => {
                        found = Some(v);
                        ControlFlow::Break(())
                    }
                    None => ControlFlow::Continue(()),
                }
            })
            .await?;
        Ok(found)
    }

    /// Records kept by `spec.filter` (all, without one), at most `limit`, sorted.
    #[tracing::instrument(skip(self, spec), fields(limit = ?spec.limit))]
    pub async fn read_all(&self, database: &str, spec: &QuerySpec) -> BurrowResult<Vec<Record>> {
        let limit = spec.resolve_limit(self.query_size_limit)?;
        let store = self.handle(database).await?;

        let mut set: Vec<Record> = Vec::new();
        store
            .iterate(&mut |key: &str, value: &Document, ordinal: u64| {
                let keep = spec.filter.as_ref().map_or(true, |f| f.keep(value, key, ordinal));
                if keep {
                    set.push(Record::new(key, value.clone()));
                }
                if set.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;

        apply_sort(&mut set, spec.sort.as_deref());
        Ok(set)
    }

    /// Selector matches in `[offset, offset + limit)`, sorted, optionally with
    /// the total match count.
    ///
    /// One pass over the store. Without `include_total` the pass ends as soon
    /// as the window is full; with it the whole store is scanned so `total`
    /// is exact. Sorting applies to the window only.
    #[tracing::instrument(
        skip(self, spec),
        fields(limit = ?spec.limit, offset = spec.offset, include_total = spec.include_total)
    )]
    pub async fn find(&self, database: &str, spec: &QuerySpec) -> BurrowResult<QueryResult> {
        let limit = spec.resolve_limit(self.query_size_limit)?;
        let offset = spec.offset;
        let include_total = spec.include_total;
        let store = self.handle(database).await?;

        let mut window: Vec<Record> = Vec::new();
        let mut total = 0usize;
        store
            .iterate(&mut |key: &str, value: &Document, _ordinal: u64| {
                if !spec.selector.matches(value) {
                    return ControlFlow::Continue(());
                }
                total += 1;
                let skipping = total <= offset;
                if !skipping && window.len() < limit {
                    window.push(Record::new(key, value.clone()));
                }
                if window.len() >= limit && !include_total {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;

        apply_sort(&mut window, spec.sort.as_deref());
        tracing::debug!(database, total, returned = window.len(), "find complete");

        if include_total {
            Ok(QueryResult::Paged { total, data: window })
        } else {
            Ok(QueryResult::Records(window))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, MemoryFaults};
    use crate::query::{Selector, SortKey};
    use crate::selection::DriverSelector;
    use serde_json::json;

    fn engine_over(driver: MemoryDriver) -> QueryEngine {
        let driver = Arc::new(driver);
        let selector = Arc::new(DriverSelector::new(driver.clone(), driver));
        QueryEngine::new(Arc::new(InstancePool::new(selector)), 50)
    }

    fn engine() -> QueryEngine {
        engine_over(MemoryDriver::new())
    }

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn field(records: &[Record], name: &str) -> Vec<i64> {
        records.iter().map(|r| r.value[name].as_i64().unwrap()).collect()
    }

    async fn seeded(n: i64) -> QueryEngine {
        let engine = engine();
        for i in 1..=n {
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            engine
                .store("db", &i.to_string(), doc(json!({ "n": i, "parity": parity })))
                .await
                .unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_store_read_remove() {
        let engine = engine();
        engine.store("db", "k", doc(json!({"field": "value"}))).await.unwrap();
        let found = engine.read("db", "k").await.unwrap();
        assert_eq!(found, vec![Record::new("k", doc(json!({"field": "value"})))]);

        engine.remove("db", "k").await.unwrap();
        assert!(engine.read("db", "k").await.unwrap().is_empty());
        engine.remove("db", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_overwrites() {
        let engine = engine();
        engine.store("db", "k", doc(json!({"v": 1}))).await.unwrap();
        engine.update("db", "k", doc(json!({"v": 2}))).await.unwrap();
        assert_eq!(field(&engine.read("db", "k").await.unwrap(), "v"), vec![2]);
    }

    #[tokio::test]
    async fn test_empty_key_fails_before_io() {
        let engine = engine();
        let err = engine.store("db", "", Document::new()).await.unwrap_err();
        assert!(matches!(err, BurrowError::Validation { field: "key", .. }));
        assert!(engine.pool().cached_names().is_empty());
    }

    #[tokio::test]
    async fn test_write_failures_are_surfaced() {
        // the probe fails too, so the "fallback" (same driver) serves the store
        let faults = MemoryFaults { fail_writes: true, ..Default::default() };
        let engine = engine_over(MemoryDriver::with_faults(faults));
        let err = engine.store("db", "k", Document::new()).await.unwrap_err();
        assert!(err.is_write_failure());
        assert!(matches!(err, BurrowError::WriteFailed { operation: WriteOp::Store, .. }));

        let err = engine.remove("db", "k").await.unwrap_err();
        assert!(matches!(err, BurrowError::WriteFailed { operation: WriteOp::Remove, .. }));
    }

    #[tokio::test]
    async fn test_iterate_stops_on_some() {
        let engine = seeded(5).await;
        let mut seen = Vec::new();
        let hit = engine
            .iterate("db", |value, key, ordinal| {
                seen.push(ordinal);
                (value["n"] == json!(3)).then(|| key.to_string())
            })
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some("3"));
        assert_eq!(seen, vec![1, 2, 3]);

        let none: Option<()> = engine.iterate("db", |_, _, _| None).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_read_all_filter_limit_sort() {
        let engine = seeded(10).await;
        let spec = QuerySpec::new()
            .filter(|value, _, _| value["parity"] == json!("even"))
            .limit(3)
            .sort_by(SortKey::desc("n"));
        let records = engine.read_all("db", &spec).await.unwrap();
        assert_eq!(field(&records, "n"), vec![6, 4, 2]);
    }

    #[tokio::test]
    async fn test_read_all_default_limit() {
        let engine = seeded(60).await;
        let records = engine.read_all("db", &QuerySpec::new().unsorted()).await.unwrap();
        assert_eq!(records.len(), 50);
        assert_eq!(records[0].key, "1");
    }

    #[tokio::test]
    async fn test_find_window_after_offset() {
        let engine = seeded(10).await;
        let spec = QuerySpec::new().sort_by(SortKey::asc("n")).limit(3).offset(4);
        let result = engine.find("db", &spec).await.unwrap();
        assert_eq!(result.total(), None);
        assert_eq!(field(result.records(), "n"), vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_find_total_ignores_window() {
        let engine = seeded(10).await;
        let spec = QuerySpec::new()
            .selector(Selector::all().eq("parity", "odd"))
            .limit(2)
            .offset(1)
            .include_total(true)
            .sort_by(SortKey::asc("n"));
        let result = engine.find("db", &spec).await.unwrap();
        assert_eq!(result.total(), Some(5));
        assert_eq!(field(result.records(), "n"), vec![3, 5]);
    }

    #[tokio::test]
    async fn test_find_offset_past_end() {
        let engine = seeded(4).await;
        let spec = QuerySpec::new().offset(10).include_total(true);
        let result = engine.find("db", &spec).await.unwrap();
        assert_eq!(result, QueryResult::Paged { total: 4, data: vec![] });
    }

    #[tokio::test]
    async fn test_find_numeric_coercion() {
        let engine = engine();
        engine.store("db", "a", doc(json!({"amount": 5}))).await.unwrap();
        engine.store("db", "b", doc(json!({"amount": 6}))).await.unwrap();
        let spec = QuerySpec::new().selector(Selector::all().eq("amount", "5"));
        let result = engine.find("db", &spec).await.unwrap();
        assert_eq!(result.records().len(), 1);
        assert_eq!(result.records()[0].key, "a");
    }

    #[tokio::test]
    async fn test_remove_database_then_fresh() {
        let engine = seeded(3).await;
        engine.remove_database("db").await.unwrap();
        assert!(engine.read("db", "1").await.unwrap().is_empty());
        let all = engine.read_all("db", &QuerySpec::new()).await.unwrap();
        assert!(all.is_empty());
    }
}
