//! Named, lazily opened store handles.
//!
//! Each name maps to a `OnceCell` slot. Concurrent first access to a name
//! awaits the same slot, so the driver sees exactly one `open` call; the
//! map lock is never held across an await.
//!
//! Opening and dropping are ordered by `gate`: slot initialization holds it
//! shared, `drop_database` holds it exclusively. A `get` racing a drop waits
//! for the drop to finish and then opens the fresh store.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{OnceCell, RwLock};

use crate::driver::Store;
use crate::error::{BurrowError, BurrowResult};
use crate::selection::DriverSelector;

type Slot = Arc<OnceCell<Arc<dyn Store>>>;

pub struct InstancePool {
    selector: Arc<DriverSelector>,
    slots: Mutex<HashMap<String, Slot>>,
    gate: RwLock<()>,
}

impl InstancePool {
    pub fn new(selector: Arc<DriverSelector>) -> Self {
        Self {
            selector,
            slots: Mutex::new(HashMap::new()),
            gate: RwLock::new(()),
        }
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    /// Cached handle for `name`, opening it through the selected driver on
    /// first use. Open failures propagate and are not cached.
    pub async fn get(&self, name: &str) -> BurrowResult<Arc<dyn Store>> {
        if name.is_empty() {
            return Err(BurrowError::validation("database", "name must not be empty"));
        }
        if let Some(store) = self.slot(name).get() {
            return Ok(Arc::clone(store));
        }

        let _open = self.gate.read().await;
        // look again: a drop that held the gate may have replaced the slot
        let slot = self.slot(name);
        let store = slot
            .get_or_try_init(|| async {
                let driver = self.selector.select().await;
                tracing::debug!(database = name, driver = driver.name(), "creating store handle");
                driver.open(name).await
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Irreversibly delete `name` and evict its handle. The next `get`
    /// opens a fresh, empty store.
    #[tracing::instrument(skip(self))]
    pub async fn drop_database(&self, name: &str) -> BurrowResult<()> {
        if name.is_empty() {
            return Err(BurrowError::validation("database", "name must not be empty"));
        }
        let _drop = self.gate.write().await;
        let cached = self.slots.lock().remove(name).and_then(|slot| slot.get().cloned());
        let store = match cached {
            Some(store) => store,
            None => self.selector.select().await.open(name).await?,
        };
        tracing::debug!(database = name, "dropping store");
        store.drop_instance().await
    }

    /// Evict every handle without touching stored data.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Names with an open handle, sorted.
    pub fn cached_names(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn selector(&self) -> &Arc<DriverSelector> {
        &self.selector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, MemoryDriver, MemoryFaults};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Opens slowly so concurrent callers pile up on the same slot.
    struct SlowDriver {
        inner: MemoryDriver,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl Driver for SlowDriver {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn open(&self, name: &str) -> BurrowResult<Arc<dyn Store>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.open(name).await
        }
    }

    /// Store whose `drop_instance` takes a while, leaving room for racing calls.
    struct SlowDropStore {
        inner: Arc<dyn Store>,
    }

    #[async_trait]
    impl Store for SlowDropStore {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn get(&self, key: &str) -> BurrowResult<Option<crate::value::Document>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: crate::value::Document) -> BurrowResult<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> BurrowResult<()> {
            self.inner.delete(key).await
        }

        async fn iterate(&self, visit: crate::driver::Visit<'_>) -> BurrowResult<()> {
            self.inner.iterate(visit).await
        }

        async fn drop_instance(&self) -> BurrowResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.drop_instance().await
        }
    }

    struct SlowDropDriver {
        inner: MemoryDriver,
    }

    #[async_trait]
    impl Driver for SlowDropDriver {
        fn name(&self) -> &'static str {
            "slow-drop"
        }

        async fn open(&self, name: &str) -> BurrowResult<Arc<dyn Store>> {
            let inner = self.inner.open(name).await?;
            Ok(Arc::new(SlowDropStore { inner }))
        }
    }

    fn pool_over(driver: Arc<dyn Driver>) -> InstancePool {
        InstancePool::new(Arc::new(DriverSelector::new(Arc::clone(&driver), driver)))
    }

    #[tokio::test]
    async fn test_get_caches_handle() {
        let driver = Arc::new(MemoryDriver::new());
        let pool = pool_over(driver.clone());
        let a = pool.get("blocks").await.unwrap();
        let b = pool.get("blocks").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // probe open + one store open
        assert_eq!(driver.open_count(), 2);
        assert_eq!(pool.cached_names(), vec!["blocks"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_opens_once() {
        let driver =
            Arc::new(SlowDriver { inner: MemoryDriver::new(), opens: AtomicUsize::new(0) });
        let pool = Arc::new(pool_over(driver.clone()));
        pool.selector().select().await;
        let after_probe = driver.opens.load(Ordering::SeqCst);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move { pool.get("shared").await.unwrap() }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(driver.opens.load(Ordering::SeqCst) - after_probe, 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_drop_database_recreates_empty() {
        let pool = pool_over(Arc::new(MemoryDriver::new()));
        let store = pool.get("db").await.unwrap();
        store.set("k", Default::default()).await.unwrap();

        pool.drop_database("db").await.unwrap();
        assert!(pool.cached_names().is_empty());

        let fresh = pool.get("db").await.unwrap();
        assert!(!Arc::ptr_eq(&store, &fresh));
        assert_eq!(fresh.get("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_during_drop_sees_fresh_store() {
        let pool = Arc::new(pool_over(Arc::new(SlowDropDriver { inner: MemoryDriver::new() })));
        let old = pool.get("db").await.unwrap();
        old.set("k", Default::default()).await.unwrap();

        let dropper = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.drop_database("db").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let during = pool.get("db").await.unwrap();
        dropper.await.unwrap().unwrap();

        assert!(!Arc::ptr_eq(&old, &during));
        assert_eq!(during.get("k").await.unwrap(), None);
        during.set("fresh", Default::default()).await.unwrap();
        assert!(pool.get("db").await.unwrap().get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_uncached_database_removes_data() {
        let driver = Arc::new(MemoryDriver::new());
        driver.open("db").await.unwrap().set("k", Default::default()).await.unwrap();

        let pool = pool_over(driver.clone());
        pool.drop_database("db").await.unwrap();
        assert_eq!(pool.get("db").await.unwrap().get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_failure_is_not_cached() {
        let closed: Arc<dyn Driver> =
            Arc::new(MemoryDriver::with_faults(MemoryFaults {
                fail_open: true,
                ..Default::default()
            }));
        let pool = pool_over(closed);
        assert!(matches!(pool.get("db").await, Err(BurrowError::DriverUnavailable { .. })));
        assert!(pool.cached_names().is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let pool = pool_over(Arc::new(MemoryDriver::new()));
        assert!(matches!(
            pool.get("").await,
            Err(BurrowError::Validation { field: "database", .. })
        ));
    }
}
