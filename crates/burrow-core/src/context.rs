//! The explicitly constructed context that owns driver selection, the
//! instance pool and the query engine.

use std::sync::Arc;

use crate::config::Config;
use crate::database::Database;
use crate::driver::{Driver, FileDriver, MemoryDriver};
use crate::engine::QueryEngine;
use crate::error::BurrowResult;
use crate::pool::InstancePool;
use crate::selection::DriverSelector;

/// Entry point: build one per process (or per test) and hand out
/// [`Database`] views from it.
///
/// Construction validates the config and runs driver selection, so the
/// backend is fixed before the first database is opened.
pub struct Burrow {
    config: Config,
    selector: Arc<DriverSelector>,
    engine: Arc<QueryEngine>,
}

impl Burrow {
    /// In-memory primary with the filesystem driver under
    /// `config.data_dir` as fallback.
    pub async fn open(config: Config) -> BurrowResult<Self> {
        Self::builder(config).build().await
    }

    pub fn builder(config: Config) -> BurrowBuilder {
        BurrowBuilder { config, primary: None, fallback: None }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// View bound to the logical database `name`.
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database::new(Arc::clone(&self.engine), name)
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    /// Name of the driver chosen at construction.
    pub async fn driver_name(&self) -> &'static str {
        self.selector.select().await.name()
    }

    pub fn used_fallback(&self) -> bool {
        self.selector.used_fallback().unwrap_or(false)
    }

    /// Release every cached handle. Data stays with the driver.
    pub fn close(self) {
        self.engine.pool().clear();
        tracing::debug!("burrow closed");
    }
}

pub struct BurrowBuilder {
    config: Config,
    primary: Option<Arc<dyn Driver>>,
    fallback: Option<Arc<dyn Driver>>,
}

impl BurrowBuilder {
    pub fn primary(mut self, driver: Arc<dyn Driver>) -> Self {
        self.primary = Some(driver);
        self
    }

    pub fn fallback(mut self, driver: Arc<dyn Driver>) -> Self {
        self.fallback = Some(driver);
        self
    }

    pub async fn build(self) -> BurrowResult<Burrow> {
        self.config.validate()?;
        let primary: Arc<dyn Driver> = match self.primary {
            Some(driver) => driver,
            None => Arc::new(MemoryDriver::new()),
        };
        let fallback: Arc<dyn Driver> = match self.fallback {
            Some(driver) => driver,
            None => Arc::new(FileDriver::new(&self.config)),
        };

        let selector = Arc::new(DriverSelector::new(primary, fallback));
        let driver = selector.select().await;
        tracing::debug!(
            driver = driver.name(),
            fallback = ?selector.used_fallback(),
            "driver selected"
        );

        let pool = Arc::new(InstancePool::new(Arc::clone(&selector)));
        let engine = Arc::new(QueryEngine::new(pool, self.config.query_size_limit));
        Ok(Burrow { config: self.config, selector, engine })
    }
}
