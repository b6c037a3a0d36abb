//! One-time choice between the primary driver and the fallback.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::driver::Driver;
use crate::error::BurrowResult;
use crate::value::Document;

/// Store opened on the primary driver for the capability probe.
pub const PROBE_STORE: &str = "__burrow_probe";
/// Key written and removed by the probe.
pub const PROBE_KEY: &str = "__test";

struct Selection {
    driver: Arc<dyn Driver>,
    used_fallback: bool,
}

/// Decides once, for the lifetime of the selector, which driver backs every
/// logical database.
pub struct DriverSelector {
    primary: Arc<dyn Driver>,
    fallback: Arc<dyn Driver>,
    chosen: OnceCell<Selection>,
}

impl DriverSelector {
    pub fn new(primary: Arc<dyn Driver>, fallback: Arc<dyn Driver>) -> Self {
        Self { primary, fallback, chosen: OnceCell::new() }
    }

    /// Write, read back and delete a sentinel on the primary driver.
    ///
    /// `true` only when the read-back is a non-empty document. Failures are
    /// logged and reported as `false`.
    pub async fn probe_primary(&self) -> bool {
        match self.round_trip().await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(driver = self.primary.name(), "primary probe read back nothing");
                false
            }
            Err(e) => {
                tracing::warn!(driver = self.primary.name(), error = %e, "primary probe failed");
                false
            }
        }
    }

    async fn round_trip(&self) -> BurrowResult<bool> {
        let store = self.primary.open(PROBE_STORE).await?;
        let mut sentinel = Document::new();
        sentinel.insert("value".into(), Value::String("true".into()));

        store.set(PROBE_KEY, sentinel).await?;
        let read_back = store.get(PROBE_KEY).await?;
        tracing::debug!(driver = self.primary.name(), ?read_back, "primary probe read back");
        store.delete(PROBE_KEY).await?;

        Ok(read_back.map_or(false, |doc| !doc.is_empty()))
    }

    /// The chosen driver. The first call probes; later and concurrent calls
    /// observe that same decision.
    pub async fn select(&self) -> Arc<dyn Driver> {
        let selection = self
            .chosen
            .get_or_init(|| async {
                if self.probe_primary().await {
                    tracing::debug!(driver = self.primary.name(), "using primary driver");
                    Selection { driver: Arc::clone(&self.primary), used_fallback: false }
                } else {
                    tracing::debug!(driver = self.fallback.name(), "installing fallback driver");
                    Selection { driver: Arc::clone(&self.fallback), used_fallback: true }
                }
            })
            .await;
        Arc::clone(&selection.driver)
    }

    /// `None` until `select` has run.
    pub fn used_fallback(&self) -> Option<bool> {
        self.chosen.get().map(|s| s.used_fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, MemoryFaults};

    fn selector(faults: MemoryFaults) -> (DriverSelector, Arc<MemoryDriver>) {
        let primary = Arc::new(MemoryDriver::with_faults(faults));
        let fallback = Arc::new(MemoryDriver::new());
        let selector = DriverSelector::new(primary.clone(), fallback.clone());
        (selector, fallback)
    }

    #[tokio::test]
    async fn test_healthy_primary_is_kept() {
        let (selector, _) = selector(MemoryFaults::default());
        assert!(selector.probe_primary().await);
        assert_eq!(selector.used_fallback(), None);
        assert_eq!(selector.select().await.name(), "memory");
        assert_eq!(selector.used_fallback(), Some(false));
    }

    #[tokio::test]
    async fn test_probe_cleans_up_sentinel() {
        let primary = Arc::new(MemoryDriver::new());
        let selector = DriverSelector::new(primary.clone(), Arc::new(MemoryDriver::new()));
        assert!(selector.probe_primary().await);
        let store = primary.open(PROBE_STORE).await.unwrap();
        assert_eq!(store.get(PROBE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_each_fault_selects_fallback() {
        let faults = [
            MemoryFaults { fail_open: true, ..Default::default() },
            MemoryFaults { fail_writes: true, ..Default::default() },
            MemoryFaults { blank_reads: true, ..Default::default() },
        ];
        for fault in faults {
            let (selector, fallback) = selector(fault);
            assert!(!selector.probe_primary().await, "{:?} should fail the probe", fault);
            let chosen = selector.select().await;
            let fallback_dyn: Arc<dyn Driver> = fallback;
            assert!(Arc::ptr_eq(&chosen, &fallback_dyn));
            assert_eq!(selector.used_fallback(), Some(true));
        }
    }

    #[tokio::test]
    async fn test_select_is_idempotent() {
        let primary = Arc::new(MemoryDriver::new());
        let selector = DriverSelector::new(primary.clone(), Arc::new(MemoryDriver::new()));
        let first = selector.select().await;
        let second = selector.select().await;
        assert!(Arc::ptr_eq(&first, &second));
        // one probe, one open
        assert_eq!(primary.open_count(), 1);
    }
}
