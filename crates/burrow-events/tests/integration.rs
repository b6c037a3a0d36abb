//! End-to-end: batches dispatched through a router land in a database.

use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::{Burrow, BurrowResult, Config, MemoryDriver, MemoryFaults, QuerySpec};
use burrow_events::{BatchRecorder, EventRecord, EventRouter, Flow, Middleware};
use serde_json::json;
use tempfile::TempDir;

fn block(number: u64) -> Vec<EventRecord> {
    (0..3)
        .map(|i| {
            EventRecord::new(number, format!("0x{:04x}{:02x}", number, i), i, "Transfer")
                .with_return_values(json!({ "value": (number * 10 + i as u64).to_string() }))
        })
        .collect()
}

async fn router_for(burrow: &Burrow, name: &str) -> EventRouter {
    let mut router = EventRouter::new();
    BatchRecorder::attach(&mut router, burrow.database(name));
    router
}

#[tokio::test]
async fn test_recent_blocks_are_readable_by_number() {
    let dir = TempDir::new().unwrap();
    let burrow = Burrow::open(Config::ephemeral().with_data_dir(dir.path())).await.unwrap();
    let router = router_for(&burrow, "TxnTestDB").await;

    let latest = 1_000u64;
    for number in latest - 5..=latest {
        assert_eq!(router.dispatch(&block(number)).await.unwrap(), Flow::Next);
    }

    let db = burrow.database("TxnTestDB");
    for number in latest - 5..=latest {
        let found = db.read(&number.to_string()).await.unwrap();
        assert_eq!(found.len(), 1);
        let txns = found[0].value["txns"].as_array().unwrap();
        assert_eq!(txns.len(), 3);
        assert!(txns.iter().all(|t| t["blockNumber"] == json!(number)));
    }

    db.remove_database().await.unwrap();
    assert!(db.read(&latest.to_string()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redelivered_block_replaces_previous_batch() {
    let dir = TempDir::new().unwrap();
    let burrow = Burrow::open(Config::ephemeral().with_data_dir(dir.path())).await.unwrap();
    let router = router_for(&burrow, "events").await;

    router.dispatch(&block(7)).await.unwrap();
    router.dispatch(&block(7)[..1]).await.unwrap();

    let found = burrow.database("events").read("7").await.unwrap();
    assert_eq!(found[0].value["txns"].as_array().unwrap().len(), 1);
}

struct OnlyEvenBlocks;

#[async_trait]
impl Middleware for OnlyEvenBlocks {
    async fn handle(&self, batch: &[EventRecord]) -> BurrowResult<Flow> {
        match batch.first() {
            Some(event) if event.block_number % 2 == 0 => Ok(Flow::Next),
            _ => Ok(Flow::End),
        }
    }
}

#[tokio::test]
async fn test_upstream_middleware_can_skip_recording() {
    let dir = TempDir::new().unwrap();
    let burrow = Burrow::open(Config::ephemeral().with_data_dir(dir.path())).await.unwrap();
    let mut router = EventRouter::new();
    router.use_middleware(Arc::new(OnlyEvenBlocks));
    BatchRecorder::attach(&mut router, burrow.database("even"));

    for number in 1..=6 {
        router.dispatch(&block(number)).await.unwrap();
    }

    let db = burrow.database("even");
    let stored = db.read_all(&QuerySpec::new().unsorted()).await.unwrap();
    let keys: Vec<_> = stored.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["2", "4", "6"]);
}

#[tokio::test]
async fn test_recorded_blocks_persist_on_file_driver() {
    let dir = TempDir::new().unwrap();
    let config = Config::ephemeral().with_data_dir(dir.path());
    let broken = || {
        Arc::new(MemoryDriver::with_faults(MemoryFaults { fail_open: true, ..Default::default() }))
    };

    {
        let burrow = Burrow::builder(config.clone()).primary(broken()).build().await.unwrap();
        assert!(burrow.used_fallback());
        let router = router_for(&burrow, "chain").await;
        for number in 20..=22 {
            router.dispatch(&block(number)).await.unwrap();
        }
        burrow.close();
    }

    let burrow = Burrow::builder(config).primary(broken()).build().await.unwrap();
    let page = burrow
        .database("chain")
        .find(&QuerySpec::new().unsorted().limit(2).include_total(true))
        .await
        .unwrap();
    assert_eq!(page.total(), Some(3));
    let keys: Vec<_> = page.records().iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["20", "21"]);
}
