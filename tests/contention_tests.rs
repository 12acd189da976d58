/// Contention tests
///
/// Many handles incrementing one cell at the same time.
/// Run with: cargo test --test contention_tests

use counterstress::{
    CounterStore, DurabilityMode, HarnessConfig, StorageLocation, StoreConfig, increment,
    run_store,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_canonical_scenario() {
    let run = run_store(&HarnessConfig::default()).await.unwrap();
    let result = run.result;

    assert_eq!(result.final_counter_value, 1000);
    assert_eq!(result.max_successful_value, Some(1000));
    assert_eq!(result.error_count, 0);
    assert_eq!(result.successful_units, 1000);
    assert_eq!(run.store.commits, 1000);
    assert_eq!(result.to_string(), "1000\n1000\nnum errors = 0");
}

#[tokio::test]
async fn test_single_worker_loses_no_update() {
    let config = HarnessConfig::default().concurrency(1).total_units(1000);
    let result = run_store(&config).await.unwrap().result;

    assert_eq!(result.final_counter_value, 1000);
    assert_eq!(result.max_successful_value, Some(1000));
    assert_eq!(result.error_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_committed_values_are_linearizable() {
    let store = CounterStore::in_memory();
    store.reset_cell("counter", 0).await.unwrap();

    let num_tasks = 8;
    let per_task = 25;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for _ in 0..num_tasks {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut seen = Vec::with_capacity(per_task);
            for _ in 0..per_task {
                let mut conn = store.connect("counter");
                seen.push(increment(&mut conn).await.unwrap());
            }
            seen
        }));
    }

    let mut committed = HashSet::new();
    for handle in handles {
        for value in handle.await.unwrap() {
            assert!(committed.insert(value), "value {} committed twice", value);
        }
    }

    let total = (num_tasks * per_task) as i64;
    assert_eq!(committed, (1..=total).collect::<HashSet<_>>());
    assert_eq!(store.read_committed("counter").unwrap(), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_zero_timeout_contention_conserves_units() {
    let config = HarnessConfig::default()
        .busy_wait_timeout(Duration::ZERO)
        .total_units(300);
    let run = run_store(&config).await.unwrap();
    let result = run.result;

    assert_eq!(result.successful_units + result.error_count, 300);
    assert_eq!(result.final_counter_value, result.successful_units as i64);
    assert_eq!(result.error_count, result.exhausted_units + result.fatal_units);
    assert_eq!(result.fatal_units, 0);
    if result.successful_units > 0 {
        assert_eq!(result.max_successful_value, Some(result.final_counter_value));
    } else {
        assert_eq!(result.max_successful_value, None);
    }
    assert_eq!(run.store.commits, result.successful_units);
}

#[tokio::test]
async fn test_reseeding_is_idempotent() {
    let store = CounterStore::in_memory();
    store.reset_cell("counter", 0).await.unwrap();
    store.reset_cell("counter", 0).await.unwrap();
    assert_eq!(store.read_committed("counter").unwrap(), 0);

    let mut conn = store.connect("counter");
    assert_eq!(increment(&mut conn).await.unwrap(), 1);

    store.reset_cell("counter", 0).await.unwrap();
    assert_eq!(store.read_committed("counter").unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_backed_run_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.log");

    let config = HarnessConfig::new(StorageLocation::File(path.clone()))
        .durability_mode(DurabilityMode::Full)
        .concurrency(4)
        .total_units(40);
    let result = run_store(&config).await.unwrap().result;
    assert_eq!(result.final_counter_value, 40);

    let reopened = CounterStore::open(StoreConfig::file(&path)).unwrap();
    assert_eq!(reopened.read_committed("counter").unwrap(), 40);

    // a second run reseeds before counting
    let again = run_store(&config).await.unwrap().result;
    assert_eq!(again.final_counter_value, 40);
}
