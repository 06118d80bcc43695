//! Durable store behavior across process lifetimes and under contention

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use relay_core::prelude::*;
use relay_core::{CheckReport, CriterionStatus, FileBackend, LedgerBackend, StoreConfig};
use relay_test_utils::{active_task, criterion, done, done_item, task, ScriptedCheck, Step};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    }
}

#[tokio::test]
async fn ledger_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let t1 = task("T1");

    {
        let store = LedgerStore::open(&config(&dir)).await.unwrap();
        store.get_or_create(&t1).await.unwrap();
        store.add_criterion(&t1, criterion("tests")).await.unwrap();
        store.update_state(&t1, LedgerState::Active).await.unwrap();
        store.append_contribution(&t1, done("parser")).await.unwrap();
        store.add_open_question(&t1, "which schema?").await.unwrap();
    }

    let reopened = LedgerStore::open(&config(&dir)).await.unwrap();
    let ledger = reopened.read(&t1).await.unwrap();
    assert_eq!(ledger.state, LedgerState::Active);
    assert_eq!(ledger.contributions.len(), 1);
    assert_eq!(ledger.contributions[0].worker_name, "parser");
    assert_eq!(ledger.open_questions, vec!["which schema?".to_string()]);
    assert_eq!(reopened.list().await.unwrap(), vec![t1.clone()]);

    // the chain continues across restarts
    let next = reopened.append_contribution(&t1, done("emitter")).await.unwrap();
    assert_eq!(next.sequence, 1);
    assert_eq!(next.prev_hash, ledger.contributions[0].hash);
}

#[tokio::test]
async fn verification_results_are_durable() {
    let dir = TempDir::new().unwrap();
    let check = Arc::new(ScriptedCheck::new());
    check.set("tests", Step::Report(CheckReport::met()));

    let t1 = {
        let store = LedgerStore::open(&config(&dir)).await.unwrap();
        let t1 = active_task(&store, "T1", vec![criterion("tests")]).await;
        Verifier::with_check(check.clone())
            .verify(&store, &t1)
            .await
            .unwrap();
        t1
    };

    let store = LedgerStore::open(&config(&dir)).await.unwrap();
    let ledger = store.read(&t1).await.unwrap();
    let tests = ledger.criterion("tests").unwrap();
    assert_eq!(tests.status, CriterionStatus::Met);
    assert!(tests.last_checked.is_some());

    store.update_state(&t1, LedgerState::Complete).await.unwrap();
    let reopened = LedgerStore::open(&config(&dir)).await.unwrap();
    assert!(matches!(
        reopened.append_contribution(&t1, done("late")).await,
        Err(LedgerError::TerminalState { .. })
    ));
}

#[tokio::test]
async fn odd_task_ids_map_to_safe_files() {
    let dir = TempDir::new().unwrap();
    let backend = FileBackend::open(dir.path()).await.unwrap();
    let store = LedgerStore::new(backend.clone());

    let ids = ["../escape", "has space/and slash", "ünïcode"];
    for raw in ids {
        store.get_or_create(&task(raw)).await.unwrap();
    }

    for raw in ids {
        let path = backend.path_for(&task(raw));
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.exists());
    }
    assert_eq!(backend.list().await.unwrap().len(), ids.len());
}

#[tokio::test]
async fn tasks_do_not_contend() {
    let store = Arc::new(LedgerStore::in_memory().with_lock_timeout(Duration::from_millis(500)));
    let check = Arc::new(ScriptedCheck::new());
    check.set("slow", Step::Hang);

    let t1 = active_task(&store, "T1", vec![criterion("slow")]).await;
    let t2 = task("T2");
    store.get_or_create(&t2).await.unwrap();

    // a long verification of T1 holds no lock while its check runs
    let verifying = {
        let store = store.clone();
        let t1 = t1.clone();
        let verifier = Verifier::with_check(check.clone()).with_timeout(Duration::from_secs(2));
        tokio::spawn(async move { verifier.verify(&store, &t1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.append_contribution(&t2, done("other")).await.unwrap();
    store.append_contribution(&t1, done("same-task")).await.unwrap();
    assert_eq!(store.read(&t1).await.unwrap().contributions.len(), 1);

    verifying.abort();
}

#[tokio::test]
async fn many_writers_one_order() {
    let store = Arc::new(LedgerStore::in_memory());
    let t1 = task("T1");
    store.get_or_create(&t1).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let t1 = t1.clone();
            tokio::spawn(async move {
                store
                    .append_contribution(&t1, done_item(&format!("w{i}"), &format!("item-{i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let a = store.read(&t1).await.unwrap();
    let b = store.read(&t1).await.unwrap();
    assert_eq!(a.contributions, b.contributions);

    let sequences: Vec<u64> = a.contributions.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, (0..16).collect::<Vec<u64>>());
    assert!(relay_core::integrity::verify_chain(&a.contributions).is_ok());
    assert_eq!(a.completed_items().len(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stores_sharing_a_directory_lose_no_commits() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(LedgerStore::open(&config(&dir)).await.unwrap());
    let second = Arc::new(LedgerStore::open(&config(&dir)).await.unwrap());
    let t1 = task("T1");
    first.get_or_create(&t1).await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            let t1 = t1.clone();
            tokio::spawn(async move {
                store
                    .append_contribution(&t1, done(&format!("w{i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let reopened = LedgerStore::open(&config(&dir)).await.unwrap();
    let ledger = reopened.read(&t1).await.unwrap();
    let sequences: Vec<u64> = ledger.contributions.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, (0..20).collect::<Vec<u64>>());
    assert!(relay_core::integrity::verify_chain(&ledger.contributions).is_ok());
    assert_eq!(second.read(&t1).await.unwrap(), ledger);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_at_least_zero_boundary(observed in -5.0f64..5.0) {
        let verdict = tokio_test::block_on(async {
            let store = LedgerStore::in_memory();
            let check = Arc::new(ScriptedCheck::new());
            check.set("count", Step::Report(CheckReport::observed(observed)));

            let c = Criterion::new("count", "count reached", "count")
                .with_threshold(0.0, Direction::AtLeast);
            let t = active_task(&store, "T1", vec![c]).await;
            Verifier::with_check(check).verify(&store, &t).await.unwrap();
            store.read(&t).await.unwrap().criterion("count").unwrap().status
        });

        let expected = if observed >= 0.0 { CriterionStatus::Met } else { CriterionStatus::Failed };
        prop_assert_eq!(verdict, expected);
    }
}
