use proptest::prelude::*;
use relay_core::{LedgerStore, WorkItem};
use relay_handoff::{next_eligible, plan_waves, HandoffError, StallCause};
use relay_test_utils::{done, done_item, task};

#[tokio::test]
async fn dependent_item_waits_for_its_dependency() {
    let store = LedgerStore::in_memory();
    let t = task("T1");
    store.get_or_create(&t).await.unwrap();
    store.declare_item(&t, WorkItem::new("A")).await.unwrap();
    store
        .declare_item(&t, WorkItem::new("B").depends_on("A"))
        .await
        .unwrap();

    let ledger = store.read(&t).await.unwrap();
    assert_eq!(next_eligible(&ledger).unwrap(), vec!["A".to_string()]);

    store.append_contribution(&t, done_item("worker-1", "A")).await.unwrap();
    let ledger = store.read(&t).await.unwrap();
    assert_eq!(next_eligible(&ledger).unwrap(), vec!["B".to_string()]);

    store.append_contribution(&t, done_item("worker-2", "B")).await.unwrap();
    let ledger = store.read(&t).await.unwrap();
    assert!(next_eligible(&ledger).unwrap().is_empty());
}

#[tokio::test]
async fn ties_break_by_declaration_order() {
    let store = LedgerStore::in_memory();
    let t = task("T1");
    store.get_or_create(&t).await.unwrap();
    for id in ["zeta", "alpha", "mid"] {
        store.declare_item(&t, WorkItem::new(id)).await.unwrap();
    }

    let ledger = store.read(&t).await.unwrap();
    assert_eq!(next_eligible(&ledger).unwrap(), vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn missing_dependency_is_unresolved() {
    let store = LedgerStore::in_memory();
    let t = task("T1");
    store.get_or_create(&t).await.unwrap();
    store
        .declare_item(&t, WorkItem::new("deploy").depends_on("build"))
        .await
        .unwrap();

    let ledger = store.read(&t).await.unwrap();
    let err = next_eligible(&ledger).unwrap_err();
    assert_eq!(
        err,
        HandoffError::Stalled {
            chain: vec!["deploy".into(), "build".into()],
            cause: StallCause::UnresolvedDependency,
        }
    );

    // a worker named after the dependency resolves it
    store.append_contribution(&t, done("build")).await.unwrap();
    let ledger = store.read(&t).await.unwrap();
    assert_eq!(next_eligible(&ledger).unwrap(), vec!["deploy".to_string()]);
}

#[tokio::test]
async fn plan_reports_a_stall_behind_ready_work() {
    let store = LedgerStore::in_memory();
    let t = task("T1");
    store.get_or_create(&t).await.unwrap();
    store.declare_item(&t, WorkItem::new("a")).await.unwrap();
    store
        .declare_item(&t, WorkItem::new("b").depends_on("a").depends_on("c"))
        .await
        .unwrap();
    store
        .declare_item(&t, WorkItem::new("c").depends_on("b"))
        .await
        .unwrap();

    let ledger = store.read(&t).await.unwrap();
    // "a" can still start
    assert_eq!(next_eligible(&ledger).unwrap(), vec!["a".to_string()]);

    let err = plan_waves(&ledger).unwrap_err();
    assert_eq!(err.cause(), StallCause::Cycle);
    assert_eq!(err.chain(), ["b", "c", "b"]);
}

#[tokio::test]
async fn plan_covers_every_pending_item() {
    let store = LedgerStore::in_memory();
    let t = task("T1");
    store.get_or_create(&t).await.unwrap();
    store.declare_item(&t, WorkItem::new("schema")).await.unwrap();
    store
        .declare_item(&t, WorkItem::new("api").depends_on("schema"))
        .await
        .unwrap();
    store
        .declare_item(&t, WorkItem::new("ui").depends_on("schema"))
        .await
        .unwrap();
    store
        .declare_item(&t, WorkItem::new("release").depends_on("api").depends_on("ui"))
        .await
        .unwrap();
    store.append_contribution(&t, done_item("w", "schema")).await.unwrap();

    let ledger = store.read(&t).await.unwrap();
    let waves = plan_waves(&ledger).unwrap();
    assert_eq!(
        waves,
        vec![
            vec!["api".to_string(), "ui".to_string()],
            vec!["release".to_string()],
        ]
    );
    assert_eq!(waves[0], next_eligible(&ledger).unwrap());
}

/// Items `0..n` where each item may depend on any earlier one
fn acyclic_items() -> impl Strategy<Value = Vec<WorkItem>> {
    (1usize..8).prop_flat_map(|n| {
        let picks = prop::collection::vec(any::<prop::sample::Index>(), 0..3);
        prop::collection::vec(picks, n).prop_map(|deps| {
            deps.into_iter()
                .enumerate()
                .map(|(i, picks)| {
                    let mut item = WorkItem::new(format!("i{i}"));
                    if i > 0 {
                        for pick in picks {
                            item = item.depends_on(format!("i{}", pick.index(i)));
                        }
                    }
                    item
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn prop_acyclic_plans_never_stall(items in acyclic_items()) {
        let mut ledger = relay_core::Ledger::new(task("T1"));
        ledger.work_items = items.clone();

        let waves = plan_waves(&ledger).unwrap();
        let planned: usize = waves.iter().map(Vec::len).sum();
        prop_assert_eq!(planned, items.len());

        // every dependency lands in an earlier wave
        let wave_of = |id: &str| waves.iter().position(|w| w.iter().any(|x| x == id));
        for item in &items {
            for dep in &item.depends_on {
                prop_assert!(wave_of(dep.as_str()) < wave_of(item.item_id.as_str()));
            }
        }
    }
}
