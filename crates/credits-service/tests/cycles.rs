//! Cycle rollover and reconciliation tests against the engine.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::TestHarness;
use credits_core::idempotency::CYCLE_RESET_PREFIX;
use credits_core::{Account, AccountId, Clock, EntryCursor, EntryId, Metadata, PlanCode};
use credits_store::LedgerStore;
use serde_json::{json, Value};

fn account(id: &str) -> AccountId {
    AccountId::new(id).unwrap()
}

async fn on_plan(harness: &TestHarness, id: &AccountId, plan: &str) {
    harness.credits.ensure_account_init(id).await.unwrap();
    harness
        .credits
        .switch_plan(id, &PlanCode::new(plan).unwrap())
        .await
        .unwrap();
}

async fn reset_entries(harness: &TestHarness, id: &AccountId) -> usize {
    harness
        .store
        .list_entries_since(id, &EntryCursor::Start, 1000)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.entry_id.as_str().starts_with(CYCLE_RESET_PREFIX))
        .count()
}

#[tokio::test]
async fn new_month_resets_balance_to_plan_credits() {
    let harness = TestHarness::new();
    let id = account("user_1");
    on_plan(&harness, &id, "pro").await;

    harness
        .credits
        .debit(&id, EntryId::new("D1").unwrap(), 1000, "usage", Metadata::new())
        .await
        .unwrap();
    assert_eq!(
        harness.credits.get_balance(&id).await.unwrap().cached_balance,
        5000
    );

    harness.clock.advance(Duration::days(31));
    let outcome = harness.credits.ensure_cycle_rollover(&id).await.unwrap();
    assert_eq!(outcome.cycle_key.as_str(), "2026-11");
    assert!(outcome.applied);
    assert_eq!(
        harness.credits.get_balance(&id).await.unwrap().cached_balance,
        6000
    );

    let again = harness.credits.ensure_cycle_rollover(&id).await.unwrap();
    assert!(!again.applied);

    let report = harness.credits.reconcile(&id).await.unwrap();
    assert!(!report.repaired);
    assert_eq!(report.calculated_balance, 6000);
    assert_eq!(
        report.boundary_entry_id.as_ref().map(EntryId::as_str),
        Some("RESET_2026-11")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rollover_applies_once() {
    let harness = TestHarness::new();
    let id = account("user_1");
    on_plan(&harness, &id, "standard").await;
    harness.clock.advance(Duration::days(31));

    let credits = Arc::new(harness.credits.clone());
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let credits = Arc::clone(&credits);
            let id = id.clone();
            tokio::spawn(async move { credits.ensure_cycle_rollover(&id).await.unwrap() })
        })
        .collect();

    let applied = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|outcome| outcome.applied)
        .count();

    assert_eq!(applied, 1);
    assert_eq!(reset_entries(&harness, &id).await, 1);
    assert_eq!(
        harness.credits.get_balance(&id).await.unwrap().cached_balance,
        2500
    );
}

#[tokio::test]
async fn trial_grant_is_never_repeated() {
    let harness = TestHarness::new();
    let id = account("user_1");
    on_plan(&harness, &id, "trial").await;
    assert_eq!(
        harness.credits.get_balance(&id).await.unwrap().cached_balance,
        1000
    );

    for _ in 0..3 {
        let outcome = harness.credits.ensure_cycle_rollover(&id).await.unwrap();
        assert_eq!(outcome.cycle_key.as_str(), "trial-2026-10-18");
        assert!(!outcome.applied);
        harness.clock.advance(Duration::days(40));
    }

    assert_eq!(reset_entries(&harness, &id).await, 0);
}

#[tokio::test]
async fn rollover_backfills_missing_anchor() {
    let harness = TestHarness::new();
    let id = account("legacy");
    let mut legacy = Account::new(
        id.clone(),
        PlanCode::new("pro").unwrap(),
        harness.clock.now(),
    );
    legacy.cycle_anchor = None;
    harness.store.create_account(&legacy).await.unwrap();

    let outcome = harness.credits.ensure_cycle_rollover(&id).await.unwrap();
    assert!(outcome.applied);

    let stored = harness.store.read_account(&id).await.unwrap();
    assert_eq!(stored.cycle_anchor, Some(legacy.created_at));
    assert_eq!(stored.cached_balance, 6000);
}

#[tokio::test]
async fn free_plan_never_rolls_over() {
    let harness = TestHarness::new();
    let id = account("user_1");
    harness.credits.ensure_account_init(&id).await.unwrap();

    let outcome = harness.credits.ensure_cycle_rollover(&id).await.unwrap();
    assert_eq!(outcome.cycle_key.as_str(), "none");
    assert!(!outcome.applied);
}

#[tokio::test]
async fn rollover_endpoint_reports_cycle() {
    let harness = TestHarness::new();
    let id = account("user_1");
    on_plan(&harness, &id, "pro").await;
    harness.clock.advance(Duration::days(31));

    let response = harness
        .service_post("/v1/accounts/user_1/rollover", &json!({}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["cycle_key"], "2026-11");
    assert_eq!(body["applied"], true);

    let body: Value = harness
        .service_post("/v1/accounts/user_1/rollover", &json!({}))
        .await
        .json();
    assert_eq!(body["applied"], false);
}

#[tokio::test]
async fn reconcile_on_read_heals_before_returning() {
    let harness = TestHarness::new();
    let id = account("user_1");
    harness.credits.ensure_account_init(&id).await.unwrap();
    harness
        .credits
        .grant(&id, EntryId::new("G1").unwrap(), 300, "signup", Metadata::new())
        .await
        .unwrap();
    harness.store.overwrite_cached_balance(&id, -5).await.unwrap();

    let healing = harness.credits.clone().reconcile_on_read(true);
    assert_eq!(healing.get_balance(&id).await.unwrap().cached_balance, 300);
}
