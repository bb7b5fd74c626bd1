//! Admin endpoint integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use credits_core::AccountId;
use credits_store::LedgerStore;
use serde_json::{json, Value};

async fn funded(harness: &TestHarness, account: &str, amount: i64) {
    harness
        .service_post(&format!("/v1/accounts/{account}/init"), &json!({}))
        .await
        .assert_status_ok();
    harness
        .service_post(
            &format!("/v1/accounts/{account}/grant"),
            &json!({ "entry_id": "G1", "amount": amount, "reason": "signup" }),
        )
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn reconcile_repairs_drifted_cache() {
    let harness = TestHarness::new();
    funded(&harness, "user_1", 500).await;
    harness
        .service_post(
            "/v1/accounts/user_1/debit",
            &json!({ "entry_id": "D1", "amount": 120, "reason": "usage" }),
        )
        .await
        .assert_status_ok();

    let account_id = AccountId::new("user_1").unwrap();
    harness
        .store
        .overwrite_cached_balance(&account_id, 99_999)
        .await
        .unwrap();

    let response = harness
        .admin_post("/v1/admin/accounts/user_1/reconcile", &json!({}))
        .await;
    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["cached_balance"], 99_999);
    assert_eq!(report["calculated_balance"], 380);
    assert_eq!(report["repaired"], true);

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["balance"], 380);

    let report: Value = harness
        .admin_post("/v1/admin/accounts/user_1/reconcile", &json!({}))
        .await
        .json();
    assert_eq!(report["repaired"], false);
}

#[tokio::test]
async fn clear_requires_confirm_flag() {
    let harness = TestHarness::new();
    funded(&harness, "user_1", 500).await;

    let response = harness
        .admin_post("/v1/admin/accounts/user_1/clear", &json!({}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: Value = harness
        .admin_post("/v1/admin/accounts/user_1/clear", &json!({ "confirm": true }))
        .await
        .json();
    assert_eq!(body["deleted_entries"], 1);

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["balance"], 0);
}

#[tokio::test]
async fn switch_plan_grants_new_plan_credits() {
    let harness = TestHarness::new();
    funded(&harness, "user_1", 500).await;

    let response = harness
        .admin_post(
            "/v1/admin/accounts/user_1/plan",
            &json!({ "plan_code": "standard" }),
        )
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["plan_code"], "standard");
    assert_eq!(body["balance"], 2500);

    harness
        .admin_post(
            "/v1/admin/accounts/user_1/plan",
            &json!({ "plan_code": "enterprise" }),
        )
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["plan_code"], "standard");
    assert_eq!(body["balance"], 2500);
}

#[tokio::test]
async fn migration_grant_applies_once() {
    let harness = TestHarness::new();

    let body: Value = harness
        .admin_post(
            "/v1/admin/accounts/legacy/migration-grant",
            &json!({ "amount": 700 }),
        )
        .await
        .json();
    assert_eq!(body["status"], "written");
    assert_eq!(body["entry_id"], "MIGRATION_GRANT_legacy");
    assert_eq!(body["balance"], 700);

    let body: Value = harness
        .admin_post(
            "/v1/admin/accounts/legacy/migration-grant",
            &json!({ "amount": 700 }),
        )
        .await
        .json();
    assert_eq!(body["status"], "already_exists");
    assert_eq!(body["balance"], 700);
}

#[tokio::test]
async fn admin_debit_may_overdraw() {
    let harness = TestHarness::new();
    funded(&harness, "user_1", 100).await;

    let body: Value = harness
        .admin_post(
            "/v1/admin/accounts/user_1/debit",
            &json!({ "entry_id": "FIX1", "amount": 250, "reason": "chargeback" }),
        )
        .await
        .json();
    assert_eq!(body["balance"], -150);
}

#[tokio::test]
async fn disabled_accounts_reject_writes() {
    let harness = TestHarness::new();
    funded(&harness, "user_1", 100).await;

    let body: Value = harness
        .admin_post(
            "/v1/admin/accounts/user_1/disable",
            &json!({ "disabled": true }),
        )
        .await
        .json();
    assert_eq!(body["disabled"], true);

    let response = harness
        .service_post(
            "/v1/accounts/user_1/debit",
            &json!({ "entry_id": "D1", "amount": 10, "reason": "usage" }),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "account_disabled");

    harness
        .admin_post(
            "/v1/admin/accounts/user_1/disable",
            &json!({ "disabled": false }),
        )
        .await
        .assert_status_ok();
    harness
        .service_post(
            "/v1/accounts/user_1/debit",
            &json!({ "entry_id": "D1", "amount": 10, "reason": "usage" }),
        )
        .await
        .assert_status_ok();
}
