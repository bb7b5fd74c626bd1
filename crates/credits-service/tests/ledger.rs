//! Ledger endpoint integration tests.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use common::TestHarness;
use serde_json::{json, Value};

fn write(entry_id: &str, amount: i64) -> Value {
    json!({ "entry_id": entry_id, "amount": amount, "reason": "test" })
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn grant_debit_replay_and_overdraft() {
    let harness = TestHarness::new();

    let response = harness
        .service_post("/v1/accounts/user_1/init", &json!({}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 0);
    assert_eq!(body["plan_code"], "free");

    let body: Value = harness
        .service_post("/v1/accounts/user_1/grant", &write("G1", 4000))
        .await
        .json();
    assert_eq!(body["status"], "written");
    assert_eq!(body["balance"], 4000);

    let body: Value = harness
        .service_post("/v1/accounts/user_1/debit", &write("D1", 150))
        .await
        .json();
    assert_eq!(body["status"], "written");
    assert_eq!(body["balance"], 3850);

    let response = harness
        .service_post("/v1/accounts/user_1/debit", &write("D1", 150))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "already_exists");
    assert_eq!(body["balance"], 3850);

    let response = harness
        .service_post("/v1/accounts/user_1/debit", &write("D2", 5000))
        .await;
    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_balance");
    assert_eq!(body["error"]["details"]["balance"], 3850);
    assert_eq!(body["error"]["details"]["required"], 5000);

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["balance"], 3850);

    let body: Value = harness
        .service_get("/v1/accounts/user_1/entries?limit=10")
        .await
        .json();
    let ids: Vec<_> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["entry_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["D1", "G1"]);
}

#[tokio::test]
async fn balance_initializes_unknown_account() {
    let harness = TestHarness::new();

    let response = harness.service_get("/v1/accounts/fresh/balance").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["account_id"], "fresh");
    assert_eq!(body["balance"], 0);
}

#[tokio::test]
async fn writes_to_unknown_account_are_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .service_post("/v1/accounts/ghost/grant", &write("G1", 10))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn invalid_input_is_bad_request() {
    let harness = TestHarness::new();
    harness
        .service_post("/v1/accounts/user_1/init", &json!({}))
        .await
        .assert_status_ok();

    harness
        .service_post("/v1/accounts/user_1/grant", &write("G0", 0))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness
        .service_post("/v1/accounts/user_1/grant", &write("", 10))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn system_entry_ids_are_rejected() {
    let harness = TestHarness::new();
    harness
        .service_post("/v1/accounts/user_1/init", &json!({}))
        .await
        .assert_status_ok();
    harness
        .service_post("/v1/accounts/user_1/grant", &write("G1", 100))
        .await
        .assert_status_ok();

    for (action, entry_id) in [
        ("debit", "RESET_2026-11"),
        ("grant", "MIGRATION_GRANT_user_1"),
        ("holds", "PLAN_SWITCH_pro_01J"),
        ("refund", "RELEASE_H1"),
    ] {
        let response = harness
            .service_post(
                &format!("/v1/accounts/user_1/{action}"),
                &write(entry_id, 1),
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["balance"], 100);
}

// ============================================================================
// Holds
// ============================================================================

#[tokio::test]
async fn hold_then_release_refunds_unused_part() {
    let harness = TestHarness::new();
    harness
        .service_post("/v1/accounts/user_1/init", &json!({}))
        .await
        .assert_status_ok();
    harness
        .service_post("/v1/accounts/user_1/grant", &write("G1", 1000))
        .await
        .assert_status_ok();

    let body: Value = harness
        .service_post("/v1/accounts/user_1/holds", &write("H1", 400))
        .await
        .json();
    assert_eq!(body["balance"], 600);

    let response = harness
        .service_post(
            "/v1/accounts/user_1/holds/H1/release",
            &json!({ "consumed": 250 }),
        )
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["released"], 150);
    assert_eq!(body["written"], true);

    let body: Value = harness.service_get("/v1/accounts/user_1/balance").await.json();
    assert_eq!(body["balance"], 750);

    harness
        .service_post(
            "/v1/accounts/user_1/holds/G1/release",
            &json!({ "consumed": 0 }),
        )
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn ledger_endpoints_require_service_key() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/accounts/user_1/balance").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");

    harness
        .server
        .get("/v1/accounts/user_1/balance")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("wrong-key"),
        )
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_endpoints_reject_service_key() {
    let harness = TestHarness::new();
    let (name, value) = TestHarness::service_key();

    harness
        .server
        .post("/v1/admin/accounts/user_1/reconcile")
        .add_header(name, value)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "credits");
}
