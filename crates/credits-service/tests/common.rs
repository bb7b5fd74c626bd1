//! Common test utilities for credits service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestResponse, TestServer};
use serde_json::Value;

use credits_core::{FixedClock, StaticPlanCatalog};
use credits_service::{create_router, AppState, CreditsService, ServiceConfig};
use credits_store::MemoryStore;

/// Service API key configured on the test server.
pub const SERVICE_API_KEY: &str = "test-service-key";

/// Admin API key configured on the test server.
pub const ADMIN_API_KEY: &str = "test-admin-key";

/// Start of the test clock.
pub const START: &str = "2026-10-18T12:00:00Z";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The engine behind the server, for direct calls.
    pub credits: CreditsService,
    /// The store behind the engine, for injecting drift.
    pub store: Arc<MemoryStore>,
    /// The clock driving cycle computation.
    pub clock: Arc<FixedClock>,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory ledger.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(START.parse().expect("valid start time")));
        let credits = CreditsService::with_clock(
            store.clone(),
            Arc::new(StaticPlanCatalog::default()),
            clock.clone(),
        );

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            ..ServiceConfig::default()
        };

        let state = AppState::new(credits.clone(), config);
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            credits,
            store,
            clock,
        }
    }

    /// The `X-Api-Key` header.
    pub fn service_key() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static(SERVICE_API_KEY),
        )
    }

    /// The `X-Admin-Key` header.
    pub fn admin_key() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-admin-key"),
            HeaderValue::from_static(ADMIN_API_KEY),
        )
    }

    /// GET with the service key.
    pub async fn service_get(&self, path: &str) -> TestResponse {
        let (name, value) = Self::service_key();
        self.server.get(path).add_header(name, value).await
    }

    /// POST with the service key.
    pub async fn service_post(&self, path: &str, body: &Value) -> TestResponse {
        let (name, value) = Self::service_key();
        self.server.post(path).add_header(name, value).json(body).await
    }

    /// POST with the admin key.
    pub async fn admin_post(&self, path: &str, body: &Value) -> TestResponse {
        let (name, value) = Self::admin_key();
        self.server.post(path).add_header(name, value).json(body).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
