//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, health};
use crate::state::AppState;

/// Maximum concurrent requests for ledger endpoints.
const LEDGER_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for admin endpoints.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Ledger (`X-Api-Key`)
/// - `POST /v1/accounts/:id/init` - Create account if missing
/// - `GET /v1/accounts/:id/balance` - Balance (lazy init)
/// - `GET /v1/accounts/:id/entries` - Recent entries
/// - `POST /v1/accounts/:id/{debit,grant,refund}` - Ledger writes
/// - `POST /v1/accounts/:id/holds` - Place a hold
/// - `POST /v1/accounts/:id/holds/:entry_id/release` - Release a hold
/// - `POST /v1/accounts/:id/rollover` - Apply the cycle grant if due
///
/// ## Admin (`X-Admin-Key`)
/// - `POST /v1/admin/accounts/:id/plan` - Switch plan
/// - `POST /v1/admin/accounts/:id/reconcile` - Reconcile balance
/// - `POST /v1/admin/accounts/:id/clear` - Clear ledger
/// - `POST /v1/admin/accounts/:id/migration-grant` - One-time migration grant
/// - `POST /v1/admin/accounts/:id/debit` - Debit allowing overdraft
/// - `POST /v1/admin/accounts/:id/disable` - Soft-disable flag
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let ledger_routes = Router::new()
        .route("/:id/init", post(accounts::init_account))
        .route("/:id/balance", get(accounts::get_balance))
        .route("/:id/entries", get(accounts::list_entries))
        .route("/:id/debit", post(accounts::debit))
        .route("/:id/grant", post(accounts::grant))
        .route("/:id/holds", post(accounts::hold))
        .route(
            "/:id/holds/:entry_id/release",
            post(accounts::release_hold),
        )
        .route("/:id/refund", post(accounts::refund))
        .route("/:id/rollover", post(accounts::rollover))
        .layer(ConcurrencyLimitLayer::new(LEDGER_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/:id/plan", post(admin::switch_plan))
        .route("/:id/reconcile", post(admin::reconcile))
        .route("/:id/clear", post(admin::clear_entries))
        .route("/:id/migration-grant", post(admin::migration_grant))
        .route("/:id/debit", post(admin::admin_debit))
        .route("/:id/disable", post(admin::set_disabled))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .nest("/accounts", ledger_routes)
        .nest("/admin/accounts", admin_routes);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
