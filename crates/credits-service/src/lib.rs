//! Credits engine and HTTP API.
//!
//! This crate provides:
//!
//! - [`CreditsService`]: account initialization, idempotent ledger writes,
//!   cycle rollover, plan switching and administration
//! - [`BalanceReconciler`]: recomputes balances from the ledger and repairs
//!   drifted caches
//! - An axum router exposing both over JSON
//!
//! # Authentication
//!
//! 1. **Service API key** (`X-Api-Key`) for ledger endpoints
//! 2. **Admin API key** (`X-Admin-Key`) for administrative endpoints
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credits_core::{AccountId, EntryId, Metadata, StaticPlanCatalog};
//! use credits_service::CreditsService;
//! use credits_store::MemoryStore;
//!
//! # async fn example() -> credits_core::Result<()> {
//! let credits = CreditsService::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticPlanCatalog::default()),
//! );
//! let account_id = AccountId::new("user_1")?;
//! credits.ensure_account_init(&account_id).await?;
//! credits
//!     .grant(&account_id, EntryId::new("G1")?, 4000, "signup", Metadata::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler is async for axum

pub mod auth;
pub mod config;
pub mod credits;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StorageBackend};
pub use credits::{
    ClearConfirmation, CreditsService, HoldRelease, RolloverOutcome, MAX_LIST_LIMIT,
};
pub use error::ApiError;
pub use reconcile::{BalanceReconciler, ReconcileReport};
pub use routes::create_router;
pub use state::AppState;
