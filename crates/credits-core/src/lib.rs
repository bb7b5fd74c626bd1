//! Core types and rules for the credits ledger.
//!
//! This crate provides the foundational types shared by the store, the service
//! and the client:
//!
//! - **Identifiers**: `AccountId`, `EntryId`, `PlanCode`
//! - **Accounts**: `Account`, `BalanceSnapshot`
//! - **Ledger**: `LedgerEntry`, `EntryType`, `EntryStatus`, `NewEntry`, `ApplyOutcome`
//! - **Plans**: `Plan`, `CycleKind`, `PlanCatalog`, `StaticPlanCatalog`
//! - **Rules**: `CycleManager`, `IdempotencyGuard`
//! - **Time**: `Clock`, `SystemClock`, `FixedClock`
//!
//! # Balance Invariant
//!
//! An account's `cached_balance` equals the sum of its `CONFIRMED` grants and
//! refunds minus its `CONFIRMED` debits and holds, counted from the last
//! cycle-reset entry (cycle-bound plans) or over all time (plans without a
//! cycle). Amounts are integer credits stored as `i64`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod clock;
pub mod cycle;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod plan;

pub use account::{Account, BalanceSnapshot};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cycle::{CycleKey, CycleManager, NO_CYCLE_KEY};
pub use entry::{
    ApplyOutcome, BalanceEffect, EntryCursor, EntryStatus, EntryType, LedgerEntry, Metadata,
    NewEntry,
};
pub use error::{LedgerError, Result};
pub use idempotency::IdempotencyGuard;
pub use ids::{AccountId, EntryId, IdError, PlanCode};
pub use plan::{
    CycleKind, Plan, PlanCatalog, StaticPlanCatalog, DEFAULT_PLAN_CODE, PRO_PLAN_CREDITS,
    STANDARD_PLAN_CREDITS, TRIAL_PLAN_CREDITS,
};
