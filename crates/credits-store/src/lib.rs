//! Storage layer for the credits ledger.
//!
//! This crate provides durable, append-only storage of ledger entries plus one
//! mutable cached balance per account. It holds no business logic beyond the
//! atomic conditional write in [`LedgerStore::apply_entry`].
//!
//! # Backends
//!
//! - [`MemoryStore`]: mutex-guarded maps, for tests and single-process use.
//! - [`PgStore`]: PostgreSQL, row-level locks on the account row.
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` `TransactionDB`
//!   with column families for accounts, entries and the sequence index.
//!
//! # Example
//!
//! ```no_run
//! use credits_core::{Account, AccountId, EntryId, EntryType, NewEntry, PlanCode};
//! use credits_store::{LedgerStore, MemoryStore};
//!
//! # async fn example() -> credits_store::Result<()> {
//! let store = MemoryStore::new();
//! let account_id = AccountId::new("user_1").unwrap();
//! let account = Account::new(account_id.clone(), PlanCode::new("free").unwrap(), chrono::Utc::now());
//! store.create_account(&account).await?;
//!
//! let grant = NewEntry::new(EntryId::new("G1").unwrap(), EntryType::Grant, 4000, "signup");
//! store.apply_entry(&account_id, &grant).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credits_core::{
    Account, AccountId, ApplyOutcome, EntryCursor, EntryId, LedgerEntry, NewEntry, PlanCode,
};

/// The storage trait defining all ledger operations.
///
/// Every method touching a single account must be atomic with respect to
/// other calls on the same account. Calls on different accounts need no
/// coordination.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert an account if none exists under its id.
    ///
    /// Returns `true` if the account was created, `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_account(&self, account: &Account) -> Result<bool>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Get an account by ID, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn read_account(&self, account_id: &AccountId) -> Result<Account> {
        self.get_account(account_id)
            .await?
            .ok_or_else(|| not_found(account_id))
    }

    /// Change the account's plan and restart its cycle anchor.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn update_plan(
        &self,
        account_id: &AccountId,
        plan_code: &PlanCode,
        cycle_anchor: DateTime<Utc>,
    ) -> Result<Account>;

    /// Set the cycle anchor only if the account has none.
    ///
    /// Concurrent backfills converge on the first written value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn backfill_cycle_anchor(
        &self,
        account_id: &AccountId,
        anchor: DateTime<Utc>,
    ) -> Result<Account>;

    /// Overwrite the cached balance without writing a ledger entry.
    ///
    /// Reserved for reconciliation, which corrects the cache to match the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn overwrite_cached_balance(&self, account_id: &AccountId, balance: i64)
        -> Result<Account>;

    /// Soft-disable or re-enable an account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn set_disabled(&self, account_id: &AccountId, disabled: bool) -> Result<Account>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append an entry and adjust the cached balance in one transaction.
    ///
    /// If an entry with the same id exists for the account, nothing is
    /// written and `ApplyOutcome::AlreadyExists` is returned.
    ///
    /// # Errors
    ///
    /// - `StoreError::InvalidAmount` if `entry.amount <= 0`.
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::AccountDisabled` if the account is soft-disabled.
    /// - `StoreError::InsufficientBalance` if a debit or hold would overdraw
    ///   and `entry.allow_negative` is unset.
    /// - `StoreError::TransactionConflict` on transient contention.
    async fn apply_entry(&self, account_id: &AccountId, entry: &NewEntry) -> Result<ApplyOutcome>;

    /// Get an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_entry(
        &self,
        account_id: &AccountId,
        entry_id: &EntryId,
    ) -> Result<Option<LedgerEntry>>;

    /// List entries in ascending sequence order, starting at `cursor`
    /// (inclusive), at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_entries_since(
        &self,
        account_id: &AccountId,
        cursor: &EntryCursor,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// List the most recent entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_recent_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Find the newest entry whose id starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_entry_with_prefix(
        &self,
        account_id: &AccountId,
        prefix: &str,
    ) -> Result<Option<LedgerEntry>>;

    /// Delete every entry of the account and zero its cached balance.
    ///
    /// Returns the number of deleted entries. Destructive; administrative
    /// reset flows only.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn clear_all_entries(&self, account_id: &AccountId) -> Result<u64>;
}

/// Build the `NotFound` error for an account.
pub(crate) fn not_found(account_id: &AccountId) -> StoreError {
    StoreError::NotFound {
        account_id: account_id.to_string(),
    }
}

/// Check a write against the account it targets and compute the new balance.
///
/// Shared by every backend so they agree on the preconditions.
pub(crate) fn prepare_write(account: &Account, entry: &NewEntry) -> Result<i64> {
    entry.validate()?;
    if account.disabled {
        return Err(StoreError::AccountDisabled {
            account_id: account.account_id.to_string(),
        });
    }
    Ok(entry.balance_after(account.cached_balance)?)
}

/// Build the confirmed entry record for a write that passed [`prepare_write`].
pub(crate) fn confirmed_entry(
    account_id: &AccountId,
    entry: &NewEntry,
    sequence: u64,
    now: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let mut record = LedgerEntry::pending(account_id.clone(), entry, sequence, now);
    record.confirm()?;
    Ok(record)
}
