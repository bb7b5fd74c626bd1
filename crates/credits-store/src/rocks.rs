//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `LedgerStore`
//! trait. Every write runs in a pessimistic transaction that first takes an
//! exclusive lock on the account key, so writers on one account are
//! serialized while other accounts proceed in parallel.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::{Deserialize, Serialize};

use credits_core::{
    Account, AccountId, ApplyOutcome, EntryCursor, EntryId, LedgerEntry, NewEntry, PlanCode,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{confirmed_entry, not_found, prepare_write, LedgerStore};

/// Default time a writer waits for an account lock before giving up with
/// `TransactionConflict`.
pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 2_000;

type Db = TransactionDB<MultiThreaded>;

/// Stored form of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    account: Account,
    next_sequence: u64,
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT_MS)
    }

    /// Open with a custom lock wait, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with_lock_timeout<P: AsRef<Path>>(path: P, lock_timeout_ms: i64) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(db_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read the account record under an exclusive lock held until the
    /// transaction ends.
    fn lock_account(
        &self,
        txn: &Transaction<'_, Db>,
        account_id: &AccountId,
    ) -> Result<AccountRecord> {
        let cf = self.cf(cf::ACCOUNTS)?;
        txn.get_for_update_cf(&cf, keys::account_key(account_id), true)
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()?
            .ok_or_else(|| not_found(account_id))
    }

    fn put_account(&self, txn: &Transaction<'_, Db>, record: &AccountRecord) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        txn.put_cf(
            &cf,
            keys::account_key(&record.account.account_id),
            Self::serialize(record)?,
        )
        .map_err(db_error)
    }

    /// Apply `f` to the locked account and persist the result.
    fn update_account<F>(&self, account_id: &AccountId, f: F) -> Result<Account>
    where
        F: FnOnce(&mut Account) -> bool,
    {
        let txn = self.db.transaction();
        let mut record = self.lock_account(&txn, account_id)?;
        if f(&mut record.account) {
            record.account.updated_at = Utc::now();
            self.put_account(&txn, &record)?;
        }
        txn.commit().map_err(db_error)?;
        Ok(record.account)
    }

    fn read_entry(&self, account_id: &AccountId, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::ENTRIES)?;
        self.db
            .get_cf(&cf, keys::entry_key(account_id, entry_id))
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Resolve a cursor to the first sequence number to scan from.
    fn start_sequence(&self, account_id: &AccountId, cursor: &EntryCursor) -> Result<Option<u64>> {
        Ok(match cursor {
            EntryCursor::Start | EntryCursor::Timestamp(_) => Some(0),
            EntryCursor::Sequence(sequence) => Some(*sequence),
            EntryCursor::Entry(entry_id) => self
                .read_entry(account_id, entry_id)?
                .map(|entry| entry.sequence),
        })
    }

    /// Walk the sequence index from `from`, loading entries, until `visit`
    /// returns `false`.
    fn scan_ledger<F>(
        &self,
        account_id: &AccountId,
        from: &[u8],
        direction: Direction,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(LedgerEntry) -> bool,
    {
        let cf_seq = self.cf(cf::ENTRIES_BY_SEQUENCE)?;
        let prefix = keys::account_prefix(account_id);

        for item in self
            .db
            .iterator_cf(&cf_seq, IteratorMode::From(from, direction))
        {
            let (key, value) = item.map_err(db_error)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry_id = String::from_utf8(value.into_vec())
                .ok()
                .and_then(|s| EntryId::try_from(s).ok())
                .ok_or_else(|| StoreError::Serialization("corrupt sequence index".into()))?;
            let Some(entry) = self.read_entry(account_id, &entry_id)? else {
                tracing::warn!(account_id = %account_id, entry_id = %entry_id, "Dangling sequence index");
                continue;
            };
            if !visit(entry) {
                break;
            }
        }

        Ok(())
    }
}

/// Map a `RocksDB` error, classifying lock contention as retryable.
fn db_error(err: rocksdb::Error) -> StoreError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StoreError::TransactionConflict(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn create_account(&self, account: &Account) -> Result<bool> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.account_id);

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(&cf, &key, true)
            .map_err(db_error)?
            .is_some()
        {
            return Ok(false);
        }

        let record = AccountRecord {
            account: account.clone(),
            next_sequence: 1,
        };
        self.put_account(&txn, &record)?;
        txn.commit().map_err(db_error)?;

        Ok(true)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;

        Ok(self
            .db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(db_error)?
            .map(|data| Self::deserialize::<AccountRecord>(&data))
            .transpose()?
            .map(|record| record.account))
    }

    async fn update_plan(
        &self,
        account_id: &AccountId,
        plan_code: &PlanCode,
        cycle_anchor: DateTime<Utc>,
    ) -> Result<Account> {
        self.update_account(account_id, |account| {
            account.plan_code = plan_code.clone();
            account.cycle_anchor = Some(cycle_anchor);
            true
        })
    }

    async fn backfill_cycle_anchor(
        &self,
        account_id: &AccountId,
        anchor: DateTime<Utc>,
    ) -> Result<Account> {
        self.update_account(account_id, |account| {
            if account.cycle_anchor.is_some() {
                return false;
            }
            account.cycle_anchor = Some(anchor);
            true
        })
    }

    async fn overwrite_cached_balance(
        &self,
        account_id: &AccountId,
        balance: i64,
    ) -> Result<Account> {
        self.update_account(account_id, |account| {
            account.cached_balance = balance;
            true
        })
    }

    async fn set_disabled(&self, account_id: &AccountId, disabled: bool) -> Result<Account> {
        self.update_account(account_id, |account| {
            account.disabled = disabled;
            true
        })
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn apply_entry(&self, account_id: &AccountId, entry: &NewEntry) -> Result<ApplyOutcome> {
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_seq = self.cf(cf::ENTRIES_BY_SEQUENCE)?;

        let txn = self.db.transaction();
        let mut record = self.lock_account(&txn, account_id)?;

        let entry_key = keys::entry_key(account_id, &entry.entry_id);
        if txn
            .get_cf(&cf_entries, &entry_key)
            .map_err(db_error)?
            .is_some()
        {
            return Ok(ApplyOutcome::AlreadyExists);
        }

        let balance = prepare_write(&record.account, entry)?;
        let now = Utc::now();
        let sequence = record.next_sequence;
        let stored = confirmed_entry(account_id, entry, sequence, now)?;

        record.next_sequence += 1;
        record.account.cached_balance = balance;
        record.account.updated_at = now;

        txn.put_cf(&cf_entries, &entry_key, Self::serialize(&stored)?)
            .map_err(db_error)?;
        txn.put_cf(
            &cf_seq,
            keys::sequence_key(account_id, sequence),
            entry.entry_id.as_bytes(),
        )
        .map_err(db_error)?;
        self.put_account(&txn, &record)?;
        txn.commit().map_err(db_error)?;

        Ok(ApplyOutcome::Written { balance })
    }

    async fn get_entry(
        &self,
        account_id: &AccountId,
        entry_id: &EntryId,
    ) -> Result<Option<LedgerEntry>> {
        self.read_entry(account_id, entry_id)
    }

    async fn list_entries_since(
        &self,
        account_id: &AccountId,
        cursor: &EntryCursor,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let Some(start) = self.start_sequence(account_id, cursor)? else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let from = keys::sequence_key(account_id, start);
        let mut entries = Vec::new();
        self.scan_ledger(account_id, &from, Direction::Forward, |entry| {
            if let EntryCursor::Timestamp(at) = cursor {
                if entry.created_at < *at {
                    return true;
                }
            }
            entries.push(entry);
            entries.len() < limit
        })?;

        Ok(entries)
    }

    async fn list_recent_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let from = keys::sequence_key(account_id, u64::MAX);
        let mut entries = Vec::new();
        self.scan_ledger(account_id, &from, Direction::Reverse, |entry| {
            entries.push(entry);
            entries.len() < limit
        })?;

        Ok(entries)
    }

    async fn latest_entry_with_prefix(
        &self,
        account_id: &AccountId,
        prefix: &str,
    ) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(cf::ENTRIES)?;
        let key_prefix = keys::entry_prefix_key(account_id, prefix);

        let mut latest: Option<LedgerEntry> = None;
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&key_prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(db_error)?;
            if !key.starts_with(&key_prefix) {
                break;
            }
            let entry: LedgerEntry = Self::deserialize(&value)?;
            if latest.as_ref().map_or(true, |l| entry.sequence > l.sequence) {
                latest = Some(entry);
            }
        }

        Ok(latest)
    }

    async fn clear_all_entries(&self, account_id: &AccountId) -> Result<u64> {
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_seq = self.cf(cf::ENTRIES_BY_SEQUENCE)?;
        let prefix = keys::account_prefix(account_id);

        let txn = self.db.transaction();
        let mut record = self.lock_account(&txn, account_id)?;

        let mut deleted = 0u64;
        for (cf, counts) in [(&cf_entries, true), (&cf_seq, false)] {
            let stale: Vec<Box<[u8]>> = txn
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
                .map(|item| item.map(|(key, _)| key).map_err(db_error))
                .take_while(|item| item.as_ref().map_or(true, |key| key.starts_with(&prefix)))
                .collect::<Result<_>>()?;
            for key in &stale {
                txn.delete_cf(cf, key).map_err(db_error)?;
            }
            if counts {
                deleted = stale.len() as u64;
            }
        }

        record.account.cached_balance = 0;
        record.account.updated_at = Utc::now();
        self.put_account(&txn, &record)?;
        txn.commit().map_err(db_error)?;

        tracing::debug!(account_id = %account_id, deleted, "Cleared RocksDB ledger");

        Ok(deleted)
    }
}
