//! In-memory storage implementation.
//!
//! Each operation takes the store mutex for its whole read-modify-write, which
//! gives every account serializable semantics. Nothing is awaited while the
//! lock is held.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credits_core::{
    Account, AccountId, ApplyOutcome, EntryCursor, EntryId, LedgerEntry, NewEntry, PlanCode,
};

use crate::error::Result;
use crate::{confirmed_entry, not_found, prepare_write, LedgerStore};

/// Ledger state of one account.
#[derive(Debug)]
struct AccountRecord {
    account: Account,
    /// Entries in ascending sequence order.
    entries: Vec<LedgerEntry>,
    /// Position of each entry in `entries`.
    index: HashMap<EntryId, usize>,
    next_sequence: u64,
}

impl AccountRecord {
    fn new(account: Account) -> Self {
        Self {
            account,
            entries: Vec::new(),
            index: HashMap::new(),
            next_sequence: 1,
        }
    }

    fn start_position(&self, cursor: &EntryCursor) -> Option<usize> {
        match cursor {
            EntryCursor::Start => Some(0),
            EntryCursor::Entry(entry_id) => self.index.get(entry_id).copied(),
            EntryCursor::Timestamp(at) => {
                Some(self.entries.partition_point(|e| e.created_at < *at))
            }
            EntryCursor::Sequence(sequence) => {
                Some(self.entries.partition_point(|e| e.sequence < *sequence))
            }
        }
    }
}

/// In-memory storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<AccountId, AccountRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountId, AccountRecord>> {
        // Every mutation below completes before it can panic, so a poisoned
        // map is still consistent.
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_account<F>(&self, account_id: &AccountId, f: F) -> Result<Account>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.lock();
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(account_id))?;
        f(&mut record.account);
        record.account.updated_at = Utc::now();
        Ok(record.account.clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<bool> {
        let mut accounts = self.lock();
        if accounts.contains_key(&account.account_id) {
            return Ok(false);
        }
        accounts.insert(
            account.account_id.clone(),
            AccountRecord::new(account.clone()),
        );
        Ok(true)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock().get(account_id).map(|r| r.account.clone()))
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
        })
    }

    async fn backfill_cycle_anchor(
        &self,
        account_id: &AccountId,
        anchor: DateTime<Utc>,
    ) -> Result<Account> {
        let mut accounts = self.lock();
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(account_id))?;
        if record.account.cycle_anchor.is_none() {
            record.account.cycle_anchor = Some(anchor);
            record.account.updated_at = Utc::now();
        }
        Ok(record.account.clone())
    }

    async fn overwrite_cached_balance(
        &self,
        account_id: &AccountId,
        balance: i64,
    ) -> Result<Account> {
        self.update_account(account_id, |account| account.cached_balance = balance)
    }

    async fn set_disabled(&self, account_id: &AccountId, disabled: bool) -> Result<Account> {
        self.update_account(account_id, |account| account.disabled = disabled)
    }

    async fn apply_entry(&self, account_id: &AccountId, entry: &NewEntry) -> Result<ApplyOutcome> {
        let mut accounts = self.lock();
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(account_id))?;

        if record.index.contains_key(&entry.entry_id) {
            return Ok(ApplyOutcome::AlreadyExists);
        }

        let balance = prepare_write(&record.account, entry)?;
        let now = Utc::now();
        let stored = confirmed_entry(account_id, entry, record.next_sequence, now)?;

        record.next_sequence += 1;
        record.index.insert(entry.entry_id.clone(), record.entries.len());
        record.entries.push(stored);
        record.account.cached_balance = balance;
        record.account.updated_at = now;

        Ok(ApplyOutcome::Written { balance })
    }

    async fn get_entry(
        &self,
        account_id: &AccountId,
        entry_id: &EntryId,
    ) -> Result<Option<LedgerEntry>> {
        let accounts = self.lock();
        Ok(accounts.get(account_id).and_then(|record| {
            record
                .index
                .get(entry_id)
                .map(|&pos| record.entries[pos].clone())
        }))
    }

    async fn list_entries_since(
        &self,
        account_id: &AccountId,
        cursor: &EntryCursor,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let accounts = self.lock();
        let Some(record) = accounts.get(account_id) else {
            return Ok(Vec::new());
        };
        let Some(start) = record.start_position(cursor) else {
            return Ok(Vec::new());
        };
        Ok(record.entries[start..]
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_recent_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let accounts = self.lock();
        Ok(accounts
            .get(account_id)
            .map(|record| record.entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_entry_with_prefix(
        &self,
        account_id: &AccountId,
        prefix: &str,
    ) -> Result<Option<LedgerEntry>> {
        let accounts = self.lock();
        Ok(accounts.get(account_id).and_then(|record| {
            record
                .entries
                .iter()
                .rev()
                .find(|e| e.entry_id.as_str().starts_with(prefix))
                .cloned()
        }))
    }

    async fn clear_all_entries(&self, account_id: &AccountId) -> Result<u64> {
        let mut accounts = self.lock();
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(account_id))?;

        let deleted = record.entries.len() as u64;
        record.entries.clear();
        record.index.clear();
        record.account.cached_balance = 0;
        record.account.updated_at = Utc::now();

        tracing::debug!(account_id = %account_id, deleted, "Cleared in-memory ledger");

        Ok(deleted)
    }
}
