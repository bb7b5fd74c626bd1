//! Balance reconciliation.
//!
//! The ledger is the source of truth. The reconciler recomputes an account's
//! balance from its confirmed entries since the summation boundary and, when
//! the cached balance disagrees, overwrites the cache.
//!
//! The repair write is not serialized against concurrent ledger writes. A
//! repair that races an `apply_entry` may store a stale value; the next
//! reconciliation corrects it.

use std::sync::Arc;

use serde::Serialize;

use credits_core::idempotency::CYCLE_RESET_PREFIX;
use credits_core::{
    Account, AccountId, Clock, CycleManager, EntryCursor, EntryId, IdempotencyGuard, LedgerEntry,
    PlanCatalog, Result,
};
use credits_store::LedgerStore;

/// Default number of entries fetched per page while summing.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// The reconciled account.
    pub account_id: AccountId,
    /// Balance derived from the ledger, floored at zero.
    pub calculated_balance: i64,
    /// Cached balance before any repair.
    pub cached_balance: i64,
    /// Sum of confirmed grants and refunds since the boundary.
    pub total_grants: i64,
    /// Sum of confirmed debits and holds since the boundary.
    pub total_debits: i64,
    /// Number of confirmed entries summed.
    pub entry_count: u64,
    /// The reset entry the sum starts at, or `None` for an all-time sum.
    pub boundary_entry_id: Option<EntryId>,
    /// Whether the cached balance was overwritten.
    pub repaired: bool,
}

impl ReconcileReport {
    /// Whether the cache disagrees with the ledger.
    #[must_use]
    pub const fn has_drift(&self) -> bool {
        self.calculated_balance != self.cached_balance
    }
}

#[derive(Debug, Default)]
struct Totals {
    grants: i64,
    debits: i64,
    count: u64,
}

impl Totals {
    fn add(&mut self, entry: &LedgerEntry) {
        if !entry.is_confirmed() {
            return;
        }
        if entry.entry_type.is_credit() {
            self.grants = self.grants.saturating_add(entry.amount);
        } else {
            self.debits = self.debits.saturating_add(entry.amount);
        }
        self.count += 1;
    }

    fn balance(&self) -> i64 {
        self.grants.saturating_sub(self.debits).max(0)
    }
}

/// Recomputes balances from the ledger and repairs drifted caches.
#[derive(Clone)]
pub struct BalanceReconciler {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn PlanCatalog>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl BalanceReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the scan page size. Zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reconcile the account, repairing the cached balance on drift.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts and storage
    /// errors otherwise.
    pub async fn reconcile(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        let mut report = self.inspect(account_id).await?;

        if report.has_drift() {
            self.store
                .overwrite_cached_balance(account_id, report.calculated_balance)
                .await?;
            report.repaired = true;

            tracing::warn!(
                account_id = %account_id,
                cached_balance = report.cached_balance,
                calculated_balance = report.calculated_balance,
                "Balance drift repaired"
            );
        } else {
            tracing::debug!(
                account_id = %account_id,
                balance = report.cached_balance,
                "Balance consistent with ledger"
            );
        }

        Ok(report)
    }

    /// Compute the reconciliation report without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts and storage
    /// errors otherwise.
    pub async fn inspect(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        let account = self.store.read_account(account_id).await?;
        let boundary = self.boundary(&account).await?;

        let mut totals = Totals::default();
        let mut cursor = boundary
            .as_ref()
            .map_or(EntryCursor::Start, |entry| EntryCursor::Sequence(entry.sequence));

        loop {
            let page = self
                .store
                .list_entries_since(account_id, &cursor, self.page_size)
                .await?;
            for entry in &page {
                totals.add(entry);
            }
            match page.last() {
                Some(last) if page.len() == self.page_size => {
                    cursor = EntryCursor::Sequence(last.sequence + 1);
                }
                _ => break,
            }
        }

        Ok(ReconcileReport {
            account_id: account.account_id,
            calculated_balance: totals.balance(),
            cached_balance: account.cached_balance,
            total_grants: totals.grants,
            total_debits: totals.debits,
            entry_count: totals.count,
            boundary_entry_id: boundary.map(|entry| entry.entry_id),
            repaired: false,
        })
    }

    /// Find the reset entry the summation starts at.
    ///
    /// Plans without a cycle sum all time. Otherwise the current cycle's
    /// reset grant is preferred, then the latest reset of any cycle. Only
    /// confirmed rollover grants qualify. Unknown plans are treated as
    /// cycle-bound.
    async fn boundary(&self, account: &Account) -> Result<Option<LedgerEntry>> {
        let plan = self.catalog.plan(&account.plan_code);
        if plan.as_ref().is_some_and(|plan| !plan.is_cycle_bound()) {
            return Ok(None);
        }

        if let Some(plan) = &plan {
            let cycle_key = CycleManager::current_cycle_key(plan, account, self.clock.now());
            let reset_id = IdempotencyGuard::cycle_reset_entry_id(&cycle_key);
            if let Some(entry) = self.store.get_entry(&account.account_id, &reset_id).await? {
                if IdempotencyGuard::is_cycle_reset_grant(&entry) {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(self
            .store
            .latest_entry_with_prefix(&account.account_id, CYCLE_RESET_PREFIX)
            .await?
            .filter(IdempotencyGuard::is_cycle_reset_grant))
    }
}
