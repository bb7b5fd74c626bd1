//! The credits engine.
//!
//! [`CreditsService`] is the entry point for callers: account initialization,
//! ledger writes, cycle rollover, plan switching and reconciliation. It
//! decides *what* to write; the store decides atomically *whether* the write
//! happens. Nothing here retries: a `TransactionConflict` goes back to the
//! caller, who retries with the same entry id.
//!
//! Caller-supplied entry ids may not use the system prefixes of
//! [`credits_core::idempotency`]; such writes fail with `InvalidId`.

use std::sync::Arc;

use serde::Serialize;
use ulid::Ulid;

use credits_core::idempotency::{CYCLE_RESET_REASON, PLAN_SWITCH_PREFIX};
use credits_core::{
    Account, AccountId, ApplyOutcome, BalanceSnapshot, Clock, CycleKey, CycleManager, EntryId,
    EntryType, IdempotencyGuard, LedgerEntry, LedgerError, Metadata, NewEntry, PlanCatalog,
    PlanCode, Result, SystemClock,
};
use credits_store::LedgerStore;

use crate::reconcile::{BalanceReconciler, ReconcileReport};

/// Upper bound on `list_recent_entries`.
pub const MAX_LIST_LIMIT: usize = 200;

/// Reason recorded on plan-switch grants.
pub const PLAN_SWITCH_REASON: &str = "plan.switch";

/// Reason recorded on migration grants.
pub const MIGRATION_GRANT_REASON: &str = "migration.grant";

/// Reason recorded on hold releases.
pub const HOLD_RELEASE_REASON: &str = "hold.release";

/// Metadata key carrying the cycle a grant belongs to.
const CYCLE_KEY_METADATA: &str = "cycle_key";

/// Explicit opt-in for destroying an account's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearConfirmation {
    /// The caller confirmed the destructive operation.
    Confirmed,
    /// No confirmation given.
    Unconfirmed,
}

impl From<bool> for ClearConfirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::Unconfirmed
        }
    }
}

/// Result of [`CreditsService::ensure_cycle_rollover`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloverOutcome {
    /// The cycle the account is in.
    pub cycle_key: CycleKey,
    /// Whether this call wrote the cycle's grant.
    pub applied: bool,
}

/// Result of [`CreditsService::release_hold`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldRelease {
    /// The released hold.
    pub hold_entry_id: EntryId,
    /// Credits returned to the account.
    pub released: i64,
    /// Whether this call wrote the refund.
    pub written: bool,
}

/// The credits engine.
#[derive(Clone)]
pub struct CreditsService {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<dyn PlanCatalog>,
    clock: Arc<dyn Clock>,
    reconciler: BalanceReconciler,
    reconcile_on_read: bool,
}

impl CreditsService {
    /// Create a service using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, catalog: Arc<dyn PlanCatalog>) -> Self {
        Self::with_clock(store, catalog, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<dyn PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler =
            BalanceReconciler::new(Arc::clone(&store), Arc::clone(&catalog), Arc::clone(&clock));
        Self {
            store,
            catalog,
            clock,
            reconciler,
            reconcile_on_read: false,
        }
    }

    /// Reconcile before every balance read.
    #[must_use]
    pub fn reconcile_on_read(mut self, enabled: bool) -> Self {
        self.reconcile_on_read = enabled;
        self
    }

    /// Set the reconciler's scan page size.
    #[must_use]
    pub fn reconcile_page_size(mut self, page_size: usize) -> Self {
        self.reconciler = self.reconciler.with_page_size(page_size);
        self
    }

    /// The plan catalog.
    #[must_use]
    pub fn catalog(&self) -> &dyn PlanCatalog {
        self.catalog.as_ref()
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Create the account on the default plan with zero balance if missing.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn ensure_account_init(&self, account_id: &AccountId) -> Result<Account> {
        if let Some(account) = self.store.get_account(account_id).await? {
            return Ok(account);
        }

        let account = Account::new(
            account_id.clone(),
            self.catalog.default_plan_code(),
            self.clock.now(),
        );

        if self.store.create_account(&account).await? {
            tracing::info!(
                account_id = %account_id,
                plan_code = %account.plan_code,
                "Account initialized"
            );
        } else {
            tracing::debug!(account_id = %account_id, "Account initialized concurrently");
        }

        Ok(self.store.read_account(account_id).await?)
    }

    /// Read the cached balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts.
    pub async fn get_balance(&self, account_id: &AccountId) -> Result<BalanceSnapshot> {
        if self.reconcile_on_read {
            self.reconciler.reconcile(account_id).await?;
        }
        let account = self.store.read_account(account_id).await?;
        Ok(BalanceSnapshot::from(&account))
    }

    /// Soft-disable or re-enable an account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts.
    pub async fn set_disabled(&self, account_id: &AccountId, disabled: bool) -> Result<Account> {
        let account = self.store.set_disabled(account_id, disabled).await?;
        tracing::info!(account_id = %account_id, disabled, "Account disabled flag updated");
        Ok(account)
    }

    // =========================================================================
    // Ledger writes
    // =========================================================================

    /// Debit credits for a paid action.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientBalance` if the balance cannot cover
    /// `amount`; nothing is written in that case.
    pub async fn debit(
        &self,
        account_id: &AccountId,
        entry_id: EntryId,
        amount: i64,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        IdempotencyGuard::check_caller_entry_id(&entry_id)?;
        let entry = NewEntry::new(entry_id, EntryType::Debit, amount, reason).with_metadata(metadata);
        self.apply(account_id, &entry).await
    }

    /// Grant credits.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for non-positive amounts and
    /// `LedgerError::NotFound` for unknown accounts.
    pub async fn grant(
        &self,
        account_id: &AccountId,
        entry_id: EntryId,
        amount: i64,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        IdempotencyGuard::check_caller_entry_id(&entry_id)?;
        let entry = NewEntry::new(entry_id, EntryType::Grant, amount, reason).with_metadata(metadata);
        self.apply(account_id, &entry).await
    }

    /// Reserve credits before the final cost is known.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientBalance` if the balance cannot cover
    /// the reservation.
    pub async fn hold(
        &self,
        account_id: &AccountId,
        entry_id: EntryId,
        amount: i64,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        IdempotencyGuard::check_caller_entry_id(&entry_id)?;
        let entry = NewEntry::new(entry_id, EntryType::Hold, amount, reason).with_metadata(metadata);
        self.apply(account_id, &entry).await
    }

    /// Return credits to the account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for non-positive amounts.
    pub async fn refund(
        &self,
        account_id: &AccountId,
        entry_id: EntryId,
        amount: i64,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        IdempotencyGuard::check_caller_entry_id(&entry_id)?;
        let entry = NewEntry::new(entry_id, EntryType::Refund, amount, reason).with_metadata(metadata);
        self.apply(account_id, &entry).await
    }

    /// Settle a hold: refund the part of it that was not consumed.
    ///
    /// The refund uses a deterministic id derived from the hold, so a hold is
    /// released at most once whatever `consumed` later calls pass.
    ///
    /// # Errors
    ///
    /// - `LedgerError::EntryNotFound` if the hold does not exist.
    /// - `LedgerError::NotAHold` if the entry is not a confirmed hold.
    /// - `LedgerError::InvalidAmount` if `consumed` is negative or exceeds
    ///   the hold.
    pub async fn release_hold(
        &self,
        account_id: &AccountId,
        hold_entry_id: &EntryId,
        consumed: i64,
    ) -> Result<HoldRelease> {
        let hold = self
            .store
            .get_entry(account_id, hold_entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound {
                entry_id: hold_entry_id.to_string(),
            })?;

        if hold.entry_type != EntryType::Hold || !hold.is_confirmed() {
            return Err(LedgerError::NotAHold {
                entry_id: hold_entry_id.to_string(),
            });
        }
        if !(0..=hold.amount).contains(&consumed) {
            return Err(LedgerError::InvalidAmount(consumed));
        }

        let released = hold.amount - consumed;
        if released == 0 {
            tracing::debug!(
                account_id = %account_id,
                hold_entry_id = %hold_entry_id,
                "Hold fully consumed, nothing to release"
            );
            return Ok(HoldRelease {
                hold_entry_id: hold_entry_id.clone(),
                released,
                written: false,
            });
        }

        let mut metadata = Metadata::new();
        metadata.insert("hold_entry_id".into(), hold_entry_id.as_str().into());
        metadata.insert("consumed".into(), consumed.into());

        let release_id = IdempotencyGuard::hold_release_entry_id(hold_entry_id);
        let entry = NewEntry::new(
            release_id.clone(),
            EntryType::Refund,
            released,
            HOLD_RELEASE_REASON,
        )
        .with_metadata(metadata);

        let outcome = self.apply(account_id, &entry).await?;
        let released = if outcome.is_written() {
            released
        } else {
            // Report what the earlier release actually returned.
            self.store
                .get_entry(account_id, &release_id)
                .await?
                .map_or(released, |existing| existing.amount)
        };

        Ok(HoldRelease {
            hold_entry_id: hold_entry_id.clone(),
            released,
            written: outcome.is_written(),
        })
    }

    /// Debit that may overdraw. Administrative repair only.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for non-positive amounts.
    pub async fn admin_debit(
        &self,
        account_id: &AccountId,
        entry_id: EntryId,
        amount: i64,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        IdempotencyGuard::check_caller_entry_id(&entry_id)?;
        let entry = NewEntry::new(entry_id, EntryType::Debit, amount, reason)
            .with_metadata(metadata)
            .allowing_negative();
        let outcome = self.apply(account_id, &entry).await?;
        tracing::info!(
            account_id = %account_id,
            entry_id = %entry.entry_id,
            amount,
            "Administrative debit applied"
        );
        Ok(outcome)
    }

    /// Apply the account's one-time migration grant.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for non-positive amounts.
    pub async fn grant_migration(
        &self,
        account_id: &AccountId,
        amount: i64,
        metadata: Metadata,
    ) -> Result<ApplyOutcome> {
        let entry = NewEntry::new(
            IdempotencyGuard::migration_grant_entry_id(account_id),
            EntryType::Grant,
            amount,
            MIGRATION_GRANT_REASON,
        )
        .with_metadata(metadata);
        self.apply(account_id, &entry).await
    }

    async fn apply(&self, account_id: &AccountId, entry: &NewEntry) -> Result<ApplyOutcome> {
        let outcome = self.store.apply_entry(account_id, entry).await?;

        match outcome {
            ApplyOutcome::Written { balance } => tracing::info!(
                account_id = %account_id,
                entry_id = %entry.entry_id,
                entry_type = %entry.entry_type,
                amount = entry.amount,
                reason = %entry.reason,
                balance,
                "Ledger entry applied"
            ),
            ApplyOutcome::AlreadyExists => tracing::debug!(
                account_id = %account_id,
                entry_id = %entry.entry_id,
                "Ledger entry already exists"
            ),
        }

        Ok(outcome)
    }

    // =========================================================================
    // Cycles and plans
    // =========================================================================

    /// Apply the current cycle's grant if it is due.
    ///
    /// Backfills a missing cycle anchor first. Concurrent callers converge on
    /// one applied grant through the deterministic reset entry id.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts and
    /// `LedgerError::UnknownPlan` if the account's plan left the catalog.
    pub async fn ensure_cycle_rollover(&self, account_id: &AccountId) -> Result<RolloverOutcome> {
        let now = self.clock.now();
        let mut account = self.store.read_account(account_id).await?;

        if account.cycle_anchor.is_none() {
            let anchor = CycleManager::anchor_for_backfill(&account, now);
            account = self.store.backfill_cycle_anchor(account_id, anchor).await?;
            tracing::info!(
                account_id = %account_id,
                cycle_anchor = ?account.cycle_anchor,
                "Cycle anchor backfilled"
            );
        }

        let plan = self.catalog.require(&account.plan_code)?;
        let cycle_key = CycleManager::current_cycle_key(&plan, &account, now);
        let not_applied = RolloverOutcome {
            cycle_key: cycle_key.clone(),
            applied: false,
        };

        if plan.credits_per_cycle <= 0 {
            return Ok(not_applied);
        }

        let reset_id = IdempotencyGuard::cycle_reset_entry_id(&cycle_key);
        let existing = self.store.get_entry(account_id, &reset_id).await?;
        if !CycleManager::is_reset_due(&plan, existing.as_ref()) {
            return Ok(not_applied);
        }
        if self.switched_into_cycle(account_id, &cycle_key).await? {
            tracing::debug!(
                account_id = %account_id,
                cycle_key = %cycle_key,
                "Cycle already granted by plan switch"
            );
            return Ok(not_applied);
        }

        let entry = NewEntry::new(
            reset_id,
            EntryType::Grant,
            plan.credits_per_cycle,
            CYCLE_RESET_REASON,
        )
        .with_metadata(cycle_metadata(&plan.code, &cycle_key))
        .resetting_balance();

        let outcome = self.apply(account_id, &entry).await?;
        if outcome.is_written() {
            tracing::info!(
                account_id = %account_id,
                plan_code = %plan.code,
                cycle_key = %cycle_key,
                credits = plan.credits_per_cycle,
                "Cycle rollover applied"
            );
        }

        Ok(RolloverOutcome {
            cycle_key,
            applied: outcome.is_written(),
        })
    }

    /// Whether the latest plan switch granted credits for `cycle_key`.
    async fn switched_into_cycle(&self, account_id: &AccountId, cycle_key: &CycleKey) -> Result<bool> {
        let latest = self
            .store
            .latest_entry_with_prefix(account_id, PLAN_SWITCH_PREFIX)
            .await?;
        Ok(latest.is_some_and(|entry| {
            entry.is_confirmed()
                && entry
                    .metadata
                    .get(CYCLE_KEY_METADATA)
                    .and_then(serde_json::Value::as_str)
                    == Some(cycle_key.as_str())
        }))
    }

    /// Move the account to another plan.
    ///
    /// Three independently retryable steps, not atomic as a whole:
    /// (1) clear the ledger, (2) set the plan and restart the cycle anchor,
    /// (3) grant the new plan's credits under a fresh id. A failure after
    /// step 1 leaves a cleared ledger on the old plan; calling again is safe.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownPlan` or `LedgerError::AccountDisabled`
    /// before touching anything, and `LedgerError::NotFound` for unknown
    /// accounts.
    pub async fn switch_plan(
        &self,
        account_id: &AccountId,
        plan_code: &PlanCode,
    ) -> Result<BalanceSnapshot> {
        let plan = self.catalog.require(plan_code)?;
        let previous = self.store.read_account(account_id).await?;
        if previous.disabled {
            return Err(LedgerError::AccountDisabled {
                account_id: account_id.to_string(),
            });
        }

        let deleted = self.store.clear_all_entries(account_id).await?;
        let now = self.clock.now();
        let account = self.store.update_plan(account_id, &plan.code, now).await?;

        if plan.credits_per_cycle > 0 {
            let cycle_key = CycleManager::current_cycle_key(&plan, &account, now);
            let entry = NewEntry::new(
                IdempotencyGuard::plan_switch_entry_id(&plan.code, Ulid::new()),
                EntryType::Grant,
                plan.credits_per_cycle,
                PLAN_SWITCH_REASON,
            )
            .with_metadata(cycle_metadata(&plan.code, &cycle_key));
            self.apply(account_id, &entry).await?;
        }

        tracing::info!(
            account_id = %account_id,
            from_plan = %previous.plan_code,
            to_plan = %plan.code,
            deleted_entries = deleted,
            "Plan switched"
        );

        let account = self.store.read_account(account_id).await?;
        Ok(BalanceSnapshot::from(&account))
    }

    // =========================================================================
    // Reconciliation and administration
    // =========================================================================

    /// Recompute the balance from the ledger and repair drift.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts.
    pub async fn reconcile(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        self.reconciler.reconcile(account_id).await
    }

    /// Compute the reconciliation report without repairing.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotFound` for unknown accounts.
    pub async fn inspect(&self, account_id: &AccountId) -> Result<ReconcileReport> {
        self.reconciler.inspect(account_id).await
    }

    /// The most recent entries, newest first. `limit` is capped at
    /// [`MAX_LIST_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list_recent_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .store
            .list_recent_entries(account_id, limit.min(MAX_LIST_LIMIT))
            .await?)
    }

    /// Delete every ledger entry of the account and zero its balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ConfirmationRequired` unless `confirmation` is
    /// [`ClearConfirmation::Confirmed`].
    pub async fn clear_all_entries(
        &self,
        account_id: &AccountId,
        confirmation: ClearConfirmation,
    ) -> Result<u64> {
        if confirmation != ClearConfirmation::Confirmed {
            return Err(LedgerError::ConfirmationRequired);
        }

        let deleted = self.store.clear_all_entries(account_id).await?;
        tracing::warn!(account_id = %account_id, deleted, "Ledger cleared");
        Ok(deleted)
    }
}

fn cycle_metadata(plan_code: &PlanCode, cycle_key: &CycleKey) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("plan_code".into(), plan_code.as_str().into());
    metadata.insert(CYCLE_KEY_METADATA.into(), cycle_key.as_str().into());
    metadata
}
