//! Deterministic entry ids for system-initiated writes.
//!
//! Entry ids are unique per account in the store, so any caller (a scheduled
//! job, a retried request, a backfill script) that recomputes the same id and
//! applies it again gets `AlreadyExists` instead of a second grant. The guard
//! has no state of its own.
//!
//! The prefixes below belong to the system. Caller-supplied entry ids must
//! pass [`IdempotencyGuard::check_caller_entry_id`].

use ulid::Ulid;

use crate::cycle::CycleKey;
use crate::entry::{EntryType, LedgerEntry};
use crate::{AccountId, EntryId, IdError, PlanCode};

/// Prefix of cycle-reset entry ids.
pub const CYCLE_RESET_PREFIX: &str = "RESET_";

/// Prefix of one-time migration grant entry ids.
pub const MIGRATION_GRANT_PREFIX: &str = "MIGRATION_GRANT_";

/// Prefix of plan-switch grant entry ids.
pub const PLAN_SWITCH_PREFIX: &str = "PLAN_SWITCH_";

/// Prefix of hold-release refund entry ids.
pub const HOLD_RELEASE_PREFIX: &str = "RELEASE_";

/// Prefixes callers may not use for their own entry ids.
pub const RESERVED_PREFIXES: [&str; 4] = [
    CYCLE_RESET_PREFIX,
    MIGRATION_GRANT_PREFIX,
    PLAN_SWITCH_PREFIX,
    HOLD_RELEASE_PREFIX,
];

/// Reason recorded on cycle-reset grants.
pub const CYCLE_RESET_REASON: &str = "plan.cycle_reset";

/// Derives idempotency keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Entry id of the grant that opens `cycle_key`. Scoped per account by
    /// storage, so the account id is not part of the key.
    #[must_use]
    pub fn cycle_reset_entry_id(cycle_key: &CycleKey) -> EntryId {
        EntryId::from_trusted(format!("{CYCLE_RESET_PREFIX}{cycle_key}"))
    }

    /// Whether `entry` is a confirmed cycle-reset grant written by rollover.
    #[must_use]
    pub fn is_cycle_reset_grant(entry: &LedgerEntry) -> bool {
        entry.is_confirmed()
            && entry.entry_type == EntryType::Grant
            && entry.reason == CYCLE_RESET_REASON
            && entry.entry_id.as_str().starts_with(CYCLE_RESET_PREFIX)
    }

    /// Reject caller-supplied entry ids in the system namespace.
    ///
    /// # Errors
    ///
    /// Returns `IdError::ReservedPrefix` if the id starts with one of
    /// [`RESERVED_PREFIXES`].
    pub fn check_caller_entry_id(entry_id: &EntryId) -> Result<(), IdError> {
        match RESERVED_PREFIXES
            .into_iter()
            .find(|prefix| entry_id.as_str().starts_with(prefix))
        {
            Some(prefix) => Err(IdError::ReservedPrefix { prefix }),
            None => Ok(()),
        }
    }

    /// Entry id of the one-time migration grant for an account.
    #[must_use]
    pub fn migration_grant_entry_id(account_id: &AccountId) -> EntryId {
        EntryId::from_trusted(format!("{MIGRATION_GRANT_PREFIX}{account_id}"))
    }

    /// Entry id of a plan-switch grant.
    ///
    /// A plan switch is not a recurring event, so the id carries a fresh
    /// nonce: re-running a switch grants again, on a freshly cleared ledger.
    #[must_use]
    pub fn plan_switch_entry_id(plan_code: &PlanCode, nonce: Ulid) -> EntryId {
        EntryId::from_trusted(format!("{PLAN_SWITCH_PREFIX}{plan_code}_{nonce}"))
    }

    /// Entry id of the refund that releases the unused part of a hold.
    #[must_use]
    pub fn hold_release_entry_id(hold_entry_id: &EntryId) -> EntryId {
        EntryId::from_trusted(format!("{HOLD_RELEASE_PREFIX}{hold_entry_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleManager;
    use crate::plan::{PlanCatalog, StaticPlanCatalog};
    use crate::Account;
    use chrono::{TimeZone, Utc};

    #[test]
    fn cycle_reset_id_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        let plan = StaticPlanCatalog::default()
            .require(&PlanCode::new("pro").unwrap())
            .unwrap();
        let account = Account::new(AccountId::new("a").unwrap(), plan.code.clone(), now);

        let first = IdempotencyGuard::cycle_reset_entry_id(&CycleManager::current_cycle_key(
            &plan, &account, now,
        ));
        let again = IdempotencyGuard::cycle_reset_entry_id(&CycleManager::current_cycle_key(
            &plan, &account, now,
        ));
        assert_eq!(first, again);
        assert_eq!(first.as_str(), "RESET_2026-10");
    }

    #[test]
    fn migration_grant_id_is_stable_per_account() {
        let account = AccountId::new("user_42").unwrap();
        assert_eq!(
            IdempotencyGuard::migration_grant_entry_id(&account).as_str(),
            "MIGRATION_GRANT_user_42"
        );
        assert!(IdempotencyGuard::check_caller_entry_id(
            &IdempotencyGuard::migration_grant_entry_id(&account)
        )
        .is_err());
    }

    #[test]
    fn plan_switch_ids_differ_per_nonce() {
        let plan = PlanCode::new("pro").unwrap();
        let a = IdempotencyGuard::plan_switch_entry_id(&plan, Ulid::new());
        let b = IdempotencyGuard::plan_switch_entry_id(&plan, Ulid::new());
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("PLAN_SWITCH_pro_"));
    }

    #[test]
    fn hold_release_id_derives_from_hold() {
        let hold = EntryId::new("job-77").unwrap();
        assert_eq!(
            IdempotencyGuard::hold_release_entry_id(&hold).as_str(),
            "RELEASE_job-77"
        );
    }

    #[test]
    fn caller_ids_outside_reserved_namespace_pass() {
        for id in ["D1", "job-77", "reset_2026-11", "RESETS", "usage_RELEASE_x"] {
            assert_eq!(
                IdempotencyGuard::check_caller_entry_id(&EntryId::new(id).unwrap()),
                Ok(())
            );
        }
    }

    #[test]
    fn caller_ids_with_reserved_prefix_are_rejected() {
        for (id, prefix) in [
            ("RESET_2026-11", CYCLE_RESET_PREFIX),
            ("MIGRATION_GRANT_user_1", MIGRATION_GRANT_PREFIX),
            ("PLAN_SWITCH_pro_x", PLAN_SWITCH_PREFIX),
            ("RELEASE_H1", HOLD_RELEASE_PREFIX),
        ] {
            assert_eq!(
                IdempotencyGuard::check_caller_entry_id(&EntryId::new(id).unwrap()),
                Err(IdError::ReservedPrefix { prefix })
            );
        }
    }

    #[test]
    fn only_rollover_grants_count_as_resets() {
        let reset = |entry_type, reason: &str| {
            let request = crate::NewEntry::new(
                EntryId::new("RESET_2026-11").unwrap(),
                entry_type,
                10,
                reason,
            );
            let mut entry =
                LedgerEntry::pending(AccountId::new("a").unwrap(), &request, 1, Utc::now());
            entry.confirm().unwrap();
            entry
        };

        assert!(IdempotencyGuard::is_cycle_reset_grant(&reset(
            EntryType::Grant,
            CYCLE_RESET_REASON
        )));
        assert!(!IdempotencyGuard::is_cycle_reset_grant(&reset(
            EntryType::Debit,
            CYCLE_RESET_REASON
        )));
        assert!(!IdempotencyGuard::is_cycle_reset_grant(&reset(
            EntryType::Grant,
            "usage"
        )));
    }
}
