//! Billing and trial cycle computation.
//!
//! A cycle key names the window a plan's credit grant belongs to. The key is
//! fed to [`IdempotencyGuard::cycle_reset_entry_id`], so two callers that
//! compute the same key race on the same entry id and only one grant lands.
//!
//! [`IdempotencyGuard::cycle_reset_entry_id`]: crate::IdempotencyGuard::cycle_reset_entry_id

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::LedgerEntry;
use crate::plan::{CycleKind, Plan};
use crate::{Account, IdempotencyGuard};

/// Key of the cycle sentinel for plans without recurring grants.
pub const NO_CYCLE_KEY: &str = "none";

/// Prefix of fixed-trial cycle keys.
pub const TRIAL_CYCLE_PREFIX: &str = "trial-";

/// Name of a billing or trial window, e.g. `2026-10` or `trial-2026-10-18`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleKey(String);

impl CycleKey {
    /// Return the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the sentinel of a plan that never resets.
    #[must_use]
    pub fn is_none_sentinel(&self) -> bool {
        self.0 == NO_CYCLE_KEY
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cycle rules. Stateless; all inputs are explicit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleManager;

impl CycleManager {
    /// Compute the cycle the account is in at `now`.
    ///
    /// - `Monthly`: `YYYY-MM` of `now` in UTC.
    /// - `FixedTrial`: `trial-YYYY-MM-DD` of the account's cycle anchor. The
    ///   key never changes for the lifetime of the trial. An account without
    ///   an anchor uses `now` until the anchor is backfilled.
    /// - `None`: the constant [`NO_CYCLE_KEY`].
    #[must_use]
    pub fn current_cycle_key(plan: &Plan, account: &Account, now: DateTime<Utc>) -> CycleKey {
        match plan.cycle_kind {
            CycleKind::Monthly => CycleKey(format!("{:04}-{:02}", now.year(), now.month())),
            CycleKind::FixedTrial => {
                let start = account.cycle_anchor.unwrap_or(now);
                CycleKey(format!(
                    "{TRIAL_CYCLE_PREFIX}{}",
                    start.date_naive().format("%Y-%m-%d")
                ))
            }
            CycleKind::None => CycleKey(NO_CYCLE_KEY.to_string()),
        }
    }

    /// Whether a cycle-reset grant still has to be applied.
    ///
    /// `existing_reset` is the stored entry carrying the reset id of the
    /// current cycle, if any. Only a `CONFIRMED` rollover grant counts as
    /// applied.
    #[must_use]
    pub fn is_reset_due(plan: &Plan, existing_reset: Option<&LedgerEntry>) -> bool {
        if !plan.is_cycle_bound() {
            return false;
        }
        !existing_reset.is_some_and(IdempotencyGuard::is_cycle_reset_grant)
    }

    /// The anchor to store on a legacy account that has none.
    ///
    /// Uses the account's creation time, or `now` when the recorded creation
    /// time lies in the future.
    #[must_use]
    pub fn anchor_for_backfill(account: &Account, now: DateTime<Utc>) -> DateTime<Utc> {
        account.created_at.min(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryType, NewEntry};
    use crate::plan::{PlanCatalog, StaticPlanCatalog};
    use crate::{AccountId, EntryId, PlanCode};
    use chrono::{Duration, TimeZone};

    fn plan(code: &str) -> Plan {
        StaticPlanCatalog::default()
            .require(&PlanCode::new(code).unwrap())
            .unwrap()
    }

    fn account_at(at: DateTime<Utc>) -> Account {
        Account::new(
            AccountId::new("acct").unwrap(),
            PlanCode::new("standard").unwrap(),
            at,
        )
    }

    #[test]
    fn monthly_key_is_utc_year_month() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let key = CycleManager::current_cycle_key(&plan("standard"), &account_at(now), now);
        assert_eq!(key.as_str(), "2026-03");
    }

    #[test]
    fn monthly_key_changes_at_month_boundary() {
        let anchor = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        let account = account_at(anchor);
        let before = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let after = before + Duration::seconds(1);
        let standard = plan("standard");
        assert_eq!(
            CycleManager::current_cycle_key(&standard, &account, before).as_str(),
            "2025-12"
        );
        assert_eq!(
            CycleManager::current_cycle_key(&standard, &account, after).as_str(),
            "2026-01"
        );
    }

    #[test]
    fn trial_key_is_constant_across_months() {
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 8, 30, 0).unwrap();
        let account = account_at(start);
        let trial = plan("trial");
        let first = CycleManager::current_cycle_key(&trial, &account, start);
        let much_later = CycleManager::current_cycle_key(&trial, &account, start + Duration::days(90));
        assert_eq!(first.as_str(), "trial-2026-10-18");
        assert_eq!(first, much_later);
    }

    #[test]
    fn trial_key_without_anchor_uses_now() {
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap();
        let mut account = account_at(now);
        account.cycle_anchor = None;
        let key = CycleManager::current_cycle_key(&plan("trial"), &account, now);
        assert_eq!(key.as_str(), "trial-2026-02-02");
    }

    #[test]
    fn none_plan_uses_sentinel_and_never_resets() {
        let now = Utc::now();
        let free = plan("free");
        let key = CycleManager::current_cycle_key(&free, &account_at(now), now);
        assert!(key.is_none_sentinel());
        assert!(!CycleManager::is_reset_due(&free, None));
    }

    #[test]
    fn reset_due_until_confirmed_entry_exists() {
        let standard = plan("standard");
        assert!(CycleManager::is_reset_due(&standard, None));

        let request = NewEntry::new(
            EntryId::new("RESET_2026-10").unwrap(),
            EntryType::Grant,
            2500,
            "plan.cycle_reset",
        );
        let mut entry = LedgerEntry::pending(AccountId::new("acct").unwrap(), &request, 1, Utc::now());
        assert!(CycleManager::is_reset_due(&standard, Some(&entry)));

        entry.confirm().unwrap();
        assert!(!CycleManager::is_reset_due(&standard, Some(&entry)));
    }

    #[test]
    fn backfill_prefers_creation_time() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let account = account_at(created);
        assert_eq!(CycleManager::anchor_for_backfill(&account, now), created);

        let future = account_at(now + Duration::days(1));
        assert_eq!(CycleManager::anchor_for_backfill(&future, now), now);
    }
}
