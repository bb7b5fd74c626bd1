//! Account types for the credits ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, PlanCode};

/// A credit account.
///
/// `cached_balance` is a read-optimised copy of the ledger sum. The ledger is
/// authoritative; the reconciler repairs this field when the two disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID.
    pub account_id: AccountId,

    /// Current plan.
    pub plan_code: PlanCode,

    /// Cached credit balance.
    pub cached_balance: i64,

    /// Reference instant for cycle computation (trial start for fixed trials).
    ///
    /// Legacy accounts may lack it; it is backfilled on the next rollover.
    #[serde(default)]
    pub cycle_anchor: Option<DateTime<Utc>>,

    /// Soft-disable flag. Disabled accounts reject ledger writes.
    #[serde(default)]
    pub disabled: bool,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last written.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance on the given plan.
    #[must_use]
    pub fn new(account_id: AccountId, plan_code: PlanCode, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            plan_code,
            cached_balance: 0,
            cycle_anchor: Some(now),
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Snapshot returned by balance reads and plan switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// The account ID.
    pub account_id: AccountId,
    /// Current plan.
    pub plan_code: PlanCode,
    /// Cached balance.
    pub cached_balance: i64,
}

impl From<&Account> for BalanceSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.account_id.clone(),
            plan_code: account.plan_code.clone(),
            cached_balance: account.cached_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(
            AccountId::new("user_1").unwrap(),
            PlanCode::new("free").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn new_account_has_zero_balance() {
        let account = account();
        assert_eq!(account.cached_balance, 0);
        assert!(!account.disabled);
        assert_eq!(account.cycle_anchor, Some(account.created_at));
    }

    #[test]
    fn legacy_record_without_anchor_deserializes() {
        let json = serde_json::json!({
            "account_id": "legacy",
            "plan_code": "standard",
            "cached_balance": 12,
            "created_at": "2024-01-05T00:00:00Z",
            "updated_at": "2024-01-05T00:00:00Z"
        });
        let account: Account = serde_json::from_value(json).unwrap();
        assert!(account.cycle_anchor.is_none());
        assert!(!account.disabled);
    }
}
