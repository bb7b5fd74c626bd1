//! Ledger entry types.
//!
//! Every change to an account's balance is recorded as an immutable
//! [`LedgerEntry`]. Amounts are always stored positive; the [`EntryType`]
//! carries the sign.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{AccountId, EntryId};

/// Opaque key/value metadata attached to an entry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A single credit-affecting event on an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Idempotency key, unique per account.
    pub entry_id: EntryId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Kind of entry; determines the sign of `amount`.
    pub entry_type: EntryType,

    /// Magnitude of the change. Always positive.
    pub amount: i64,

    /// Free-text category, e.g. `plan.cycle_reset` or `usage`.
    pub reason: String,

    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// Lifecycle status.
    pub status: EntryStatus,

    /// Position in the account's ledger, assigned by the store.
    pub sequence: u64,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build a pending entry from a write request.
    #[must_use]
    pub fn pending(
        account_id: AccountId,
        request: &NewEntry,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: request.entry_id.clone(),
            account_id,
            entry_type: request.entry_type,
            amount: request.amount,
            reason: request.reason.clone(),
            metadata: request.metadata.clone(),
            status: EntryStatus::Pending,
            sequence,
            created_at,
        }
    }

    /// Move the entry to `CONFIRMED`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` if the entry is already terminal.
    pub fn confirm(&mut self) -> Result<()> {
        self.status = self.status.transition(EntryStatus::Confirmed)?;
        Ok(())
    }

    /// Move the entry to `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` if the entry is already terminal.
    pub fn fail(&mut self) -> Result<()> {
        self.status = self.status.transition(EntryStatus::Failed)?;
        Ok(())
    }

    /// Whether the entry counts towards the balance.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == EntryStatus::Confirmed
    }
}

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Credits granted (signup, plan cycle, migration, manual).
    Grant,

    /// Credits consumed by a paid action.
    Debit,

    /// Credits reserved before the final cost is known.
    Hold,

    /// Credits returned to the account.
    Refund,
}

impl EntryType {
    /// Whether the entry adds to the balance.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(self, Self::Grant | Self::Refund)
    }

    /// Apply this type's sign to a positive magnitude.
    #[must_use]
    pub const fn signed(self, amount: i64) -> i64 {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }

    /// Stable lowercase name, as used in storage and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Debit => "debit",
            Self::Hold => "hold",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grant" => Ok(Self::Grant),
            "debit" => Ok(Self::Debit),
            "hold" => Ok(Self::Hold),
            "refund" => Ok(Self::Refund),
            other => Err(LedgerError::Serialization(format!(
                "unknown entry type: {other}"
            ))),
        }
    }
}

/// Lifecycle status of an entry.
///
/// `Pending` moves to `Confirmed` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Written but not yet committed.
    Pending,

    /// Committed; counts towards the balance.
    Confirmed,

    /// Aborted; never counts towards the balance.
    Failed,
}

impl EntryStatus {
    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Validate a transition and return the new status.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` when leaving a terminal state
    /// or "transitioning" back to `Pending`.
    pub fn transition(self, to: Self) -> Result<Self> {
        if self.is_terminal() || to == Self::Pending {
            return Err(LedgerError::InvalidTransition { from: self, to });
        }
        Ok(to)
    }

    /// Stable lowercase name, as used in storage and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::Serialization(format!(
                "unknown entry status: {other}"
            ))),
        }
    }
}

/// How a written entry moves the cached balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceEffect {
    /// Add or subtract the amount.
    #[default]
    Adjust,

    /// Set the balance to the amount. Used by cycle-reset grants, which open a
    /// new summation window.
    Reset,
}

/// A request to append an entry to an account's ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Idempotency key.
    pub entry_id: EntryId,
    /// Entry type.
    pub entry_type: EntryType,
    /// Positive magnitude.
    pub amount: i64,
    /// Reason category.
    pub reason: String,
    /// Metadata.
    pub metadata: Metadata,
    /// Balance effect.
    pub effect: BalanceEffect,
    /// Allow a debit or hold to overdraw. Administrative repair only.
    pub allow_negative: bool,
}

impl NewEntry {
    /// Create a request with empty metadata and the default balance effect.
    #[must_use]
    pub fn new(
        entry_id: EntryId,
        entry_type: EntryType,
        amount: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entry_id,
            entry_type,
            amount,
            reason: reason.into(),
            metadata: Metadata::new(),
            effect: BalanceEffect::Adjust,
            allow_negative: false,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark this entry as a cycle reset.
    #[must_use]
    pub fn resetting_balance(mut self) -> Self {
        self.effect = BalanceEffect::Reset;
        self
    }

    /// Permit overdraft for this entry.
    #[must_use]
    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    /// Check the request's preconditions.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` if `amount <= 0`.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidAmount(self.amount));
        }
        Ok(())
    }

    /// Compute the balance after applying this entry to `balance`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientBalance` when a debit or hold would
    /// leave the balance negative and overdraft is not allowed.
    pub fn balance_after(&self, balance: i64) -> Result<i64> {
        match self.effect {
            BalanceEffect::Reset => Ok(self.entry_type.signed(self.amount)),
            BalanceEffect::Adjust => {
                let next = balance.saturating_add(self.entry_type.signed(self.amount));
                if next < 0 && !self.entry_type.is_credit() && !self.allow_negative {
                    return Err(LedgerError::InsufficientBalance {
                        balance,
                        required: self.amount,
                    });
                }
                Ok(next)
            }
        }
    }
}

/// Result of applying an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The entry was appended.
    Written {
        /// Cached balance after the write.
        balance: i64,
    },

    /// An entry with the same id already exists; nothing changed.
    AlreadyExists,
}

impl ApplyOutcome {
    /// Whether this call appended the entry.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Inclusive starting point for ascending ledger scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCursor {
    /// The first entry of the account.
    Start,
    /// The given entry, inclusive. Unknown ids yield an empty scan.
    Entry(EntryId),
    /// The first entry created at or after this instant.
    Timestamp(DateTime<Utc>),
    /// The first entry whose sequence is at least this value.
    Sequence(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(entry_type: EntryType, amount: i64) -> NewEntry {
        NewEntry::new(EntryId::new("E1").unwrap(), entry_type, amount, "test")
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(
            request(EntryType::Grant, 0).validate(),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            request(EntryType::Debit, -5).validate(),
            Err(LedgerError::InvalidAmount(-5))
        ));
        assert!(request(EntryType::Hold, 1).validate().is_ok());
    }

    #[test]
    fn debit_cannot_overdraw() {
        let result = request(EntryType::Debit, 101).balance_after(100);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance {
                balance: 100,
                required: 101
            })
        ));
        assert_eq!(request(EntryType::Debit, 100).balance_after(100).unwrap(), 0);
    }

    #[test]
    fn override_allows_overdraft() {
        let next = request(EntryType::Hold, 150)
            .allowing_negative()
            .balance_after(100)
            .unwrap();
        assert_eq!(next, -50);
    }

    #[test]
    fn reset_sets_balance() {
        let next = request(EntryType::Grant, 2500)
            .resetting_balance()
            .balance_after(40)
            .unwrap();
        assert_eq!(next, 2500);
    }

    #[test]
    fn grant_and_refund_add() {
        assert_eq!(request(EntryType::Grant, 10).balance_after(5).unwrap(), 15);
        assert_eq!(request(EntryType::Refund, 10).balance_after(5).unwrap(), 15);
    }

    #[test]
    fn status_transitions() {
        assert_eq!(
            EntryStatus::Pending.transition(EntryStatus::Confirmed).unwrap(),
            EntryStatus::Confirmed
        );
        assert_eq!(
            EntryStatus::Pending.transition(EntryStatus::Failed).unwrap(),
            EntryStatus::Failed
        );
        assert!(EntryStatus::Confirmed
            .transition(EntryStatus::Failed)
            .is_err());
        assert!(EntryStatus::Failed
            .transition(EntryStatus::Confirmed)
            .is_err());
        assert!(EntryStatus::Pending
            .transition(EntryStatus::Pending)
            .is_err());
    }

    #[test]
    fn confirmed_entry_is_frozen() {
        let account = AccountId::new("acct").unwrap();
        let mut entry = LedgerEntry::pending(account, &request(EntryType::Grant, 5), 1, Utc::now());
        entry.confirm().unwrap();
        assert!(entry.is_confirmed());
        assert!(entry.fail().is_err());
        assert_eq!(entry.status, EntryStatus::Confirmed);
    }

    #[test]
    fn entry_type_names_roundtrip() {
        for ty in [
            EntryType::Grant,
            EntryType::Debit,
            EntryType::Hold,
            EntryType::Refund,
        ] {
            assert_eq!(ty.as_str().parse::<EntryType>().unwrap(), ty);
        }
        assert!("bogus".parse::<EntryType>().is_err());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ApplyOutcome::Written { balance: 3850 }).unwrap();
        assert_eq!(json["status"], "written");
        assert_eq!(json["balance"], 3850);
        let json = serde_json::to_value(ApplyOutcome::AlreadyExists).unwrap();
        assert_eq!(json["status"], "already_exists");
    }
}
