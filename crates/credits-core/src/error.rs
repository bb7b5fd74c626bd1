//! Error types for the credits ledger.

use crate::entry::EntryStatus;
use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
///
/// Duplicate entry ids are deliberately absent: re-applying an existing entry
/// is a successful no-op reported as `ApplyOutcome::AlreadyExists`.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Account not found.
    #[error("account not found: {account_id}")]
    NotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Ledger entry not found.
    #[error("entry not found: {entry_id}")]
    EntryNotFound {
        /// The entry ID that was not found.
        entry_id: String,
    },

    /// The referenced entry is not a hold.
    #[error("entry is not a hold: {entry_id}")]
    NotAHold {
        /// The offending entry ID.
        entry_id: String,
    },

    /// A debit or hold would drive the balance negative.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current cached balance.
        balance: i64,
        /// Amount that was requested.
        required: i64,
    },

    /// Transient storage contention. Safe to retry with the same entry id.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// Non-positive amount supplied.
    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    /// Plan code not present in the catalog.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// A destructive operation was invoked without explicit confirmation.
    #[error("operation requires explicit confirmation")]
    ConfirmationRequired,

    /// The account is soft-disabled and rejects ledger writes.
    #[error("account disabled: {account_id}")]
    AccountDisabled {
        /// The disabled account ID.
        account_id: String,
    },

    /// An entry status transition out of a terminal state was attempted.
    #[error("invalid entry transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// The current status.
        from: EntryStatus,
        /// The requested status.
        to: EntryStatus,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
