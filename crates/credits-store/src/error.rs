//! Error types for ledger storage.

use credits_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Account not found.
    #[error("account not found: {account_id}")]
    NotFound {
        /// The missing account.
        account_id: String,
    },

    /// A debit or hold would overdraw the account.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current cached balance.
        balance: i64,
        /// Requested amount.
        required: i64,
    },

    /// Non-positive amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// The account is soft-disabled.
    #[error("account disabled: {account_id}")]
    AccountDisabled {
        /// The disabled account.
        account_id: String,
    },

    /// Lock timeout, serialization failure or deadlock. Retry with the same
    /// entry id.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            LedgerError::InvalidAmount(amount) => Self::InvalidAmount(amount),
            LedgerError::NotFound { account_id } => Self::NotFound { account_id },
            LedgerError::AccountDisabled { account_id } => Self::AccountDisabled { account_id },
            LedgerError::TransactionConflict(msg) => Self::TransactionConflict(msg),
            LedgerError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { account_id } => Self::NotFound { account_id },
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            StoreError::InvalidAmount(amount) => Self::InvalidAmount(amount),
            StoreError::AccountDisabled { account_id } => Self::AccountDisabled { account_id },
            StoreError::TransactionConflict(msg) => Self::TransactionConflict(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::Database(msg) => Self::Storage(msg),
        }
    }
}
