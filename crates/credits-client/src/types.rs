//! Request and response types for the credits client.

use serde::{Deserialize, Serialize};

pub use credits_core::{LedgerEntry, Metadata};

/// Body of a debit, grant, hold or refund.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRequest {
    /// Idempotency key, unique per account.
    pub entry_id: String,
    /// Positive amount of credits.
    pub amount: i64,
    /// Free-text category.
    pub reason: String,
    /// Metadata stored with the entry.
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl EntryRequest {
    /// Create a request without metadata.
    #[must_use]
    pub fn new(entry_id: impl Into<String>, amount: i64, reason: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            amount,
            reason: reason.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Whether a write appended a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    /// The entry was appended.
    Written,
    /// An entry with the same id already existed; nothing changed.
    AlreadyExists,
}

/// Result of a ledger write.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteResponse {
    /// The entry id.
    pub entry_id: String,
    /// Outcome of the write.
    pub status: WriteStatus,
    /// Balance after the call.
    pub balance: i64,
}

/// Account balance.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// The account ID.
    pub account_id: String,
    /// Current plan.
    pub plan_code: String,
    /// Cached balance.
    pub balance: i64,
}

/// Release hold request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReleaseHoldRequest {
    pub consumed: i64,
}

/// Result of releasing a hold.
#[derive(Debug, Clone, Deserialize)]
pub struct HoldReleaseResponse {
    /// The released hold.
    pub hold_entry_id: String,
    /// Credits returned to the account.
    pub released: i64,
    /// Whether this call wrote the refund.
    pub written: bool,
}

/// Result of a rollover check.
#[derive(Debug, Clone, Deserialize)]
pub struct RolloverResponse {
    /// The account's current cycle.
    pub cycle_key: String,
    /// Whether this call applied the cycle grant.
    pub applied: bool,
}

/// Recent ledger entries, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct EntriesResponse {
    /// The entries.
    pub entries: Vec<LedgerEntry>,
}

/// API error response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
