//! API handlers.

pub mod accounts;
pub mod admin;
pub mod health;

use serde::Serialize;

use credits_core::{AccountId, ApplyOutcome, EntryId};

use crate::credits::CreditsService;
use crate::error::ApiError;

/// Result of a ledger write.
#[derive(Debug, Serialize)]
pub struct EntryWriteResponse {
    /// The entry id that was written or already existed.
    pub entry_id: String,
    /// `written` or `already_exists`.
    pub status: &'static str,
    /// Cached balance after the call.
    pub balance: i64,
}

impl EntryWriteResponse {
    /// Build the response, reading the balance when the write was a no-op.
    pub(crate) async fn from_outcome(
        credits: &CreditsService,
        account_id: &AccountId,
        entry_id: &EntryId,
        outcome: ApplyOutcome,
    ) -> Result<Self, ApiError> {
        let (status, balance) = match outcome {
            ApplyOutcome::Written { balance } => ("written", balance),
            ApplyOutcome::AlreadyExists => (
                "already_exists",
                credits.get_balance(account_id).await?.cached_balance,
            ),
        };

        Ok(Self {
            entry_id: entry_id.to_string(),
            status,
            balance,
        })
    }
}
