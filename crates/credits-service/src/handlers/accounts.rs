//! Account and ledger handlers for service callers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{
    AccountId, BalanceSnapshot, EntryId, EntryType, LedgerEntry, Metadata,
};

use crate::auth::ServiceAuth;
use crate::credits::{HoldRelease, RolloverOutcome};
use crate::error::ApiError;
use crate::handlers::EntryWriteResponse;
use crate::state::AppState;

/// Default page size for entry listings.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The account ID.
    pub account_id: String,
    /// Current plan.
    pub plan_code: String,
    /// Cached balance.
    pub balance: i64,
}

impl From<BalanceSnapshot> for BalanceResponse {
    fn from(snapshot: BalanceSnapshot) -> Self {
        Self {
            account_id: snapshot.account_id.to_string(),
            plan_code: snapshot.plan_code.to_string(),
            balance: snapshot.cached_balance,
        }
    }
}

/// Body of debit, grant, hold and refund requests.
#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    /// Caller-chosen idempotency key.
    pub entry_id: String,
    /// Positive amount of credits.
    pub amount: i64,
    /// Free-text category.
    pub reason: String,
    /// Optional metadata stored with the entry.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Release hold request.
#[derive(Debug, Default, Deserialize)]
pub struct ReleaseHoldRequest {
    /// Credits of the hold actually used.
    #[serde(default)]
    pub consumed: i64,
}

/// Entry listing query.
#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    /// Maximum number of entries (capped server-side).
    pub limit: Option<usize>,
}

/// Entry listing response.
#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntry>,
}

/// Create the account if missing and return its balance.
pub async fn init_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let account = state.credits.ensure_account_init(&account_id).await?;

    tracing::debug!(
        account_id = %account_id,
        service = %auth.service_name,
        "Account init requested"
    );

    Ok(Json(BalanceResponse::from(BalanceSnapshot::from(&account))))
}

/// Get the balance, initializing the account on first access.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    state.credits.ensure_account_init(&account_id).await?;
    let snapshot = state.credits.get_balance(&account_id).await?;

    Ok(Json(BalanceResponse::from(snapshot)))
}

/// List the most recent ledger entries.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let entries = state
        .credits
        .list_recent_entries(&account_id, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;

    Ok(Json(EntriesResponse { entries }))
}

/// Debit credits.
pub async fn debit(
    state: State<Arc<AppState>>,
    auth: ServiceAuth,
    path: Path<String>,
    body: Json<EntryRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    write_entry(state, auth, path, body, EntryType::Debit).await
}

/// Grant credits.
pub async fn grant(
    state: State<Arc<AppState>>,
    auth: ServiceAuth,
    path: Path<String>,
    body: Json<EntryRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    write_entry(state, auth, path, body, EntryType::Grant).await
}

/// Place a hold.
pub async fn hold(
    state: State<Arc<AppState>>,
    auth: ServiceAuth,
    path: Path<String>,
    body: Json<EntryRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    write_entry(state, auth, path, body, EntryType::Hold).await
}

/// Refund credits.
pub async fn refund(
    state: State<Arc<AppState>>,
    auth: ServiceAuth,
    path: Path<String>,
    body: Json<EntryRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    write_entry(state, auth, path, body, EntryType::Refund).await
}

async fn write_entry(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(account_id): Path<String>,
    Json(body): Json<EntryRequest>,
    entry_type: EntryType,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let entry_id = EntryId::new(body.entry_id)?;
    let credits = &state.credits;

    let outcome = match entry_type {
        EntryType::Debit => {
            credits
                .debit(&account_id, entry_id.clone(), body.amount, body.reason, body.metadata)
                .await?
        }
        EntryType::Grant => {
            credits
                .grant(&account_id, entry_id.clone(), body.amount, body.reason, body.metadata)
                .await?
        }
        EntryType::Hold => {
            credits
                .hold(&account_id, entry_id.clone(), body.amount, body.reason, body.metadata)
                .await?
        }
        EntryType::Refund => {
            credits
                .refund(&account_id, entry_id.clone(), body.amount, body.reason, body.metadata)
                .await?
        }
    };

    tracing::debug!(
        account_id = %account_id,
        entry_id = %entry_id,
        service = %auth.service_name,
        "Entry request handled"
    );

    let response =
        EntryWriteResponse::from_outcome(credits, &account_id, &entry_id, outcome).await?;
    Ok(Json(response))
}

/// Release a hold, refunding its unused part.
pub async fn release_hold(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((account_id, entry_id)): Path<(String, String)>,
    body: Option<Json<ReleaseHoldRequest>>,
) -> Result<Json<HoldRelease>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let entry_id = EntryId::new(entry_id)?;
    let consumed = body.map_or(0, |Json(body)| body.consumed);

    let release = state
        .credits
        .release_hold(&account_id, &entry_id, consumed)
        .await?;

    Ok(Json(release))
}

/// Apply the current cycle's grant if due.
pub async fn rollover(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<RolloverOutcome>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let outcome = state.credits.ensure_cycle_rollover(&account_id).await?;

    Ok(Json(outcome))
}
