//! Administrative handlers.
//!
//! Every handler here requires `AdminAuth` and logs the acting admin.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{AccountId, EntryId, Metadata, PlanCode};

use crate::auth::AdminAuth;
use crate::credits::ClearConfirmation;
use crate::error::ApiError;
use crate::handlers::accounts::{BalanceResponse, EntryRequest};
use crate::handlers::EntryWriteResponse;
use crate::reconcile::ReconcileReport;
use crate::state::AppState;

/// Switch plan request.
#[derive(Debug, Deserialize)]
pub struct SwitchPlanRequest {
    /// Target plan code.
    pub plan_code: String,
}

/// Clear ledger request.
#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    /// Must be `true`.
    #[serde(default)]
    pub confirm: bool,
}

/// Clear ledger response.
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    /// Number of deleted entries.
    pub deleted_entries: u64,
}

/// Migration grant request.
#[derive(Debug, Deserialize)]
pub struct MigrationGrantRequest {
    /// Credits to grant.
    pub amount: i64,
    /// Optional metadata stored with the entry.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Disable request.
#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    /// New value of the soft-disable flag.
    pub disabled: bool,
}

/// Disable response.
#[derive(Debug, Serialize)]
pub struct DisableResponse {
    /// The account ID.
    pub account_id: String,
    /// Current value of the flag.
    pub disabled: bool,
}

/// Move an account to another plan.
pub async fn switch_plan(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<SwitchPlanRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let plan_code = PlanCode::new(body.plan_code)?;

    let snapshot = state.credits.switch_plan(&account_id, &plan_code).await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        plan_code = %plan_code,
        "Admin switched plan"
    );

    Ok(Json(BalanceResponse::from(snapshot)))
}

/// Reconcile the cached balance against the ledger.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let report = state.credits.reconcile(&account_id).await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        repaired = report.repaired,
        "Admin reconciled account"
    );

    Ok(Json(report))
}

/// Delete every entry of the account. Requires `confirm: true`.
pub async fn clear_entries(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<ClearRequest>,
) -> Result<Json<ClearResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let deleted_entries = state
        .credits
        .clear_all_entries(&account_id, ClearConfirmation::from(body.confirm))
        .await?;

    tracing::warn!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        deleted_entries,
        "Admin cleared ledger"
    );

    Ok(Json(ClearResponse { deleted_entries }))
}

/// Apply the one-time migration grant.
pub async fn migration_grant(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<MigrationGrantRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    state.credits.ensure_account_init(&account_id).await?;

    let entry_id = credits_core::IdempotencyGuard::migration_grant_entry_id(&account_id);
    let outcome = state
        .credits
        .grant_migration(&account_id, body.amount, body.metadata)
        .await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        amount = body.amount,
        "Admin migration grant"
    );

    let response =
        EntryWriteResponse::from_outcome(&state.credits, &account_id, &entry_id, outcome).await?;
    Ok(Json(response))
}

/// Debit that may overdraw the account.
pub async fn admin_debit(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<EntryRequest>,
) -> Result<Json<EntryWriteResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let entry_id = EntryId::new(body.entry_id)?;

    let outcome = state
        .credits
        .admin_debit(
            &account_id,
            entry_id.clone(),
            body.amount,
            body.reason,
            body.metadata,
        )
        .await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        entry_id = %entry_id,
        "Admin debit"
    );

    let response =
        EntryWriteResponse::from_outcome(&state.credits, &account_id, &entry_id, outcome).await?;
    Ok(Json(response))
}

/// Set or clear the soft-disable flag.
pub async fn set_disabled(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, ApiError> {
    let account_id = AccountId::new(account_id)?;
    let account = state
        .credits
        .set_disabled(&account_id, body.disabled)
        .await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        account_id = %account_id,
        disabled = account.disabled,
        "Admin updated disabled flag"
    );

    Ok(Json(DisableResponse {
        account_id: account.account_id.to_string(),
        disabled: account.disabled,
    }))
}
