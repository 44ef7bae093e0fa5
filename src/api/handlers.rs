//! Request handlers for the ledger HTTP API.
//!
//! Handlers parse the request, run the ledger operation through the shared
//! [`RecoveryPolicy`](crate::core::recovery::RecoveryPolicy), and serialize the
//! result. No ledger rule lives here.

use super::{
    AppState,
    error::ApiError,
    extract::{Json, Path, Query},
};
use crate::{
    core::{
        allocation::{self, DisplayStatus, NewAllocation},
        charge::{self, NewCharge},
        expiry::{self, ExpirySweepResult},
        report::{
            self, AccountingScope, AccountingSummary, AgentWallet, ReconciliationReport,
        },
        transaction::{self, AllocationAudit},
    },
    entities::{AllocationModel, AllocationStatus, ChargeModel, PointTransactionModel},
    errors::Error,
};
use axum::{extract::State, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type ApiResult<T> = Result<T, ApiError>;

const DEFAULT_DEDUCTION_DESCRIPTION: &str = "Points deduction";

/// An allocation with the status shown for it today.
#[derive(Debug, Serialize)]
pub struct AllocationView {
    /// Stored allocation row
    #[serde(flatten)]
    pub allocation: AllocationModel,
    /// Derived status
    pub display_status: DisplayStatus,
}

impl AllocationView {
    fn today(allocation: AllocationModel) -> Self {
        let display_status = allocation::display_status(&allocation, Utc::now().date_naive());
        Self {
            allocation,
            display_status,
        }
    }
}

/// Body of `GET /allocations/{id}/remaining`
#[derive(Debug, Serialize)]
pub struct RemainingResponse {
    /// Allocation queried
    pub allocation_id: i64,
    /// Spendable points left
    pub remaining_points: i64,
}

/// Body of `POST /allocations/{id}/deductions`
#[derive(Debug, Deserialize)]
pub struct DeductionRequest {
    /// Points to spend
    pub points: i64,
    /// Dollar value the points cover
    pub amount_covered: f64,
    /// What the points were spent on
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `POST /allocations/{id}/grants`
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// Points granted
    pub points: i64,
    /// Dollar value of the grant
    pub amount_covered: f64,
}

/// Body of `POST /allocations/{id}/status`
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// New stored status
    pub status: AllocationStatus,
}

/// Body of `POST /charges/{id}/fail`
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    /// Why the processor rejected the charge
    pub reason: String,
}

/// Query of `GET /accounting/summary`
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// Restrict to one vendor
    pub vendor_id: Option<String>,
    /// Restrict to one agent
    pub agent_id: Option<String>,
}

impl SummaryQuery {
    fn scope(self) -> Result<AccountingScope, Error> {
        match (self.vendor_id, self.agent_id) {
            (None, None) => Ok(AccountingScope::All),
            (Some(vendor_id), None) => Ok(AccountingScope::Vendor(vendor_id)),
            (None, Some(agent_id)) => Ok(AccountingScope::Agent(agent_id)),
            (Some(_), Some(_)) => Err(Error::validation(
                "Filter by vendor_id or agent_id, not both",
            )),
        }
    }
}

/// `GET /health`
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `POST /allocations`
pub async fn create_allocation(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewAllocation>,
) -> ApiResult<(StatusCode, Json<AllocationView>)> {
    let db = &state.database;
    let created = state
        .recovery
        .run("create_allocation", || {
            allocation::create_allocation(db, new.clone())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(AllocationView::today(created))))
}

/// `GET /allocations/{id}`
pub async fn get_allocation(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<Json<AllocationView>> {
    let db = &state.database;
    let found = state
        .recovery
        .run("get_allocation", || {
            allocation::require_allocation(db, allocation_id)
        })
        .await?;
    Ok(Json(AllocationView::today(found)))
}

/// `GET /allocations/{id}/remaining`
pub async fn get_remaining(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<Json<RemainingResponse>> {
    let db = &state.database;
    let remaining_points = state
        .recovery
        .run("get_remaining", || allocation::get_remaining(db, allocation_id))
        .await?;
    Ok(Json(RemainingResponse {
        allocation_id,
        remaining_points,
    }))
}

/// `POST /allocations/{id}/status`
pub async fn set_allocation_status(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<AllocationView>> {
    let db = &state.database;
    let updated = state
        .recovery
        .run("set_allocation_status", || {
            allocation::set_allocation_status(db, allocation_id, request.status)
        })
        .await?;
    Ok(Json(AllocationView::today(updated)))
}

/// `GET /allocations/{id}/transactions`
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<Json<Vec<PointTransactionModel>>> {
    let db = &state.database;
    let entries = state
        .recovery
        .run("list_transactions", || async move {
            allocation::require_allocation(db, allocation_id).await?;
            transaction::get_transactions_for_allocation(db, allocation_id).await
        })
        .await?;
    Ok(Json(entries))
}

/// `GET /allocations/{id}/statement`, plain text
pub async fn allocation_statement(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<String> {
    let db = &state.database;
    let (found, entries) = state
        .recovery
        .run("allocation_statement", || async move {
            let found = allocation::require_allocation(db, allocation_id).await?;
            let entries = transaction::get_transactions_for_allocation(db, allocation_id).await?;
            Ok((found, entries))
        })
        .await?;
    Ok(report::format_allocation_statement(
        &found,
        &entries,
        Utc::now().date_naive(),
    ))
}

/// `GET /allocations/{id}/charges`
pub async fn list_charges(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<Json<Vec<ChargeModel>>> {
    let db = &state.database;
    let charges = state
        .recovery
        .run("list_charges", || async move {
            allocation::require_allocation(db, allocation_id).await?;
            charge::get_charges_for_allocation(db, allocation_id).await
        })
        .await?;
    Ok(Json(charges))
}

/// `POST /allocations/{id}/deductions`
pub async fn record_deduction(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
    Json(request): Json<DeductionRequest>,
) -> ApiResult<(StatusCode, Json<PointTransactionModel>)> {
    let db = &state.database;
    let description = request
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DEDUCTION_DESCRIPTION.to_string());

    // A failed attempt rolls back, so retrying cannot spend twice
    let entry = state
        .recovery
        .run("record_deduction", || {
            transaction::record_deduction(
                db,
                allocation_id,
                request.points,
                request.amount_covered,
                description.clone(),
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `POST /allocations/{id}/grants`
pub async fn record_grant(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
    Json(request): Json<GrantRequest>,
) -> ApiResult<(StatusCode, Json<PointTransactionModel>)> {
    let db = &state.database;
    let entry = state
        .recovery
        .run("record_allocation_grant", || {
            transaction::record_allocation_grant(
                db,
                allocation_id,
                request.points,
                request.amount_covered,
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `GET /allocations/{id}/audit`
pub async fn audit_allocation(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<i64>,
) -> ApiResult<Json<AllocationAudit>> {
    let db = &state.database;
    let audit = state
        .recovery
        .run("audit_allocation", || {
            transaction::audit_allocation(db, allocation_id)
        })
        .await?;
    Ok(Json(audit))
}

/// `GET /agents/{agent_id}/wallet`
pub async fn agent_wallet(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentWallet>> {
    let db = &state.database;
    let agent_id = agent_id.as_str();
    let today = Utc::now().date_naive();
    let wallet = state
        .recovery
        .run("agent_wallet", || report::agent_wallet(db, agent_id, today))
        .await?;
    Ok(Json(wallet))
}

/// `GET /vendors/{vendor_id}/allocations`
pub async fn vendor_allocations(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
) -> ApiResult<Json<Vec<AllocationView>>> {
    let db = &state.database;
    let vendor_id = vendor_id.as_str();
    let allocations = state
        .recovery
        .run("vendor_allocations", || {
            allocation::list_allocations_for_vendor(db, vendor_id)
        })
        .await?;
    Ok(Json(
        allocations.into_iter().map(AllocationView::today).collect(),
    ))
}

/// `POST /charges`
pub async fn create_charge(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewCharge>,
) -> ApiResult<(StatusCode, Json<ChargeModel>)> {
    let db = &state.database;
    let created = state
        .recovery
        .run("create_charge", || charge::create_charge(db, new.clone()))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /charges/{id}`
pub async fn get_charge(
    State(state): State<Arc<AppState>>,
    Path(charge_id): Path<i64>,
) -> ApiResult<Json<ChargeModel>> {
    let db = &state.database;
    let found = state
        .recovery
        .run("get_charge", || async move {
            charge::get_charge_by_id(db, charge_id)
                .await?
                .ok_or(Error::ChargeNotFound { id: charge_id })
        })
        .await?;
    Ok(Json(found))
}

/// `POST /charges/{id}/complete`
pub async fn complete_charge(
    State(state): State<Arc<AppState>>,
    Path(charge_id): Path<i64>,
) -> ApiResult<Json<ChargeModel>> {
    let db = &state.database;
    let settled = state
        .recovery
        .run("mark_completed", || charge::mark_completed(db, charge_id))
        .await?;
    Ok(Json(settled))
}

/// `POST /charges/{id}/fail`
pub async fn fail_charge(
    State(state): State<Arc<AppState>>,
    Path(charge_id): Path<i64>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<ChargeModel>> {
    let db = &state.database;
    let reason = request.reason.as_str();
    let settled = state
        .recovery
        .run("mark_failed", || charge::mark_failed(db, charge_id, reason))
        .await?;
    Ok(Json(settled))
}

/// `GET /accounting/summary`
pub async fn accounting_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<AccountingSummary>> {
    let db = &state.database;
    let scope = &query.scope()?;
    let summary = state
        .recovery
        .run("accounting_summary", || report::accounting_summary(db, scope))
        .await?;
    Ok(Json(summary))
}

/// `GET /accounting/reconciliation`
pub async fn reconciliation(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ReconciliationReport>> {
    let db = &state.database;
    let tolerance = state.reconciliation_tolerance;
    let report = state
        .recovery
        .run("reconcile", || report::reconcile(db, tolerance))
        .await?;
    Ok(Json(report))
}

/// `POST /maintenance/expire`
pub async fn expire_allocations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ExpirySweepResult>> {
    let db = &state.database;
    let today = Utc::now().date_naive();
    let result = state
        .recovery
        .run("expire_lapsed_allocations", || {
            expiry::expire_lapsed_allocations(db, today)
        })
        .await?;
    Ok(Json(result))
}
