//! HTTP layer - JSON API over the ledger operations.
//!
//! This module wires the handlers into an axum [`Router`], holds the shared
//! application state, and runs the server until Ctrl-C.

/// Ledger error to HTTP response mapping
pub mod error;
/// Extractors that reject with the ledger error body
pub mod extract;
/// Request handlers, one per route
pub mod handlers;

use crate::{
    core::recovery::RecoveryPolicy,
    errors::{Error, Result},
};
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared data available to all handlers.
pub struct AppState {
    /// Database connection for all ledger operations
    pub database: DatabaseConnection,
    /// Retry policy applied to every ledger call
    pub recovery: RecoveryPolicy,
    /// Tolerance used by the reconciliation report
    pub reconciliation_tolerance: f64,
}

impl AppState {
    /// Creates a new `AppState` with the given connection and settings.
    #[must_use]
    pub const fn new(
        database: DatabaseConnection,
        recovery: RecoveryPolicy,
        reconciliation_tolerance: f64,
    ) -> Self {
        Self {
            database,
            recovery,
            reconciliation_tolerance,
        }
    }
}

/// Builds the router with every ledger route.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/allocations", post(handlers::create_allocation))
        .route("/allocations/:id", get(handlers::get_allocation))
        .route("/allocations/:id/remaining", get(handlers::get_remaining))
        .route("/allocations/:id/status", post(handlers::set_allocation_status))
        .route("/allocations/:id/transactions", get(handlers::list_transactions))
        .route("/allocations/:id/deductions", post(handlers::record_deduction))
        .route("/allocations/:id/grants", post(handlers::record_grant))
        .route("/allocations/:id/audit", get(handlers::audit_allocation))
        .route("/allocations/:id/statement", get(handlers::allocation_statement))
        .route("/allocations/:id/charges", get(handlers::list_charges))
        .route("/agents/:agent_id/wallet", get(handlers::agent_wallet))
        .route(
            "/vendors/:vendor_id/allocations",
            get(handlers::vendor_allocations),
        )
        .route("/charges", post(handlers::create_charge))
        .route("/charges/:id", get(handlers::get_charge))
        .route("/charges/:id/complete", post(handlers::complete_charge))
        .route("/charges/:id/fail", post(handlers::fail_charge))
        .route("/accounting/summary", get(handlers::accounting_summary))
        .route("/accounting/reconciliation", get(handlers::reconciliation))
        .route("/maintenance/expire", post(handlers::expire_allocations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `listener` until Ctrl-C is received.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "ledger API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(Error::Io)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("shutdown signal received");
}
