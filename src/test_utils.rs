//! Shared test utilities for the ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        allocation::{self, NewAllocation},
        transaction,
    },
    entities,
    errors::Result,
};
use chrono::{Duration, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::{Path, PathBuf};

/// Creates an in-memory `SQLite` database with all tables initialized.
///
/// The pool is limited to one connection: every connection to `sqlite::memory:`
/// would otherwise open its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database whose pool really holds several
/// connections, for tests that need statements to interleave.
///
/// Returns the file path; remove it with [`remove_file_db`].
pub async fn setup_file_db(max_connections: u32) -> Result<(DatabaseConnection, PathBuf)> {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let path = std::env::temp_dir().join(format!(
        "copay-ledger-{}-{nanos}.sqlite",
        std::process::id()
    ));
    let url = format!("sqlite://{}?mode=rwc", path.display());

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .min_connections(max_connections)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((db, path))
}

/// Deletes a database file created by [`setup_file_db`] and its journal files.
pub fn remove_file_db(path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

/// Builds a [`NewAllocation`] that is spendable today.
///
/// # Defaults
/// * `period`: `"2024-Q3"`
/// * `start_date`: yesterday
/// * `end_date`: 90 days from today
/// * `notes`: None
pub fn test_new_allocation(vendor_id: &str, agent_id: &str, points: i64) -> NewAllocation {
    let today = Utc::now().date_naive();
    NewAllocation {
        vendor_id: vendor_id.to_string(),
        agent_id: agent_id.to_string(),
        period: "2024-Q3".to_string(),
        allocated_points: points,
        start_date: today - Duration::days(1),
        end_date: today + Duration::days(90),
        notes: None,
    }
}

/// Creates a spendable allocation from `vendor-1` to `agent-1`.
pub async fn create_test_allocation(
    db: &DatabaseConnection,
    points: i64,
) -> Result<entities::allocation::Model> {
    allocation::create_allocation(db, test_new_allocation("vendor-1", "agent-1", points)).await
}

/// Records a deduction covering `points / 10` dollars.
pub async fn create_test_deduction(
    db: &DatabaseConnection,
    allocation_id: i64,
    points: i64,
) -> Result<entities::point_transaction::Model> {
    #[allow(clippy::cast_precision_loss)]
    let amount = points as f64 / 10.0;
    transaction::record_deduction(
        db,
        allocation_id,
        points,
        amount,
        "Test deduction".to_string(),
    )
    .await
}

/// Sets up a complete test environment with one allocation.
/// Returns (db, allocation) for common test scenarios.
pub async fn setup_with_allocation(
    points: i64,
) -> Result<(DatabaseConnection, entities::allocation::Model)> {
    let db = setup_test_db().await?;
    let allocation = create_test_allocation(&db, points).await?;
    Ok((db, allocation))
}
