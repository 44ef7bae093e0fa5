//! Expiry sweep
//!
//! Persists `expired` for allocations whose end date has passed. Deductions already
//! refuse lapsed allocations on their own, so the sweep only brings the stored
//! status in line with what is displayed. The date of the last sweep is kept in the
//! `system_state` table so startup can skip a sweep that already ran today.

use crate::{
    entities::{Allocation, AllocationStatus, SystemState, allocation, system_state},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::info;

const LAST_EXPIRY_SWEEP_KEY: &str = "last_expiry_sweep";

/// An allocation the sweep marked as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredAllocation {
    /// Allocation that expired
    pub allocation_id: i64,
    /// Vendor that granted it
    pub vendor_id: String,
    /// Agent it was granted to
    pub agent_id: String,
    /// Period label
    pub allocation_period: String,
    /// Its last spendable day
    pub end_date: NaiveDate,
    /// Points left unspent
    pub unused_points: i64,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpirySweepResult {
    /// Allocations marked expired by this sweep
    pub expired: Vec<ExpiredAllocation>,
    /// Total unspent points on those allocations
    pub forfeited_points: i64,
    /// Day the sweep ran for
    pub sweep_date: NaiveDate,
}

/// Returns true unless a sweep has already been recorded for `today`.
pub async fn is_sweep_needed<C>(db: &C, today: NaiveDate) -> Result<bool>
where
    C: ConnectionTrait,
{
    let last_sweep = get_last_sweep_date(db).await?;
    Ok(last_sweep.is_none_or(|last| last < today))
}

/// Retrieves the date of the last sweep from the `system_state` table.
pub async fn get_last_sweep_date<C>(db: &C) -> Result<Option<NaiveDate>>
where
    C: ConnectionTrait,
{
    let state = SystemState::find()
        .filter(system_state::Column::Key.eq(LAST_EXPIRY_SWEEP_KEY))
        .one(db)
        .await?;

    match state {
        Some(s) => NaiveDate::parse_from_str(&s.value, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::Config {
                message: format!("Failed to parse last expiry sweep date: {e}"),
            }),
        None => Ok(None),
    }
}

async fn set_last_sweep_date<C>(db: &C, date: NaiveDate) -> Result<()>
where
    C: ConnectionTrait,
{
    let date_str = date.format("%Y-%m-%d").to_string();
    let now = Utc::now().naive_utc();

    let existing = SystemState::find()
        .filter(system_state::Column::Key.eq(LAST_EXPIRY_SWEEP_KEY))
        .one(db)
        .await?;

    if let Some(state) = existing {
        let mut active_model: system_state::ActiveModel = state.into();
        active_model.value = Set(date_str);
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        let new_state = system_state::ActiveModel {
            key: Set(LAST_EXPIRY_SWEEP_KEY.to_string()),
            value: Set(date_str),
            updated_at: Set(now),
            ..Default::default()
        };
        new_state.insert(db).await?;
    }

    Ok(())
}

/// Marks every not-yet-expired allocation that ended before `today` as expired and
/// records the sweep date, all in one database transaction.
pub async fn expire_lapsed_allocations(
    db: &DatabaseConnection,
    today: NaiveDate,
) -> Result<ExpirySweepResult> {
    let txn = db.begin().await?;

    let lapsed = Allocation::find()
        .filter(allocation::Column::Status.ne(AllocationStatus::Expired))
        .filter(allocation::Column::EndDate.lt(today))
        .all(&txn)
        .await?;

    if !lapsed.is_empty() {
        let ids: Vec<i64> = lapsed.iter().map(|a| a.id).collect();
        Allocation::update_many()
            .col_expr(
                allocation::Column::Status,
                Expr::value(AllocationStatus::Expired),
            )
            .col_expr(allocation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(allocation::Column::Id.is_in(ids))
            .exec(&txn)
            .await?;
    }

    set_last_sweep_date(&txn, today).await?;
    txn.commit().await?;

    let expired: Vec<ExpiredAllocation> = lapsed
        .into_iter()
        .map(|a| ExpiredAllocation {
            allocation_id: a.id,
            unused_points: a.remaining_points,
            vendor_id: a.vendor_id,
            agent_id: a.agent_id,
            allocation_period: a.allocation_period,
            end_date: a.end_date,
        })
        .collect();
    let forfeited_points: i64 = expired.iter().map(|e| e.unused_points).sum();

    info!(
        expired = expired.len(),
        forfeited_points,
        %today,
        "expiry sweep finished"
    );

    Ok(ExpirySweepResult {
        expired,
        forfeited_points,
        sweep_date: today,
    })
}

/// Formats a sweep result into a human-readable summary for the logs.
#[must_use]
pub fn format_expiry_summary(result: &ExpirySweepResult) -> String {
    use std::fmt::Write;

    let mut summary = format!(
        "Expiry sweep - {} - {} allocations expired, {} points unspent\n",
        result.sweep_date.format("%Y-%m-%d"),
        result.expired.len(),
        result.forfeited_points
    );

    for expired in &result.expired {
        // Writing to a String cannot fail
        let _ = writeln!(
            summary,
            "  #{} {} → {} ({}) ended {} with {} pts left",
            expired.allocation_id,
            expired.vendor_id,
            expired.agent_id,
            expired.allocation_period,
            expired.end_date,
            expired.unused_points
        );
    }

    summary
}
