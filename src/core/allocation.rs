//! Allocation business logic - Creating, reading and managing point allocations.
//!
//! An allocation is created by a vendor with a points cap for one agent and one
//! period. Its balance only moves through [`crate::core::transaction::record_deduction`];
//! this module owns creation, lookups, lifecycle status changes and the derived
//! display status.

use crate::{
    config::settings::AllocationSeed,
    entities::{Allocation, AllocationStatus, allocation},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument};

/// Largest point value accepted for a cap, deduction, grant or charge.
///
/// Totals over millions of allocations at this cap still fit in an `i64`.
pub const MAX_POINTS: i64 = 1_000_000_000_000;

/// Rejects point values outside `1..=MAX_POINTS`.
pub fn validate_points(points: i64) -> Result<()> {
    if points <= 0 || points > MAX_POINTS {
        return Err(Error::InvalidPoints { points });
    }
    Ok(())
}

/// Status shown for an allocation, derived from its stored status, dates and balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    /// Spendable
    Active,
    /// Not released yet, or before its start date
    Pending,
    /// Frozen by the vendor
    Suspended,
    /// No points left
    Depleted,
    /// Past its end date
    Expired,
}

impl DisplayStatus {
    /// Whether a deduction could succeed in this state given enough points.
    #[must_use]
    pub const fn is_spendable(self) -> bool {
        matches!(self, Self::Active | Self::Depleted)
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
            Self::Depleted => "depleted",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Input for [`create_allocation`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewAllocation {
    /// Vendor granting the points
    pub vendor_id: String,
    /// Agent receiving the points
    pub agent_id: String,
    /// Period label, e.g. `"2024-Q3"`
    pub period: String,
    /// Points cap, must be positive
    pub allocated_points: i64,
    /// First spendable day
    pub start_date: NaiveDate,
    /// Last spendable day, not before `start_date`
    pub end_date: NaiveDate,
    /// Optional vendor notes
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<&AllocationSeed> for NewAllocation {
    fn from(seed: &AllocationSeed) -> Self {
        Self {
            vendor_id: seed.vendor_id.clone(),
            agent_id: seed.agent_id.clone(),
            period: seed.period.clone(),
            allocated_points: seed.allocated_points,
            start_date: seed.start_date,
            end_date: seed.end_date,
            notes: seed.notes.clone(),
        }
    }
}

/// Checks a [`NewAllocation`] without touching the database.
pub fn validate_new_allocation(new: &NewAllocation) -> Result<()> {
    if new.vendor_id.trim().is_empty() {
        return Err(Error::validation("Vendor id cannot be empty"));
    }
    if new.agent_id.trim().is_empty() {
        return Err(Error::validation("Agent id cannot be empty"));
    }
    if new.period.trim().is_empty() {
        return Err(Error::validation("Allocation period cannot be empty"));
    }
    validate_points(new.allocated_points)?;
    if new.end_date < new.start_date {
        return Err(Error::validation(format!(
            "End date {} is before start date {}",
            new.end_date, new.start_date
        )));
    }
    Ok(())
}

/// Creates a new active allocation with nothing spent.
///
/// Ids and the period label are trimmed; blank notes are stored as `None`.
#[instrument(skip(db, new), fields(vendor_id = %new.vendor_id, agent_id = %new.agent_id))]
pub async fn create_allocation<C>(db: &C, new: NewAllocation) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    validate_new_allocation(&new)?;

    let now = Utc::now();
    let notes = new
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let allocation = allocation::ActiveModel {
        vendor_id: Set(new.vendor_id.trim().to_string()),
        agent_id: Set(new.agent_id.trim().to_string()),
        allocation_period: Set(new.period.trim().to_string()),
        allocated_points: Set(new.allocated_points),
        used_points: Set(0),
        remaining_points: Set(new.allocated_points),
        status: Set(AllocationStatus::Active),
        start_date: Set(new.start_date),
        end_date: Set(new.end_date),
        notes: Set(notes),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let result = allocation.insert(db).await?;
    info!(
        allocation_id = result.id,
        points = result.allocated_points,
        period = %result.allocation_period,
        "allocation created"
    );
    Ok(result)
}

/// Finds an allocation by its unique ID.
pub async fn get_allocation_by_id<C>(db: &C, allocation_id: i64) -> Result<Option<allocation::Model>>
where
    C: ConnectionTrait,
{
    Allocation::find_by_id(allocation_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Like [`get_allocation_by_id`], but a missing allocation is an error.
pub async fn require_allocation<C>(db: &C, allocation_id: i64) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    get_allocation_by_id(db, allocation_id)
        .await?
        .ok_or(Error::AllocationNotFound { id: allocation_id })
}

/// Returns the points still spendable on an allocation.
pub async fn get_remaining<C>(db: &C, allocation_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let allocation = require_allocation(db, allocation_id).await?;
    Ok(remaining_of(&allocation))
}

/// `allocated_points - used_points` for a loaded allocation.
#[must_use]
pub const fn remaining_of(allocation: &allocation::Model) -> i64 {
    allocation.allocated_points - allocation.used_points
}

/// Derives the status to show for an allocation on a given day.
///
/// Expiry wins over everything, then explicit suspension, then "not started yet",
/// then an empty balance.
#[must_use]
pub fn display_status(allocation: &allocation::Model, today: NaiveDate) -> DisplayStatus {
    if allocation.status == AllocationStatus::Expired || today > allocation.end_date {
        return DisplayStatus::Expired;
    }
    if allocation.status == AllocationStatus::Suspended {
        return DisplayStatus::Suspended;
    }
    if allocation.status == AllocationStatus::Pending || today < allocation.start_date {
        return DisplayStatus::Pending;
    }
    if remaining_of(allocation) <= 0 {
        return DisplayStatus::Depleted;
    }
    DisplayStatus::Active
}

/// Lists every allocation granted to an agent, oldest period first.
pub async fn list_allocations_for_agent<C>(
    db: &C,
    agent_id: &str,
) -> Result<Vec<allocation::Model>>
where
    C: ConnectionTrait,
{
    Allocation::find()
        .filter(allocation::Column::AgentId.eq(agent_id))
        .order_by_asc(allocation::Column::StartDate)
        .order_by_asc(allocation::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists every allocation a vendor has granted, oldest period first.
pub async fn list_allocations_for_vendor<C>(
    db: &C,
    vendor_id: &str,
) -> Result<Vec<allocation::Model>>
where
    C: ConnectionTrait,
{
    Allocation::find()
        .filter(allocation::Column::VendorId.eq(vendor_id))
        .order_by_asc(allocation::Column::StartDate)
        .order_by_asc(allocation::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Changes the stored lifecycle status of an allocation.
///
/// Expired is terminal: an expired allocation can only be set to expired again.
/// Balances are never touched here.
#[instrument(skip(db))]
pub async fn set_allocation_status<C>(
    db: &C,
    allocation_id: i64,
    status: AllocationStatus,
) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    let allocation = require_allocation(db, allocation_id).await?;

    if allocation.status == status {
        return Ok(allocation);
    }
    if allocation.status == AllocationStatus::Expired {
        return Err(Error::validation(format!(
            "Allocation {allocation_id} has expired and cannot be set to {status}"
        )));
    }

    let previous = allocation.status;
    let mut active_model: allocation::ActiveModel = allocation.into();
    active_model.status = Set(status);
    active_model.updated_at = Set(Utc::now());
    let updated = active_model.update(db).await?;

    info!(allocation_id, %previous, %status, "allocation status changed");
    Ok(updated)
}

/// Creates each seeded allocation whose (vendor, agent, period) is not present yet.
///
/// Returns how many allocations were created.
pub async fn seed_allocations<C>(db: &C, seeds: &[AllocationSeed]) -> Result<usize>
where
    C: ConnectionTrait,
{
    let mut created = 0;
    for seed in seeds {
        let existing = Allocation::find()
            .filter(allocation::Column::VendorId.eq(seed.vendor_id.trim()))
            .filter(allocation::Column::AgentId.eq(seed.agent_id.trim()))
            .filter(allocation::Column::AllocationPeriod.eq(seed.period.trim()))
            .one(db)
            .await?;

        if existing.is_none() {
            create_allocation(db, NewAllocation::from(seed)).await?;
            created += 1;
        }
    }
    Ok(created)
}
