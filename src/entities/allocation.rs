//! Allocation entity - A vendor's capped grant of co-pay points to an agent.
//!
//! Each allocation covers one `allocation_period` for one vendor/agent pairing.
//! `remaining_points` is stored alongside `used_points` so that deductions can be
//! applied with a single conditional update; the two always satisfy
//! `remaining_points == allocated_points - used_points`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored lifecycle status of an allocation.
///
/// "Depleted" is never stored; it is derived from `remaining_points` (see
/// [`crate::core::allocation::display_status`]).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Points may be spent
    #[sea_orm(string_value = "active")]
    Active,
    /// Created but not yet released by the vendor
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Temporarily frozen by the vendor or an admin
    #[sea_orm(string_value = "suspended")]
    Suspended,
    /// Past its end date; terminal
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Allocation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "point_allocations")]
pub struct Model {
    /// Unique identifier for the allocation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Vendor granting the points
    pub vendor_id: String,
    /// Agent receiving the points
    pub agent_id: String,
    /// Period label, e.g. `"2024-Q3"`
    pub allocation_period: String,
    /// Cap on spendable points
    pub allocated_points: i64,
    /// Points consumed by deductions so far
    pub used_points: i64,
    /// `allocated_points - used_points`, never negative
    pub remaining_points: i64,
    /// Stored lifecycle status
    pub status: AllocationStatus,
    /// First day points may be spent
    pub start_date: Date,
    /// Last day points may be spent
    pub end_date: Date,
    /// Free-form vendor notes
    pub notes: Option<String>,
    /// When the allocation was created
    pub created_at: DateTimeUtc,
    /// When the allocation row was last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Allocation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One allocation has many ledger transactions
    #[sea_orm(has_many = "super::point_transaction::Entity")]
    Transactions,
    /// One allocation has many charges
    #[sea_orm(has_many = "super::charge::Entity")]
    Charges,
}

impl Related<super::point_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::charge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Charges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
