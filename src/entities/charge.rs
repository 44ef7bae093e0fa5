//! Charge entity - Real-money settlement of spent points.
//!
//! A charge starts `pending` and moves exactly once, to `completed` or `failed`.
//! `processor_ref` is the payment processor's identifier for the settlement.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement status of a charge
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Awaiting the payment processor
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Settled; terminal
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Rejected by the processor; terminal
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ChargeStatus {
    /// Whether no further transition is allowed out of this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Charge database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "point_charges")]
pub struct Model {
    /// Unique identifier for the charge
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Allocation whose points are being settled
    pub allocation_id: i64,
    /// Deduction transaction this charge settles, when known
    pub transaction_id: Option<i64>,
    /// Points being settled
    pub points_charged: i64,
    /// Real-currency amount in dollars
    pub amount_charged: f64,
    /// Settlement status
    pub charge_status: ChargeStatus,
    /// Payment processor reference
    pub processor_ref: String,
    /// Reason given when the charge failed
    pub failure_reason: Option<String>,
    /// When the charge was created
    pub created_at: DateTimeUtc,
    /// When the charge reached a terminal status
    pub settled_at: Option<DateTimeUtc>,
}

/// Defines relationships between Charge and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each charge references one allocation
    #[sea_orm(
        belongs_to = "super::allocation::Entity",
        from = "Column::AllocationId",
        to = "super::allocation::Column::Id"
    )]
    Allocation,
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
