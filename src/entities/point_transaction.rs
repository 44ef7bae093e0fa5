//! Point transaction entity - One immutable entry in an allocation's ledger.
//!
//! Rows are only ever inserted. `allocation` entries record grants for history,
//! `deduction` entries record points spent and are mirrored in the owning
//! allocation's `used_points`.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of ledger entry
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Points granted to the agent (+)
    #[sea_orm(string_value = "allocation")]
    Allocation,
    /// Points spent by the agent (-)
    #[sea_orm(string_value = "deduction")]
    Deduction,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation => f.write_str("allocation"),
            Self::Deduction => f.write_str("deduction"),
        }
    }
}

/// Point transaction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "point_transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// ID of the allocation this transaction belongs to
    pub allocation_id: i64,
    /// Grant or deduction
    pub transaction_type: TransactionType,
    /// Points granted or spent, always positive
    pub points_used: i64,
    /// Dollar value covered by these points
    pub amount_covered: f64,
    /// Human-readable description of the transaction
    pub description: String,
    /// When the transaction was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one allocation
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
