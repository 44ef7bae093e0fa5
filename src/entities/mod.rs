//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the ledger tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod allocation;
pub mod charge;
pub mod point_transaction;
pub mod system_state;

// Re-export specific types to avoid conflicts
pub use allocation::{
    AllocationStatus, Column as AllocationColumn, Entity as Allocation, Model as AllocationModel,
};
pub use charge::{ChargeStatus, Column as ChargeColumn, Entity as Charge, Model as ChargeModel};
pub use point_transaction::{
    Column as PointTransactionColumn, Entity as PointTransaction, Model as PointTransactionModel,
    TransactionType,
};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
