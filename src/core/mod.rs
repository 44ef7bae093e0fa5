//! Core business logic - framework-agnostic ledger operations.
//!
//! Every function takes a database connection and returns structured data; the
//! HTTP layer in [`crate::api`] only translates requests and responses.

/// Allocation creation, lookups and lifecycle status
pub mod allocation;
/// Charge creation and settlement
pub mod charge;
/// Expiry sweep for lapsed allocations
pub mod expiry;
/// Error classification driven retry policy
pub mod recovery;
/// Accounting summaries, reconciliation and wallet views
pub mod report;
/// Ledger transactions: deductions, grants and audits
pub mod transaction;
