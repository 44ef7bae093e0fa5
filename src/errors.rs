//! Unified error type for the ledger, with a single classification used by the
//! recovery policy and the HTTP layer.

use crate::core::allocation::DisplayStatus;
use crate::entities::ChargeStatus;
use sea_orm::DbErr;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Every failure the ledger can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Unreadable or invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Input that breaks a ledger rule
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// Points outside `1..=MAX_POINTS`
    #[error("Invalid points value: {points}")]
    InvalidPoints {
        /// Rejected value
        points: i64,
    },

    /// Negative or non-finite dollar amount
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// Rejected value
        amount: f64,
    },

    /// A deduction asked for more than the allocation has left
    #[error("Insufficient points: {remaining} remaining, {requested} requested")]
    InsufficientPoints {
        /// Points left on the allocation
        remaining: i64,
        /// Points the deduction asked for
        requested: i64,
    },

    /// No allocation with this id
    #[error("Allocation {id} not found")]
    AllocationNotFound {
        /// Requested id
        id: i64,
    },

    /// The allocation exists but cannot be spent from today
    #[error("Allocation {id} is {status} and cannot be spent from")]
    AllocationUnavailable {
        /// Allocation id
        id: i64,
        /// Its status today
        status: DisplayStatus,
    },

    /// No ledger entry with this id
    #[error("Transaction {id} not found")]
    TransactionNotFound {
        /// Requested id
        id: i64,
    },

    /// No charge with this id
    #[error("Charge {id} not found")]
    ChargeNotFound {
        /// Requested id
        id: i64,
    },

    /// A settled charge was asked to move to the other terminal state
    #[error("Charge {id} cannot move from {from} to {to}")]
    InvalidChargeTransition {
        /// Charge id
        id: i64,
        /// Current status
        from: ChargeStatus,
        /// Requested status
        to: ChargeStatus,
    },

    /// Store failure
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Filesystem or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used to pick a recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input or a rejected business rule; report to the caller, never retry
    Validation,
    /// The store could not be reached; safe to retry
    TransientNetwork,
    /// Broken configuration or store state; stop
    FatalState,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => f.write_str("validation"),
            Self::TransientNetwork => f.write_str("transient_network"),
            Self::FatalState => f.write_str("fatal_state"),
        }
    }
}

impl Error {
    /// Classifies the error for the recovery policy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. }
            | Self::InvalidPoints { .. }
            | Self::InvalidAmount { .. }
            | Self::InsufficientPoints { .. }
            | Self::AllocationNotFound { .. }
            | Self::AllocationUnavailable { .. }
            | Self::TransactionNotFound { .. }
            | Self::ChargeNotFound { .. }
            | Self::InvalidChargeTransition { .. } => ErrorClass::Validation,
            Self::Database(DbErr::ConnectionAcquire(_) | DbErr::Conn(_)) => {
                ErrorClass::TransientNetwork
            }
            Self::Database(_) | Self::Config { .. } | Self::Io(_) => ErrorClass::FatalState,
        }
    }

    /// Shorthand for a [`Error::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
