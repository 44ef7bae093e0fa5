//! Report generation business logic.
//!
//! Accounting summaries, reconciliation between logged spend and real-money
//! charges, and the per-agent wallet view. Everything here is computed from the
//! stored rows on request and never written back. The pure `summarize` /
//! `reconcile_records` functions hold the arithmetic; the async wrappers only load
//! rows.

use crate::{
    core::allocation::{DisplayStatus, display_status, list_allocations_for_agent},
    entities::{
        Allocation, Charge, ChargeStatus, PointTransaction, TransactionType, allocation, charge,
        point_transaction,
    },
    errors::Result,
};
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, TransactionTrait, prelude::*};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Which allocations an accounting summary covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountingScope {
    /// Every allocation
    All,
    /// Allocations granted by one vendor
    Vendor(String),
    /// Allocations granted to one agent
    Agent(String),
}

/// Derived totals over a set of allocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingSummary {
    /// Number of allocations in scope
    pub allocation_count: usize,
    /// Sum of allocation caps
    pub total_points_allocated: i64,
    /// Sum of deduction points
    pub total_points_used: i64,
    /// `total_points_allocated - total_points_used`
    pub points_remaining: i64,
    /// Sum of deduction `amount_covered`
    pub total_amount_covered: f64,
    /// Sum of completed charges' `amount_charged`
    pub total_amount_charged: f64,
    /// `total_amount_charged / total_points_used`, zero when nothing was used
    pub collection_rate: f64,
    /// Share of allocated points used, as a percentage
    pub utilization_percent: f64,
    /// Charges still awaiting the processor
    pub pending_charge_count: usize,
    /// Charges the processor rejected
    pub failed_charge_count: usize,
}

/// One allocation whose logged spend and completed charges disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationReconciliation {
    /// Allocation with the mismatch
    pub allocation_id: i64,
    /// Sum of deduction `amount_covered`
    pub amount_covered: f64,
    /// Sum of completed `amount_charged`
    pub amount_charged: f64,
    /// `amount_covered - amount_charged`
    pub difference: f64,
}

/// Comparison of logged spend against completed charges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    /// Sum of deduction `amount_covered`
    pub total_amount_covered: f64,
    /// Sum of completed `amount_charged`
    pub total_amount_charged: f64,
    /// `total_amount_covered - total_amount_charged`
    pub difference: f64,
    /// Tolerance the report was computed with
    pub tolerance: f64,
    /// Whether the totals and every allocation agree within tolerance
    pub balanced: bool,
    /// Allocations that disagree, by id
    pub mismatches: Vec<AllocationReconciliation>,
}

/// One allocation as shown in an agent's wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletEntry {
    /// The allocation
    pub allocation: allocation::Model,
    /// Status shown for it today
    pub display_status: DisplayStatus,
    /// Share used, as a percentage
    pub utilization_percent: f64,
}

/// Every allocation granted to one agent with totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentWallet {
    /// Agent the wallet belongs to
    pub agent_id: String,
    /// Allocations, oldest period first
    pub entries: Vec<WalletEntry>,
    /// Sum of caps
    pub total_allocated: i64,
    /// Sum of used points
    pub total_used: i64,
    /// Sum of remaining points
    pub total_remaining: i64,
    /// Remaining points on allocations that can be spent from today
    pub spendable_points: i64,
}

/// Loads the rows in scope and computes an [`AccountingSummary`].
///
/// The reads share one database transaction so the totals describe a single
/// moment.
pub async fn accounting_summary(
    db: &DatabaseConnection,
    scope: &AccountingScope,
) -> Result<AccountingSummary> {
    let txn = db.begin().await?;

    let allocations = match scope {
        AccountingScope::All => Allocation::find().all(&txn).await?,
        AccountingScope::Vendor(vendor_id) => {
            Allocation::find()
                .filter(allocation::Column::VendorId.eq(vendor_id.as_str()))
                .all(&txn)
                .await?
        }
        AccountingScope::Agent(agent_id) => {
            Allocation::find()
                .filter(allocation::Column::AgentId.eq(agent_id.as_str()))
                .all(&txn)
                .await?
        }
    };

    if allocations.is_empty() {
        txn.commit().await?;
        return Ok(summarize(&[], &[], &[]));
    }

    let ids: Vec<i64> = allocations.iter().map(|a| a.id).collect();
    let transactions = PointTransaction::find()
        .filter(point_transaction::Column::AllocationId.is_in(ids.clone()))
        .all(&txn)
        .await?;
    let charges = Charge::find()
        .filter(charge::Column::AllocationId.is_in(ids))
        .all(&txn)
        .await?;
    txn.commit().await?;

    Ok(summarize(&allocations, &transactions, &charges))
}

/// Computes an [`AccountingSummary`] from loaded rows.
#[must_use]
pub fn summarize(
    allocations: &[allocation::Model],
    transactions: &[point_transaction::Model],
    charges: &[charge::Model],
) -> AccountingSummary {
    let total_points_allocated: i64 = allocations.iter().map(|a| a.allocated_points).sum();

    let deductions = transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Deduction);
    let (total_points_used, total_amount_covered) = deductions
        .fold((0_i64, 0.0_f64), |(points, amount), t| {
            (points + t.points_used, amount + t.amount_covered)
        });

    let total_amount_charged: f64 = charges
        .iter()
        .filter(|c| c.charge_status == ChargeStatus::Completed)
        .map(|c| c.amount_charged)
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let collection_rate = if total_points_used == 0 {
        0.0
    } else {
        total_amount_charged / total_points_used as f64
    };

    AccountingSummary {
        allocation_count: allocations.len(),
        total_points_allocated,
        total_points_used,
        points_remaining: total_points_allocated - total_points_used,
        total_amount_covered,
        total_amount_charged,
        collection_rate,
        utilization_percent: calculate_utilization(total_points_used, total_points_allocated),
        pending_charge_count: count_status(charges, ChargeStatus::Pending),
        failed_charge_count: count_status(charges, ChargeStatus::Failed),
    }
}

fn count_status(charges: &[charge::Model], status: ChargeStatus) -> usize {
    charges.iter().filter(|c| c.charge_status == status).count()
}

/// Loads every deduction and charge and reconciles them.
///
/// Mismatches are logged and returned; nothing is corrected.
pub async fn reconcile(db: &DatabaseConnection, tolerance: f64) -> Result<ReconciliationReport> {
    let txn = db.begin().await?;
    let transactions = PointTransaction::find()
        .filter(point_transaction::Column::TransactionType.eq(TransactionType::Deduction))
        .all(&txn)
        .await?;
    let charges = Charge::find()
        .filter(charge::Column::ChargeStatus.eq(ChargeStatus::Completed))
        .all(&txn)
        .await?;
    txn.commit().await?;

    let report = reconcile_records(&transactions, &charges, tolerance);
    if !report.balanced {
        warn!(
            difference = report.difference,
            mismatched_allocations = report.mismatches.len(),
            "reconciliation found unsettled spend"
        );
    }
    Ok(report)
}

/// Compares deduction `amount_covered` with completed `amount_charged`, overall and
/// per allocation.
#[must_use]
pub fn reconcile_records(
    transactions: &[point_transaction::Model],
    charges: &[charge::Model],
    tolerance: f64,
) -> ReconciliationReport {
    // allocation id -> (covered, charged)
    let mut per_allocation: BTreeMap<i64, (f64, f64)> = BTreeMap::new();

    for t in transactions
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Deduction)
    {
        per_allocation.entry(t.allocation_id).or_default().0 += t.amount_covered;
    }
    for c in charges
        .iter()
        .filter(|c| c.charge_status == ChargeStatus::Completed)
    {
        per_allocation.entry(c.allocation_id).or_default().1 += c.amount_charged;
    }

    let total_amount_covered: f64 = per_allocation.values().map(|(covered, _)| covered).sum();
    let total_amount_charged: f64 = per_allocation.values().map(|(_, charged)| charged).sum();
    let difference = total_amount_covered - total_amount_charged;

    let mismatches: Vec<AllocationReconciliation> = per_allocation
        .into_iter()
        .filter(|(_, (covered, charged))| (covered - charged).abs() > tolerance)
        .map(|(allocation_id, (covered, charged))| AllocationReconciliation {
            allocation_id,
            amount_covered: covered,
            amount_charged: charged,
            difference: covered - charged,
        })
        .collect();

    ReconciliationReport {
        total_amount_covered,
        total_amount_charged,
        difference,
        tolerance,
        balanced: difference.abs() <= tolerance && mismatches.is_empty(),
        mismatches,
    }
}

/// Builds the wallet view for an agent as of `today`.
pub async fn agent_wallet(
    db: &DatabaseConnection,
    agent_id: &str,
    today: NaiveDate,
) -> Result<AgentWallet> {
    let allocations = list_allocations_for_agent(db, agent_id).await?;
    Ok(build_wallet(agent_id, allocations, today))
}

/// Pure part of [`agent_wallet`].
#[must_use]
pub fn build_wallet(
    agent_id: &str,
    allocations: Vec<allocation::Model>,
    today: NaiveDate,
) -> AgentWallet {
    let mut wallet = AgentWallet {
        agent_id: agent_id.to_string(),
        entries: Vec::with_capacity(allocations.len()),
        total_allocated: 0,
        total_used: 0,
        total_remaining: 0,
        spendable_points: 0,
    };

    for allocation in allocations {
        let status = display_status(&allocation, today);
        wallet.total_allocated += allocation.allocated_points;
        wallet.total_used += allocation.used_points;
        wallet.total_remaining += allocation.remaining_points;
        if status == DisplayStatus::Active {
            wallet.spendable_points += allocation.remaining_points;
        }
        wallet.entries.push(WalletEntry {
            utilization_percent: calculate_utilization(
                allocation.used_points,
                allocation.allocated_points,
            ),
            display_status: status,
            allocation,
        });
    }

    wallet
}

/// Percentage of `allocated` that has been `used`; zero when nothing was allocated.
#[must_use]
pub fn calculate_utilization(used: i64, allocated: i64) -> f64 {
    if allocated == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let percent = (used as f64 / allocated as f64) * 100.0;
    percent
}

/// Generates a progress bar string for visual representation.
///
/// Creates a text-based progress bar like: `[████████░░] 80.0%`
#[must_use]
pub fn format_progress_bar(progress_percent: f64, bar_length: Option<usize>) -> String {
    let length = bar_length.unwrap_or(10);
    let clamped_progress = progress_percent.clamp(0.0, 100.0);

    // clamped_progress is in [0, 100] and length is small, so the result fits in usize.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let filled = ((clamped_progress / 100.0) * length as f64).round() as usize;
    let empty = length.saturating_sub(filled);

    let filled_str = "█".repeat(filled);
    let empty_str = "░".repeat(empty);

    format!("[{filled_str}{empty_str}] {progress_percent:.1}%")
}

/// Formats a ledger entry's points with its sign: grants `+`, deductions `-`.
#[must_use]
pub fn format_signed_points(transaction: &point_transaction::Model) -> String {
    match transaction.transaction_type {
        TransactionType::Allocation => format!("+{} pts", transaction.points_used),
        TransactionType::Deduction => format!("-{} pts", transaction.points_used),
    }
}

/// One-line summary of a ledger entry.
#[must_use]
pub fn format_transaction_summary(transaction: &point_transaction::Model) -> String {
    format!(
        "{} (${:.2}) | {} | {}",
        format_signed_points(transaction),
        transaction.amount_covered,
        transaction.transaction_type,
        transaction.description
    )
}

/// Plain-text statement for one allocation: header, usage bar and ledger lines.
#[must_use]
pub fn format_allocation_statement(
    allocation: &allocation::Model,
    transactions: &[point_transaction::Model],
    today: NaiveDate,
) -> String {
    use std::fmt::Write;

    let utilization = calculate_utilization(allocation.used_points, allocation.allocated_points);
    let mut statement = format!(
        "Allocation #{} - {} → {} ({})\nStatus: {} | {} to {}\nUsed {} of {} pts, {} remaining\n{}\n",
        allocation.id,
        allocation.vendor_id,
        allocation.agent_id,
        allocation.allocation_period,
        display_status(allocation, today),
        allocation.start_date,
        allocation.end_date,
        allocation.used_points,
        allocation.allocated_points,
        allocation.remaining_points,
        format_progress_bar(utilization, None)
    );

    if transactions.is_empty() {
        statement.push_str("No ledger entries\n");
    }
    for transaction in transactions {
        // Writing to a String cannot fail
        let _ = writeln!(
            statement,
            "  {} {}",
            transaction.created_at.format("%Y-%m-%d"),
            format_transaction_summary(transaction)
        );
    }

    statement
}
