//! Transaction recorder - Appends grants and deductions to an allocation's ledger.
//!
//! Deductions are the only way an allocation's balance moves. Each one is applied as
//! a conditional update (`remaining_points >= points` on an active, in-date
//! allocation) and the ledger row is inserted in the same database transaction, so
//! two concurrent deductions can never both spend the same points. Ledger rows are
//! never updated or deleted.

use crate::{
    core::allocation::{display_status, remaining_of, require_allocation, validate_points},
    entities::{
        Allocation, AllocationStatus, PointTransaction, TransactionType, allocation,
        point_transaction,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Result of replaying an allocation's ledger against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationAudit {
    /// Allocation that was audited
    pub allocation_id: i64,
    /// Stored cap
    pub allocated_points: i64,
    /// Stored used points
    pub used_points: i64,
    /// Stored remaining points
    pub remaining_points: i64,
    /// Sum of deduction entries in the ledger
    pub ledger_deducted: i64,
    /// Sum of grant entries in the ledger
    pub ledger_granted: i64,
    /// Number of deduction entries
    pub deduction_count: usize,
    /// Whether the stored balance agrees with the ledger
    pub consistent: bool,
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

/// Spends points from an allocation and appends a deduction entry.
///
/// # Errors
/// * [`Error::InvalidPoints`] / [`Error::InvalidAmount`] for bad input
/// * [`Error::AllocationNotFound`] if the allocation does not exist
/// * [`Error::AllocationUnavailable`] if it is suspended, pending or expired
/// * [`Error::InsufficientPoints`] if fewer than `points` remain
#[instrument(skip(db, description))]
pub async fn record_deduction(
    db: &DatabaseConnection,
    allocation_id: i64,
    points: i64,
    amount_covered: f64,
    description: String,
) -> Result<point_transaction::Model> {
    validate_points(points)?;
    validate_amount(amount_covered)?;

    let now = Utc::now();
    let today = now.date_naive();
    let txn = db.begin().await?;

    // used += points and remaining -= points, only while enough remains
    let update = Allocation::update_many()
        .col_expr(
            allocation::Column::UsedPoints,
            Expr::col(allocation::Column::UsedPoints).add(points),
        )
        .col_expr(
            allocation::Column::RemainingPoints,
            Expr::col(allocation::Column::RemainingPoints).sub(points),
        )
        .col_expr(allocation::Column::UpdatedAt, Expr::value(now))
        .filter(allocation::Column::Id.eq(allocation_id))
        .filter(allocation::Column::Status.eq(AllocationStatus::Active))
        .filter(allocation::Column::StartDate.lte(today))
        .filter(allocation::Column::EndDate.gte(today))
        .filter(allocation::Column::RemainingPoints.gte(points))
        .exec(&txn)
        .await?;

    if update.rows_affected == 0 {
        let allocation = require_allocation(&txn, allocation_id).await?;
        let status = display_status(&allocation, today);
        let err = if status.is_spendable() {
            Error::InsufficientPoints {
                remaining: remaining_of(&allocation),
                requested: points,
            }
        } else {
            Error::AllocationUnavailable {
                id: allocation_id,
                status,
            }
        };
        warn!(allocation_id, points, %err, "deduction rejected");
        return Err(err);
    }

    let entry = point_transaction::ActiveModel {
        allocation_id: Set(allocation_id),
        transaction_type: Set(TransactionType::Deduction),
        points_used: Set(points),
        amount_covered: Set(amount_covered),
        description: Set(description.trim().to_string()),
        created_at: Set(now),
        ..Default::default()
    };
    let result = entry.insert(&txn).await?;

    txn.commit().await?;

    info!(
        allocation_id,
        transaction_id = result.id,
        points,
        amount_covered,
        "deduction recorded"
    );
    Ok(result)
}

/// Appends a grant entry for an allocation.
///
/// Grants are historical records only; the allocation's cap and balance are not
/// changed.
#[instrument(skip(db))]
pub async fn record_allocation_grant<C>(
    db: &C,
    allocation_id: i64,
    points: i64,
    amount_covered: f64,
) -> Result<point_transaction::Model>
where
    C: ConnectionTrait,
{
    validate_points(points)?;
    validate_amount(amount_covered)?;

    let allocation = require_allocation(db, allocation_id).await?;

    let entry = point_transaction::ActiveModel {
        allocation_id: Set(allocation_id),
        transaction_type: Set(TransactionType::Allocation),
        points_used: Set(points),
        amount_covered: Set(amount_covered),
        description: Set(format!(
            "Granted {points} points for {}",
            allocation.allocation_period
        )),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let result = entry.insert(db).await?;

    info!(allocation_id, transaction_id = result.id, points, "grant recorded");
    Ok(result)
}

/// Retrieves an allocation's ledger in the order it was written.
pub async fn get_transactions_for_allocation<C>(
    db: &C,
    allocation_id: i64,
) -> Result<Vec<point_transaction::Model>>
where
    C: ConnectionTrait,
{
    PointTransaction::find()
        .filter(point_transaction::Column::AllocationId.eq(allocation_id))
        .order_by_asc(point_transaction::Column::CreatedAt)
        .order_by_asc(point_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a specific transaction by its unique ID.
pub async fn get_transaction_by_id<C>(
    db: &C,
    transaction_id: i64,
) -> Result<Option<point_transaction::Model>>
where
    C: ConnectionTrait,
{
    PointTransaction::find_by_id(transaction_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Replays an allocation's ledger and compares it with the stored balance.
///
/// Both reads happen inside one database transaction so a concurrent deduction
/// cannot land between them. Disagreement is reported, never repaired.
pub async fn audit_allocation(db: &DatabaseConnection, allocation_id: i64) -> Result<AllocationAudit> {
    let txn = db.begin().await?;
    let allocation = require_allocation(&txn, allocation_id).await?;
    let entries = get_transactions_for_allocation(&txn, allocation_id).await?;
    txn.commit().await?;

    let audit = audit_entries(&allocation, &entries);
    if !audit.consistent {
        warn!(
            allocation_id,
            used_points = audit.used_points,
            ledger_deducted = audit.ledger_deducted,
            "allocation balance disagrees with its ledger"
        );
    }
    Ok(audit)
}

/// Pure comparison behind [`audit_allocation`].
#[must_use]
pub fn audit_entries(
    allocation: &allocation::Model,
    entries: &[point_transaction::Model],
) -> AllocationAudit {
    let (deductions, grants): (Vec<_>, Vec<_>) = entries
        .iter()
        .filter(|entry| entry.allocation_id == allocation.id)
        .partition(|entry| entry.transaction_type == TransactionType::Deduction);

    let ledger_deducted: i64 = deductions.iter().map(|entry| entry.points_used).sum();
    let ledger_granted: i64 = grants.iter().map(|entry| entry.points_used).sum();

    let consistent = ledger_deducted == allocation.used_points
        && allocation.remaining_points == remaining_of(allocation)
        && allocation.remaining_points >= 0;

    AllocationAudit {
        allocation_id: allocation.id,
        allocated_points: allocation.allocated_points,
        used_points: allocation.used_points,
        remaining_points: allocation.remaining_points,
        ledger_deducted,
        ledger_granted,
        deduction_count: deductions.len(),
        consistent,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    #![allow(clippy::panic)]
    use super::*;
    use crate::core::allocation::{DisplayStatus, create_allocation, set_allocation_status};
    use crate::test_utils::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_record_deduction_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = record_deduction(&db, 1, 0, 1.0, "test".to_string()).await;
        assert!(matches!(result, Err(Error::InvalidPoints { points: 0 })));

        let result = record_deduction(&db, 1, -10, 1.0, "test".to_string()).await;
        assert!(matches!(result, Err(Error::InvalidPoints { points: -10 })));

        let result = record_deduction(&db, 1, 10, f64::NAN, "test".to_string()).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let result = record_deduction(&db, 1, 10, -1.0, "test".to_string()).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: -1.0 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_updates_balance() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let entry =
            record_deduction(&db, allocation.id, 300, 30.0, " Listing photos ".to_string())
                .await?;
        assert_eq!(entry.transaction_type, TransactionType::Deduction);
        assert_eq!(entry.points_used, 300);
        assert_eq!(entry.amount_covered, 30.0);
        assert_eq!(entry.description, "Listing photos");

        let updated = require_allocation(&db, allocation.id).await?;
        assert_eq!(updated.used_points, 300);
        assert_eq!(updated.remaining_points, 700);
        assert_eq!(
            updated.remaining_points,
            updated.allocated_points - updated.used_points
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_insufficient_points() -> Result<()> {
        let (db, allocation) = setup_with_allocation(100).await?;

        record_deduction(&db, allocation.id, 60, 6.0, "first".to_string()).await?;
        let result = record_deduction(&db, allocation.id, 50, 5.0, "second".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientPoints {
                remaining: 40,
                requested: 50
            })
        ));

        // The rejected deduction left no trace
        let updated = require_allocation(&db, allocation.id).await?;
        assert_eq!(updated.used_points, 60);
        assert_eq!(get_transactions_for_allocation(&db, allocation.id).await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_spending_entire_cap_depletes_allocation() -> Result<()> {
        let (db, allocation) = setup_with_allocation(500).await?;

        record_deduction(&db, allocation.id, 500, 50.0, "everything".to_string()).await?;
        let updated = require_allocation(&db, allocation.id).await?;
        assert_eq!(updated.remaining_points, 0);
        assert_eq!(
            display_status(&updated, Utc::now().date_naive()),
            DisplayStatus::Depleted
        );

        let result = record_deduction(&db, allocation.id, 1, 0.1, "one more".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientPoints {
                remaining: 0,
                requested: 1
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_deductions_cannot_double_spend() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let (first, second) = tokio::join!(
            record_deduction(&db, allocation.id, 700, 70.0, "session a".to_string()),
            record_deduction(&db, allocation.id, 700, 70.0, "session b".to_string()),
        );

        let outcomes = [first, second];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(outcomes.iter().any(|r| matches!(
            r,
            Err(Error::InsufficientPoints {
                remaining: 300,
                requested: 700
            })
        )));

        let updated = require_allocation(&db, allocation.id).await?;
        assert_eq!(updated.remaining_points, 300);
        assert_eq!(updated.used_points, 700);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_deductions_on_pooled_connections() -> Result<()> {
        let (db, path) = setup_file_db(8).await?;
        // `DatabaseConnection` is not `Clone` when sea-orm's `mock` feature is on.
        let db = std::sync::Arc::new(db);

        for round in 0..5 {
            let allocation = create_test_allocation(&db, 1000).await?;

            let handles: Vec<_> = (0..8)
                .map(|task| {
                    let db = db.clone();
                    tokio::spawn(async move {
                        record_deduction(
                            &db,
                            allocation.id,
                            200,
                            20.0,
                            format!("round {round} task {task}"),
                        )
                        .await
                    })
                })
                .collect();

            let mut successes = 0;
            let mut insufficient = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => successes += 1,
                    Err(Error::InsufficientPoints { requested: 200, .. }) => insufficient += 1,
                    Err(other) => panic!("unexpected deduction error: {other}"),
                }
            }
            assert_eq!(successes, 5);
            assert_eq!(insufficient, 3);

            let updated = require_allocation(&*db, allocation.id).await?;
            assert_eq!(updated.used_points, 1000);
            assert_eq!(updated.remaining_points, 0);
            let entries = get_transactions_for_allocation(&*db, allocation.id).await?;
            assert_eq!(entries.iter().map(|e| e.points_used).sum::<i64>(), 1000);
        }

        std::sync::Arc::try_unwrap(db)
            .ok()
            .expect("all tasks joined")
            .close()
            .await?;
        remove_file_db(&path);
        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_unknown_allocation() -> Result<()> {
        let db = setup_test_db().await?;
        let result = record_deduction(&db, 42, 10, 1.0, "nothing".to_string()).await;
        assert!(matches!(result, Err(Error::AllocationNotFound { id: 42 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_on_suspended_allocation() -> Result<()> {
        let (db, allocation) = setup_with_allocation(100).await?;
        set_allocation_status(&db, allocation.id, AllocationStatus::Suspended).await?;

        let result = record_deduction(&db, allocation.id, 10, 1.0, "blocked".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::AllocationUnavailable {
                status: DisplayStatus::Suspended,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_after_end_date() -> Result<()> {
        let db = setup_test_db().await?;
        let today = Utc::now().date_naive();
        let mut new = test_new_allocation("vendor-1", "agent-1", 100);
        new.start_date = today - Duration::days(30);
        new.end_date = today - Duration::days(1);
        let allocation = create_allocation(&db, new).await?;

        let result = record_deduction(&db, allocation.id, 10, 1.0, "late".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::AllocationUnavailable {
                status: DisplayStatus::Expired,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_deduction_before_start_date() -> Result<()> {
        let db = setup_test_db().await?;
        let today = Utc::now().date_naive();
        let mut new = test_new_allocation("vendor-1", "agent-1", 100);
        new.start_date = today + Duration::days(1);
        new.end_date = today + Duration::days(30);
        let allocation = create_allocation(&db, new).await?;

        let result = record_deduction(&db, allocation.id, 10, 1.0, "early".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::AllocationUnavailable {
                status: DisplayStatus::Pending,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_does_not_change_balance() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let grant = record_allocation_grant(&db, allocation.id, 1000, 100.0).await?;
        assert_eq!(grant.transaction_type, TransactionType::Allocation);
        assert_eq!(grant.description, "Granted 1000 points for 2024-Q3");

        let updated = require_allocation(&db, allocation.id).await?;
        assert_eq!(updated, allocation);

        let missing = record_allocation_grant(&db, 999, 10, 1.0).await;
        assert!(matches!(missing, Err(Error::AllocationNotFound { id: 999 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_transactions_returned_in_creation_order() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let grant = record_allocation_grant(&db, allocation.id, 1000, 100.0).await?;
        let first = create_test_deduction(&db, allocation.id, 100).await?;
        let second = create_test_deduction(&db, allocation.id, 200).await?;

        let entries = get_transactions_for_allocation(&db, allocation.id).await?;
        assert_eq!(entries, vec![grant, first.clone(), second]);

        // Earlier entries are untouched by later writes
        let reread = get_transaction_by_id(&db, first.id).await?.unwrap();
        assert_eq!(reread, first);

        assert!(get_transaction_by_id(&db, 999).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_transactions_scoped_to_allocation() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_allocation(&db, 100).await?;
        let b = create_test_allocation(&db, 100).await?;

        let in_a = create_test_deduction(&db, a.id, 10).await?;
        let in_b = create_test_deduction(&db, b.id, 20).await?;

        assert_eq!(get_transactions_for_allocation(&db, a.id).await?, vec![in_a]);
        assert_eq!(get_transactions_for_allocation(&db, b.id).await?, vec![in_b]);
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_matches_ledger_after_activity() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        record_allocation_grant(&db, allocation.id, 1000, 100.0).await?;
        create_test_deduction(&db, allocation.id, 150).await?;
        create_test_deduction(&db, allocation.id, 250).await?;
        let _ = record_deduction(&db, allocation.id, 900, 90.0, "too much".to_string()).await;

        let audit = audit_allocation(&db, allocation.id).await?;
        assert!(audit.consistent);
        assert_eq!(audit.ledger_deducted, 400);
        assert_eq!(audit.used_points, 400);
        assert_eq!(audit.ledger_granted, 1000);
        assert_eq!(audit.remaining_points, 600);
        assert_eq!(audit.ledger_granted - audit.ledger_deducted, audit.remaining_points);
        assert_eq!(audit.deduction_count, 2);

        Ok(())
    }

    #[test]
    fn test_audit_entries_flags_drift() {
        let now = Utc::now();
        let allocation = allocation::Model {
            id: 7,
            vendor_id: "vendor".to_string(),
            agent_id: "agent".to_string(),
            allocation_period: "2024-Q3".to_string(),
            allocated_points: 100,
            used_points: 50,
            remaining_points: 50,
            status: AllocationStatus::Active,
            start_date: now.date_naive(),
            end_date: now.date_naive(),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let entry = point_transaction::Model {
            id: 1,
            allocation_id: 7,
            transaction_type: TransactionType::Deduction,
            points_used: 40,
            amount_covered: 4.0,
            description: "partial".to_string(),
            created_at: now,
        };

        let audit = audit_entries(&allocation, &[entry]);
        assert!(!audit.consistent);
        assert_eq!(audit.ledger_deducted, 40);
        assert_eq!(audit.used_points, 50);
    }
}
