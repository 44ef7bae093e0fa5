//! Charge settlement - Real-money settlement of spent points.
//!
//! A charge is created `pending` and settled exactly once, to `completed` or
//! `failed`. Settlement is a conditional update on `charge_status = 'pending'`, so
//! repeating a terminal transition is a no-op and crossing from one terminal
//! state to the other is rejected.

use crate::{
    core::{
        allocation::{require_allocation, validate_points},
        transaction::get_transaction_by_id,
    },
    entities::{Charge, ChargeStatus, TransactionType, charge},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// Input for [`create_charge`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewCharge {
    /// Allocation whose points are being settled
    pub allocation_id: i64,
    /// Deduction this charge settles, if known
    #[serde(default)]
    pub transaction_id: Option<i64>,
    /// Points being settled
    pub points: i64,
    /// Real-currency amount in dollars
    pub amount: f64,
    /// Payment processor reference
    pub processor_ref: String,
}

/// Creates a pending charge.
///
/// When `transaction_id` is given it must name a deduction on the same allocation,
/// and the points charged against that deduction (excluding failed charges) may not
/// exceed the points it spent.
#[instrument(skip(db, new), fields(allocation_id = new.allocation_id))]
pub async fn create_charge(db: &DatabaseConnection, new: NewCharge) -> Result<charge::Model> {
    validate_points(new.points)?;
    if !new.amount.is_finite() || new.amount < 0.0 {
        return Err(Error::InvalidAmount { amount: new.amount });
    }
    let processor_ref = new.processor_ref.trim().to_string();
    if processor_ref.is_empty() {
        return Err(Error::validation("Processor reference cannot be empty"));
    }

    let txn = db.begin().await?;
    require_allocation(&txn, new.allocation_id).await?;

    if let Some(transaction_id) = new.transaction_id {
        let entry = get_transaction_by_id(&txn, transaction_id)
            .await?
            .ok_or(Error::TransactionNotFound { id: transaction_id })?;

        if entry.allocation_id != new.allocation_id {
            return Err(Error::validation(format!(
                "Transaction {transaction_id} belongs to allocation {}, not {}",
                entry.allocation_id, new.allocation_id
            )));
        }
        if entry.transaction_type != TransactionType::Deduction {
            return Err(Error::validation(format!(
                "Transaction {transaction_id} is not a deduction"
            )));
        }

        let already_charged: i64 = Charge::find()
            .filter(charge::Column::TransactionId.eq(transaction_id))
            .filter(charge::Column::ChargeStatus.ne(ChargeStatus::Failed))
            .all(&txn)
            .await?
            .iter()
            .map(|existing| existing.points_charged)
            .sum();

        if new.points > entry.points_used - already_charged {
            return Err(Error::validation(format!(
                "Transaction {transaction_id} spent {} points, {already_charged} already charged",
                entry.points_used
            )));
        }
    }

    let model = charge::ActiveModel {
        allocation_id: Set(new.allocation_id),
        transaction_id: Set(new.transaction_id),
        points_charged: Set(new.points),
        amount_charged: Set(new.amount),
        charge_status: Set(ChargeStatus::Pending),
        processor_ref: Set(processor_ref),
        failure_reason: Set(None),
        created_at: Set(Utc::now()),
        settled_at: Set(None),
        ..Default::default()
    };
    let result = model.insert(&txn).await?;
    txn.commit().await?;

    info!(
        charge_id = result.id,
        points = result.points_charged,
        amount = result.amount_charged,
        "charge created"
    );
    Ok(result)
}

/// Retrieves a specific charge by its unique ID.
pub async fn get_charge_by_id<C>(db: &C, charge_id: i64) -> Result<Option<charge::Model>>
where
    C: ConnectionTrait,
{
    Charge::find_by_id(charge_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves every charge against an allocation, oldest first.
pub async fn get_charges_for_allocation<C>(
    db: &C,
    allocation_id: i64,
) -> Result<Vec<charge::Model>>
where
    C: ConnectionTrait,
{
    Charge::find()
        .filter(charge::Column::AllocationId.eq(allocation_id))
        .order_by_asc(charge::Column::CreatedAt)
        .order_by_asc(charge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Marks a pending charge as completed. Completing a completed charge is a no-op.
pub async fn mark_completed<C>(db: &C, charge_id: i64) -> Result<charge::Model>
where
    C: ConnectionTrait,
{
    settle(db, charge_id, ChargeStatus::Completed, None).await
}

/// Marks a pending charge as failed. Failing a failed charge is a no-op and keeps
/// the original reason.
pub async fn mark_failed<C>(db: &C, charge_id: i64, reason: &str) -> Result<charge::Model>
where
    C: ConnectionTrait,
{
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::validation("Failure reason cannot be empty"));
    }
    settle(db, charge_id, ChargeStatus::Failed, Some(reason.to_string())).await
}

#[instrument(skip(db, reason))]
async fn settle<C>(
    db: &C,
    charge_id: i64,
    target: ChargeStatus,
    reason: Option<String>,
) -> Result<charge::Model>
where
    C: ConnectionTrait,
{
    let update = Charge::update_many()
        .col_expr(charge::Column::ChargeStatus, Expr::value(target))
        .col_expr(charge::Column::FailureReason, Expr::value(reason))
        .col_expr(charge::Column::SettledAt, Expr::value(Some(Utc::now())))
        .filter(charge::Column::Id.eq(charge_id))
        .filter(charge::Column::ChargeStatus.eq(ChargeStatus::Pending))
        .exec(db)
        .await?;

    let current = get_charge_by_id(db, charge_id)
        .await?
        .ok_or(Error::ChargeNotFound { id: charge_id })?;

    if update.rows_affected > 0 {
        info!(charge_id, status = %target, "charge settled");
        return Ok(current);
    }

    if current.charge_status == target {
        debug!(charge_id, status = %target, "charge already settled");
        return Ok(current);
    }

    warn!(charge_id, from = %current.charge_status, to = %target, "charge transition rejected");
    Err(Error::InvalidChargeTransition {
        id: charge_id,
        from: current.charge_status,
        to: target,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::allocation::MAX_POINTS;
    use crate::core::transaction::record_allocation_grant;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn new_charge(allocation_id: i64, points: i64) -> NewCharge {
        NewCharge {
            allocation_id,
            transaction_id: None,
            points,
            amount: points as f64 / 10.0,
            processor_ref: "cs_test_123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_charge_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = create_charge(&db, new_charge(1, 0)).await;
        assert!(matches!(result, Err(Error::InvalidPoints { points: 0 })));

        let mut bad_amount = new_charge(1, 10);
        bad_amount.amount = f64::INFINITY;
        let result = create_charge(&db, bad_amount).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let mut no_ref = new_charge(1, 10);
        no_ref.processor_ref = "  ".to_string();
        let result = create_charge(&db, no_ref).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_charge_is_pending() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let charge = create_charge(&db, new_charge(allocation.id, 200)).await?;
        assert_eq!(charge.charge_status, ChargeStatus::Pending);
        assert_eq!(charge.points_charged, 200);
        assert_eq!(charge.amount_charged, 20.0);
        assert_eq!(charge.settled_at, None);

        let missing = create_charge(&db, new_charge(999, 10)).await;
        assert!(matches!(missing, Err(Error::AllocationNotFound { id: 999 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_mark_completed_is_idempotent() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;
        let charge = create_charge(&db, new_charge(allocation.id, 200)).await?;

        let completed = mark_completed(&db, charge.id).await?;
        assert_eq!(completed.charge_status, ChargeStatus::Completed);
        assert!(completed.settled_at.is_some());

        let again = mark_completed(&db, charge.id).await?;
        assert_eq!(again, completed);

        Ok(())
    }

    #[tokio::test]
    async fn test_mark_failed_records_reason() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;
        let charge = create_charge(&db, new_charge(allocation.id, 50)).await?;

        let failed = mark_failed(&db, charge.id, "card declined").await?;
        assert_eq!(failed.charge_status, ChargeStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));

        // Repeating keeps the first reason
        let again = mark_failed(&db, charge.id, "other reason").await?;
        assert_eq!(again.failure_reason.as_deref(), Some("card declined"));

        let blank = mark_failed(&db, charge.id, " ").await;
        assert!(matches!(blank, Err(Error::Validation { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_states_cannot_be_left() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;

        let completed = create_charge(&db, new_charge(allocation.id, 10)).await?;
        mark_completed(&db, completed.id).await?;
        let result = mark_failed(&db, completed.id, "late decline").await;
        assert!(matches!(
            result,
            Err(Error::InvalidChargeTransition {
                from: ChargeStatus::Completed,
                to: ChargeStatus::Failed,
                ..
            })
        ));

        let failed = create_charge(&db, new_charge(allocation.id, 10)).await?;
        mark_failed(&db, failed.id, "declined").await?;
        let result = mark_completed(&db, failed.id).await;
        assert!(matches!(
            result,
            Err(Error::InvalidChargeTransition {
                from: ChargeStatus::Failed,
                to: ChargeStatus::Completed,
                ..
            })
        ));

        let still_failed = get_charge_by_id(&db, failed.id).await?.unwrap();
        assert_eq!(still_failed.charge_status, ChargeStatus::Failed);

        Ok(())
    }

    #[tokio::test]
    async fn test_settle_unknown_charge() -> Result<()> {
        let db = setup_test_db().await?;
        let result = mark_completed(&db, 404).await;
        assert!(matches!(result, Err(Error::ChargeNotFound { id: 404 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_charge_linked_to_deduction() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;
        let deduction = create_test_deduction(&db, allocation.id, 200).await?;

        let mut linked = new_charge(allocation.id, 150);
        linked.transaction_id = Some(deduction.id);
        let first = create_charge(&db, linked.clone()).await?;
        assert_eq!(first.transaction_id, Some(deduction.id));

        // 150 + 100 would exceed the 200 points spent
        linked.points = 100;
        let result = create_charge(&db, linked.clone()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        // Once the first charge fails its points are free again
        mark_failed(&db, first.id, "declined").await?;
        linked.points = 200;
        create_charge(&db, linked).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_huge_charge_against_partly_charged_deduction() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;
        let deduction = create_test_deduction(&db, allocation.id, 200).await?;

        let mut linked = new_charge(allocation.id, 150);
        linked.transaction_id = Some(deduction.id);
        create_charge(&db, linked.clone()).await?;

        linked.points = i64::MAX;
        let result = create_charge(&db, linked.clone()).await;
        assert!(matches!(result, Err(Error::InvalidPoints { points: i64::MAX })));

        linked.points = MAX_POINTS;
        let result = create_charge(&db, linked).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let charges = get_charges_for_allocation(&db, allocation.id).await?;
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].points_charged, 150);

        Ok(())
    }

    #[tokio::test]
    async fn test_charge_rejects_mismatched_transaction() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_allocation(&db, 1000).await?;
        let b = create_test_allocation(&db, 1000).await?;
        let deduction_in_b = create_test_deduction(&db, b.id, 100).await?;
        let grant_in_a = record_allocation_grant(&db, a.id, 1000, 100.0).await?;

        let mut wrong_allocation = new_charge(a.id, 10);
        wrong_allocation.transaction_id = Some(deduction_in_b.id);
        let result = create_charge(&db, wrong_allocation).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let mut grant = new_charge(a.id, 10);
        grant.transaction_id = Some(grant_in_a.id);
        let result = create_charge(&db, grant).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let mut missing = new_charge(a.id, 10);
        missing.transaction_id = Some(999);
        let result = create_charge(&db, missing).await;
        assert!(matches!(result, Err(Error::TransactionNotFound { id: 999 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_get_charges_for_allocation() -> Result<()> {
        let (db, allocation) = setup_with_allocation(1000).await?;
        let first = create_charge(&db, new_charge(allocation.id, 10)).await?;
        let second = create_charge(&db, new_charge(allocation.id, 20)).await?;

        let charges = get_charges_for_allocation(&db, allocation.id).await?;
        assert_eq!(charges, vec![first, second]);
        Ok(())
    }
}
