//! Credit ledger - Append-only store of CE credit transactions.
//!
//! The ledger is the single source of truth for a user's credits. Entries are only ever
//! inserted; totals are computed with a SQL `SUM` on every read so no cached value can drift.
//! Corrections are expressed as new, negative entries.

use crate::{
    context::SeminarContext,
    core::begin_write,
    entities::{Attendance, CreditLedger, LedgerType, Registration, credit_ledger},
    errors::{Error, Result},
    events::SeminarEvent,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use tracing::{info, instrument};

/// Appends a credit entry for a user.
///
/// # Arguments
/// * `user_id` - User receiving (or losing) the credits
/// * `amount` - Signed credit amount, never zero
/// * `event_ref` - Optional session or event the entry refers to
/// * `transaction_type` - Kind of transaction
/// * `note` - Free-text note for the audit trail
pub async fn award<C>(
    db: &C,
    user_id: i64,
    amount: i32,
    event_ref: Option<i64>,
    transaction_type: LedgerType,
    note: String,
) -> Result<credit_ledger::Model>
where
    C: ConnectionTrait,
{
    award_at(db, user_id, amount, event_ref, transaction_type, note, Utc::now()).await
}

/// Same as [`award`] with an explicit timestamp, used by callers that run on an injected clock.
pub(crate) async fn award_at<C>(
    db: &C,
    user_id: i64,
    amount: i32,
    event_ref: Option<i64>,
    transaction_type: LedgerType,
    note: String,
    recorded_at: DateTime<Utc>,
) -> Result<credit_ledger::Model>
where
    C: ConnectionTrait,
{
    if amount == 0 {
        return Err(Error::Validation {
            message: "Credit amount cannot be zero".to_string(),
        });
    }

    let entry = credit_ledger::ActiveModel {
        user_id: Set(user_id),
        event_ref: Set(event_ref),
        credits: Set(amount),
        transaction_type: Set(transaction_type),
        note: Set(note),
        created_at: Set(recorded_at),
        ..Default::default()
    };

    entry.insert(db).await.map_err(Into::into)
}

/// Returns a user's credit total: the sum of all their ledger entries.
pub async fn get_total<C>(db: &C, user_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let total: Option<Option<i64>> = CreditLedger::find()
        .select_only()
        .column_as(credit_ledger::Column::Credits.sum(), "total")
        .filter(credit_ledger::Column::UserId.eq(user_id))
        .into_tuple()
        .one(db)
        .await?;

    Ok(total.flatten().unwrap_or(0))
}

/// Returns a user's ledger entries, newest first.
pub async fn get_ledger<C>(db: &C, user_id: i64) -> Result<Vec<credit_ledger::Model>>
where
    C: ConnectionTrait,
{
    CreditLedger::find()
        .filter(credit_ledger::Column::UserId.eq(user_id))
        .order_by_desc(credit_ledger::Column::CreatedAt)
        .order_by_desc(credit_ledger::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Administrator grant or deduction of credits.
///
/// Positive adjustments are announced with a `credits_awarded` event.
#[instrument(skip(ctx, note))]
pub async fn manual_adjustment(
    ctx: &SeminarContext,
    user_id: i64,
    amount: i32,
    note: String,
) -> Result<credit_ledger::Model> {
    let entry = award_at(
        &ctx.database,
        user_id,
        amount,
        None,
        LedgerType::ManualAdjustment,
        note,
        ctx.now(),
    )
    .await?;
    info!("Manual credit adjustment of {} for user {}", amount, user_id);

    if amount > 0 {
        ctx.events.publish(SeminarEvent::CreditsAwarded {
            user_id,
            registration_id: None,
            session_id: None,
            credits: amount,
            ledger_entry_id: entry.id,
        });
    }
    Ok(entry)
}

/// Reverses the credit granted for one attendance by appending a negative `correction`
/// entry. The attendance row itself is immutable and stays in place.
#[instrument(skip(ctx, note))]
pub async fn compensate_attendance(
    ctx: &SeminarContext,
    registration_id: i64,
    session_id: i64,
    note: String,
) -> Result<credit_ledger::Model> {
    let txn = begin_write(&ctx.database).await?;

    let attendance = Attendance::find_by_id((registration_id, session_id))
        .one(&txn)
        .await?
        .ok_or(Error::NotFound {
            entity: "attendance",
            id: registration_id,
        })?;
    let registration = Registration::find_by_id(registration_id)
        .one(&txn)
        .await?
        .ok_or(Error::NotFound {
            entity: "registration",
            id: registration_id,
        })?;
    let user_id = registration.user_id.ok_or(Error::UserNotAssigned { registration_id })?;

    let already_corrected = CreditLedger::find()
        .filter(credit_ledger::Column::UserId.eq(user_id))
        .filter(credit_ledger::Column::EventRef.eq(session_id))
        .filter(credit_ledger::Column::TransactionType.eq(LedgerType::Correction))
        .one(&txn)
        .await?;
    if already_corrected.is_some() {
        return Err(Error::Validation {
            message: format!(
                "Attendance of registration {registration_id} at session {session_id} was already corrected"
            ),
        });
    }

    let entry = award_at(
        &txn,
        user_id,
        -attendance.credits_awarded,
        Some(session_id),
        LedgerType::Correction,
        note,
        ctx.now(),
    )
    .await?;
    txn.commit().await?;

    info!(
        "Reversed {} credit(s) for registration {} at session {}",
        attendance.credits_awarded, registration_id, session_id
    );
    Ok(entry)
}
