//! Report generation business logic.
//!
//! Read-only aggregations over seminars, attendance, and the credit ledger. All functions
//! return structured data; formatting for a terminal or UI is left to the caller.

use crate::{
    config::program::ProgramSettings,
    core::{attendance, catalog, registration},
    entities::{
        Attendance, CreditLedger, Registration, RegistrationStatus, Waitlist, WaitlistStatus,
        attendance as attendance_entity, credit_ledger, registration as registration_entity,
        seminar, waitlist,
    },
    errors::Result,
};
use sea_orm::{QueryOrder, QuerySelect, prelude::*};

/// Enrollment, completion, and revenue figures for one seminar.
#[derive(Debug, Clone)]
pub struct SeminarSummary {
    /// The seminar being reported on
    pub seminar: seminar::Model,
    /// Registrations holding a seat (active or completed)
    pub enrolled: u64,
    /// Seat capacity
    pub capacity: i32,
    /// Registrations that completed the program
    pub completed: u64,
    /// Cancelled registrations
    pub cancelled: u64,
    /// Entries still waiting for a seat
    pub waiting: u64,
    /// Tuition times non-cancelled registrations
    pub revenue: f64,
    /// Mean attendance rate (0-100) over sessions that have any check-in
    pub average_attendance_rate: f64,
}

/// A user's credit total, as ranked by [`top_participants`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantCredits {
    /// User id
    pub user_id: i64,
    /// Sum of the user's ledger entries
    pub total_credits: i64,
}

/// Builds the summary for a seminar.
///
/// # Errors
/// Returns `NotFound` if the seminar does not exist.
pub async fn seminar_summary<C>(db: &C, seminar_id: i64) -> Result<SeminarSummary>
where
    C: ConnectionTrait,
{
    let seminar = catalog::require_seminar(db, seminar_id).await?;

    let enrolled = registration::get_enrollment_count(db, seminar_id).await?;
    let completed = count_with_status(db, seminar_id, RegistrationStatus::Completed).await?;
    let cancelled = count_with_status(db, seminar_id, RegistrationStatus::Cancelled).await?;
    let waiting = Waitlist::find()
        .filter(waitlist::Column::SeminarId.eq(seminar_id))
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Waiting))
        .count(db)
        .await?;

    // Enrollment counts are far below 2^52, so the conversion is exact
    #[allow(clippy::cast_precision_loss)]
    let revenue = seminar.tuition * enrolled as f64;

    let mut rates = Vec::new();
    for session in catalog::list_sessions(db, seminar_id).await? {
        let stats = attendance::session_stats(db, session.id).await?;
        if stats.checked_in > 0 {
            rates.push(stats.attendance_rate);
        }
    }

    Ok(SeminarSummary {
        capacity: seminar.capacity,
        seminar,
        enrolled,
        completed,
        cancelled,
        waiting,
        revenue,
        average_attendance_rate: mean(&rates),
    })
}

async fn count_with_status<C>(db: &C, seminar_id: i64, status: RegistrationStatus) -> Result<u64>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration_entity::Column::SeminarId.eq(seminar_id))
        .filter(registration_entity::Column::Status.eq(status))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Ranks users by their ledger totals, highest first.
pub async fn top_participants<C>(db: &C, limit: u64) -> Result<Vec<ParticipantCredits>>
where
    C: ConnectionTrait,
{
    let rows: Vec<(i64, Option<i64>)> = CreditLedger::find()
        .select_only()
        .column(credit_ledger::Column::UserId)
        .column_as(credit_ledger::Column::Credits.sum(), "total")
        .group_by(credit_ledger::Column::UserId)
        .order_by_desc(credit_ledger::Column::Credits.sum())
        .order_by_asc(credit_ledger::Column::UserId)
        .limit(limit)
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, total)| ParticipantCredits {
            user_id,
            total_credits: total.unwrap_or(0),
        })
        .collect())
}

/// Whether a registration has attended enough sessions for a certificate.
///
/// Cancelled registrations are never eligible, whatever they attended before cancelling.
pub async fn certificate_eligible<C>(
    db: &C,
    settings: &ProgramSettings,
    registration_id: i64,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let registration = registration::require_registration(db, registration_id).await?;
    if registration.status == RegistrationStatus::Cancelled {
        return Ok(false);
    }

    let attended = Attendance::find()
        .filter(attendance_entity::Column::RegistrationId.eq(registration_id))
        .count(db)
        .await?;
    Ok(attended >= u64::try_from(settings.completion_threshold).unwrap_or(u64::MAX))
}

/// Formats a seminar summary as a single log-friendly line.
#[must_use]
pub fn format_seminar_summary(summary: &SeminarSummary) -> String {
    format!(
        "{} ({}): {}/{} enrolled, {} completed, {} cancelled, {} waiting, revenue {:.2}, attendance {:.1}%",
        summary.seminar.title,
        summary.seminar.status.as_str(),
        summary.enrolled,
        summary.capacity,
        summary.completed,
        summary.cancelled,
        summary.waiting,
        summary.revenue,
        summary.average_attendance_rate
    )
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    values.iter().sum::<f64>() / count
}
