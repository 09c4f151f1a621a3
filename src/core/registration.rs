//! Registration engine - Capacity accounting and enrollment records.
//!
//! Seats are claimed with a conditional `UPDATE` on the seminar's counters
//! (`enrolled_count + held_count < capacity`) inside the same transaction that inserts the
//! registration, so two concurrent enrollments can never both take the last seat. The
//! progress counters on a registration are a cache of its attendance rows; only the check-in
//! state machine writes them, and [`reconcile_progress`] rebuilds them from attendance.

use crate::{
    config::program::ProgramSettings,
    context::SeminarContext,
    core::{begin_write, catalog, retry_on_conflict},
    entities::{
        Attendance, Registration, RegistrationStatus, Seminar, SeminarStatus, Waitlist,
        WaitlistStatus, attendance, registration, seminar, waitlist,
    },
    errors::{Error, Result},
    events::SeminarEvent,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Where an enrollment's seat comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeatSource {
    /// A free seat not reserved by anyone
    Open,
    /// A seat reserved by a notified waitlist entry
    Held,
}

/// Enrolls a participant in a seminar.
///
/// The seat check and the insert are atomic. A cancelled registration of the same user in the
/// same seminar is reactivated instead of creating a second row. A lost race on a uniqueness
/// constraint is retried once.
///
/// # Errors
/// * `NotFound` - the seminar does not exist
/// * `SeminarNotOpen` - the seminar is completed or cancelled
/// * `AlreadyEnrolled` - the user already holds a seat in this seminar
/// * `CapacityExceeded` - no free seat; route the participant to the waitlist
#[instrument(skip(ctx))]
pub async fn enroll(
    ctx: &SeminarContext,
    seminar_id: i64,
    user_id: Option<i64>,
    order_id: i64,
) -> Result<registration::Model> {
    retry_on_conflict("enroll", move || async move {
        let txn = begin_write(&ctx.database).await?;
        let registration = enroll_in_txn(
            &txn,
            &ctx.settings,
            seminar_id,
            user_id,
            order_id,
            ctx.now(),
            SeatSource::Open,
        )
        .await?;
        txn.commit().await?;

        info!(
            "Registration {} created for seminar {} (order {})",
            registration.id, seminar_id, order_id
        );
        ctx.events.publish(created_event(&registration));
        Ok(registration)
    })
    .await
}

/// Enrollment steps shared by [`enroll`] and waitlist conversion. Runs inside the caller's
/// transaction and does not publish events.
pub(crate) async fn enroll_in_txn<C>(
    db: &C,
    settings: &ProgramSettings,
    seminar_id: i64,
    user_id: Option<i64>,
    order_id: i64,
    now: DateTime<Utc>,
    source: SeatSource,
) -> Result<registration::Model>
where
    C: ConnectionTrait,
{
    let seminar = catalog::require_seminar(db, seminar_id).await?;
    if !seminar.status.is_open() {
        return Err(not_open(&seminar));
    }

    let previous = match user_id {
        Some(user_id) => find_for_user(db, seminar_id, user_id).await?,
        None => None,
    };
    if let Some(existing) = &previous {
        if existing.status.holds_seat() {
            return Err(Error::AlreadyEnrolled {
                seminar_id,
                user_id: existing.user_id.unwrap_or_default(),
            });
        }
    }

    claim_seat(db, &seminar, source).await?;

    let registration = if let Some(cancelled) = previous {
        let status = if cancelled.sessions_completed >= settings.completion_threshold {
            RegistrationStatus::Completed
        } else {
            RegistrationStatus::Active
        };
        let mut active_model: registration::ActiveModel = cancelled.into();
        active_model.status = Set(status);
        active_model.order_id = Set(order_id);
        active_model.updated_at = Set(now);
        active_model.update(db).await?
    } else {
        registration::ActiveModel {
            seminar_id: Set(seminar_id),
            user_id: Set(user_id),
            order_id: Set(order_id),
            status: Set(RegistrationStatus::Active),
            code: Set(generate_code(seminar.year)),
            sessions_completed: Set(0),
            sessions_remaining: Set(settings.total_sessions),
            makeup_used: Set(false),
            scan_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?
    };

    Ok(registration)
}

/// Takes one seat on the seminar's counters, or explains why none is available.
async fn claim_seat<C>(db: &C, seminar: &seminar::Model, source: SeatSource) -> Result<()>
where
    C: ConnectionTrait,
{
    let update = Seminar::update_many()
        .col_expr(
            seminar::Column::EnrolledCount,
            Expr::col(seminar::Column::EnrolledCount).add(1),
        )
        .filter(seminar::Column::Id.eq(seminar.id))
        .filter(seminar::Column::Status.is_in([SeminarStatus::Upcoming, SeminarStatus::Active]));

    let update = match source {
        SeatSource::Open => update.filter(
            Expr::expr(
                Expr::col(seminar::Column::EnrolledCount).add(Expr::col(seminar::Column::HeldCount)),
            )
            .lt(Expr::col(seminar::Column::Capacity)),
        ),
        SeatSource::Held => update
            .col_expr(
                seminar::Column::HeldCount,
                Expr::col(seminar::Column::HeldCount).sub(1),
            )
            .filter(seminar::Column::HeldCount.gt(0)),
    };

    let result = update.exec(db).await?;
    if result.rows_affected == 1 {
        debug!("Claimed a {:?} seat in seminar {}", source, seminar.id);
        return Ok(());
    }

    // Re-read to report the precise reason
    let current = catalog::require_seminar(db, seminar.id).await?;
    if current.status.is_open() {
        Err(Error::CapacityExceeded {
            seminar_id: current.id,
            capacity: current.capacity,
        })
    } else {
        Err(not_open(&current))
    }
}

/// Gives a seat back to the seminar.
async fn release_seat<C>(db: &C, seminar_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    Seminar::update_many()
        .col_expr(
            seminar::Column::EnrolledCount,
            Expr::col(seminar::Column::EnrolledCount).sub(1),
        )
        .filter(seminar::Column::Id.eq(seminar_id))
        .filter(seminar::Column::EnrolledCount.gt(0))
        .exec(db)
        .await?;
    Ok(())
}

/// Cancels a registration and frees its seat.
///
/// Attendance rows and ledger entries are kept. The `registration_cancelled` event tells the
/// waitlist flow that a seat became available.
#[instrument(skip(ctx))]
pub async fn cancel(ctx: &SeminarContext, registration_id: i64) -> Result<registration::Model> {
    let txn = begin_write(&ctx.database).await?;

    let registration = require_registration(&txn, registration_id).await?;
    if registration.status == RegistrationStatus::Cancelled {
        return Err(Error::RegistrationNotActive {
            registration_id,
            status: registration.status.as_str().to_string(),
        });
    }
    let seminar_id = registration.seminar_id;

    let mut active_model: registration::ActiveModel = registration.into();
    active_model.status = Set(RegistrationStatus::Cancelled);
    active_model.updated_at = Set(ctx.now());
    let cancelled = active_model.update(&txn).await?;

    release_seat(&txn, seminar_id).await?;
    txn.commit().await?;

    info!("Registration {} cancelled, seat freed in seminar {}", registration_id, seminar_id);
    ctx.events.publish(SeminarEvent::RegistrationCancelled {
        registration_id,
        seminar_id,
        user_id: cancelled.user_id,
    });
    Ok(cancelled)
}

/// Counts registrations in `active` or `completed` status.
pub async fn get_enrollment_count<C>(db: &C, seminar_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::SeminarId.eq(seminar_id))
        .filter(
            registration::Column::Status
                .is_in([RegistrationStatus::Active, RegistrationStatus::Completed]),
        )
        .count(db)
        .await
        .map_err(Into::into)
}

/// Seats neither taken by a registration nor held for a notified waitlist entry.
pub async fn available_spots<C>(db: &C, seminar_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let seminar = catalog::require_seminar(db, seminar_id).await?;
    let enrolled = i64::try_from(get_enrollment_count(db, seminar_id).await?).unwrap_or(i64::MAX);
    let free = i64::from(seminar.capacity) - enrolled - i64::from(seminar.held_count);
    Ok(free.max(0))
}

/// Whether the seminar has no seat left.
pub async fn is_full<C>(db: &C, seminar_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(available_spots(db, seminar_id).await? == 0)
}

/// Advances a registration's progress counters by `delta` attended sessions.
///
/// Only the check-in state machine calls this, inside its transaction. The registration
/// flips to `completed` once the completion threshold is reached.
pub(crate) async fn record_session_progress<C>(
    db: &C,
    settings: &ProgramSettings,
    registration_id: i64,
    delta: i32,
    now: DateTime<Utc>,
) -> Result<registration::Model>
where
    C: ConnectionTrait,
{
    Registration::update_many()
        .col_expr(
            registration::Column::SessionsCompleted,
            Expr::col(registration::Column::SessionsCompleted).add(delta),
        )
        .filter(registration::Column::Id.eq(registration_id))
        .exec(db)
        .await?;

    let registration = require_registration(db, registration_id).await?;
    let completed = registration.sessions_completed;
    apply_progress(db, settings, registration, completed, None, now).await
}

/// Rebuilds a registration's progress counters and makeup flag from its attendance rows.
pub async fn reconcile_progress<C>(
    db: &C,
    settings: &ProgramSettings,
    registration_id: i64,
) -> Result<registration::Model>
where
    C: ConnectionTrait,
{
    let registration = require_registration(db, registration_id).await?;
    let rows = Attendance::find()
        .filter(attendance::Column::RegistrationId.eq(registration_id))
        .all(db)
        .await?;

    let completed = i32::try_from(rows.len()).unwrap_or(i32::MAX);
    let makeup_used = rows.iter().any(|row| row.is_makeup);
    if completed != registration.sessions_completed {
        info!(
            "Registration {} progress drifted: cached {}, attendance {}",
            registration_id, registration.sessions_completed, completed
        );
    }
    apply_progress(db, settings, registration, completed, Some(makeup_used), Utc::now()).await
}

async fn apply_progress<C>(
    db: &C,
    settings: &ProgramSettings,
    registration: registration::Model,
    completed: i32,
    makeup_used: Option<bool>,
    now: DateTime<Utc>,
) -> Result<registration::Model>
where
    C: ConnectionTrait,
{
    let remaining = (settings.total_sessions - completed).max(0);
    let status = if registration.status == RegistrationStatus::Active
        && completed >= settings.completion_threshold
    {
        info!("Registration {} completed the program", registration.id);
        RegistrationStatus::Completed
    } else {
        registration.status
    };

    let mut active_model: registration::ActiveModel = registration.into();
    active_model.sessions_completed = Set(completed);
    active_model.sessions_remaining = Set(remaining);
    active_model.status = Set(status);
    if let Some(makeup_used) = makeup_used {
        active_model.makeup_used = Set(makeup_used);
    }
    active_model.updated_at = Set(now);
    active_model.update(db).await.map_err(Into::into)
}

/// Rebuilds a seminar's seat counters from its registrations and notified waitlist entries.
pub async fn reconcile_enrollment_count<C>(db: &C, seminar_id: i64) -> Result<seminar::Model>
where
    C: ConnectionTrait,
{
    let seminar = catalog::require_seminar(db, seminar_id).await?;
    let enrolled = get_enrollment_count(db, seminar_id).await?;
    let held = Waitlist::find()
        .filter(waitlist::Column::SeminarId.eq(seminar_id))
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Notified))
        .count(db)
        .await?;

    let enrolled = i32::try_from(enrolled).unwrap_or(i32::MAX);
    let held = i32::try_from(held).unwrap_or(i32::MAX);
    if enrolled != seminar.enrolled_count || held != seminar.held_count {
        info!(
            "Seminar {} counters drifted: enrolled {} -> {}, held {} -> {}",
            seminar_id, seminar.enrolled_count, enrolled, seminar.held_count, held
        );
    }

    let mut active_model: seminar::ActiveModel = seminar.into();
    active_model.enrolled_count = Set(enrolled);
    active_model.held_count = Set(held);
    active_model.update(db).await.map_err(Into::into)
}

/// Attaches a user to a guest registration.
#[instrument(skip(ctx))]
pub async fn assign_user(
    ctx: &SeminarContext,
    registration_id: i64,
    user_id: i64,
) -> Result<registration::Model> {
    let db = &ctx.database;
    let registration = require_registration(db, registration_id).await?;
    if registration.user_id.is_some() {
        return Err(Error::Validation {
            message: format!("Registration {registration_id} already has a user"),
        });
    }
    if let Some(existing) = find_for_user(db, registration.seminar_id, user_id).await? {
        return Err(Error::AlreadyEnrolled {
            seminar_id: existing.seminar_id,
            user_id,
        });
    }

    let mut active_model: registration::ActiveModel = registration.into();
    active_model.user_id = Set(Some(user_id));
    active_model.updated_at = Set(ctx.now());
    let updated = active_model.update(db).await?;
    info!("Registration {} assigned to user {}", registration_id, user_id);
    Ok(updated)
}

/// Finds a registration by id, returning None if it does not exist.
pub async fn get_registration<C>(db: &C, registration_id: i64) -> Result<Option<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find_by_id(registration_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a registration by id, failing with `NotFound` if it does not exist.
pub async fn require_registration<C>(db: &C, registration_id: i64) -> Result<registration::Model>
where
    C: ConnectionTrait,
{
    get_registration(db, registration_id)
        .await?
        .ok_or(Error::NotFound {
            entity: "registration",
            id: registration_id,
        })
}

/// Resolves a scanned or typed check-in code. Lookup ignores case and surrounding spaces.
pub async fn find_by_code<C>(db: &C, code: &str) -> Result<Option<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::Code.eq(normalize_code(code)))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists a seminar's registrations in enrollment order.
pub async fn list_registrations_for_seminar<C>(
    db: &C,
    seminar_id: i64,
) -> Result<Vec<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::SeminarId.eq(seminar_id))
        .order_by_asc(registration::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists a user's registrations, newest first.
pub async fn list_registrations_for_user<C>(db: &C, user_id: i64) -> Result<Vec<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::UserId.eq(user_id))
        .order_by_desc(registration::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn find_for_user<C>(
    db: &C,
    seminar_id: i64,
    user_id: i64,
) -> Result<Option<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::SeminarId.eq(seminar_id))
        .filter(registration::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

pub(crate) fn created_event(registration: &registration::Model) -> SeminarEvent {
    SeminarEvent::RegistrationCreated {
        registration_id: registration.id,
        seminar_id: registration.seminar_id,
        user_id: registration.user_id,
        order_id: registration.order_id,
    }
}

fn not_open(seminar: &seminar::Model) -> Error {
    Error::SeminarNotOpen {
        seminar_id: seminar.id,
        status: seminar.status.as_str().to_string(),
    }
}

/// Builds a scannable code such as `CE2026-4F1A9C03B2`.
fn generate_code(year: i32) -> String {
    let token = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CE{year}-{}", &token[..10])
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
