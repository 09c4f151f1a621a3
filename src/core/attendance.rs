//! Attendance / check-in state machine.
//!
//! Each (registration, session) pair is either not checked in or checked in, and the second
//! state is terminal. A successful check-in writes three things in one transaction: the
//! attendance row, the registration's progress counters, and a ledger entry. The pair's
//! uniqueness is the attendance table's primary key, so two concurrent scans of the same code
//! cannot both succeed; the loser is retried once and then reports `AlreadyCheckedIn`.

use crate::{
    context::SeminarContext,
    core::{begin_write, catalog, ledger, registration, retry_on_conflict},
    entities::{
        Attendance, CheckInMethod, LedgerType, Registration, RegistrationStatus, attendance,
        credit_ledger, registration as registration_entity,
    },
    errors::{Error, Result},
    events::SeminarEvent,
};
use sea_orm::{DatabaseTransaction, QueryOrder, Set, prelude::*, sea_query::Expr};
use tracing::{info, instrument, warn};

/// Caller-supplied details of a check-in
#[derive(Debug, Clone, Default)]
pub struct CheckInOptions {
    /// Use the registration's single makeup allowance for this attendance
    pub is_makeup: bool,
    /// How the code was captured; manual check-ins always record `Manual`
    pub method: CheckInMethod,
    /// Free-text notes from the check-in desk
    pub notes: Option<String>,
}

/// Everything the scanning UI needs to render a successful check-in
#[derive(Debug, Clone)]
pub struct CheckInResult {
    /// The attendance row written
    pub attendance: attendance::Model,
    /// The registration with updated progress
    pub registration: registration_entity::Model,
    /// The ledger entry written
    pub ledger_entry: credit_ledger::Model,
    /// The user's credit total after this award
    pub total_credits: i64,
}

/// Attendance numbers for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    /// Session reported on
    pub session_id: i64,
    /// Registrations holding a seat in the seminar
    pub total_registrants: u64,
    /// Of those, how many checked in
    pub checked_in: u64,
    /// Of those, how many did not
    pub not_checked_in: u64,
    /// Percentage checked in (0-100)
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Copy)]
enum Lookup<'a> {
    Code(&'a str),
    Registration(i64),
}

/// Checks in the registration identified by a scanned or typed code.
///
/// # Errors
/// * `CodeNotFound` - no registration has this code
/// * `RegistrationNotActive` - the registration is cancelled or already completed
/// * `NotFound` - the session does not exist
/// * `SessionMismatch` - the session belongs to another seminar
/// * `AlreadyCheckedIn` - informational; nothing was written except the scan counter
/// * `MakeupAlreadyUsed` - a makeup was requested but the allowance is spent
/// * `UserNotAssigned` - a guest registration has no user to credit yet
#[instrument(skip(ctx, options))]
pub async fn check_in(
    ctx: &SeminarContext,
    lookup_code: &str,
    session_id: i64,
    options: CheckInOptions,
) -> Result<CheckInResult> {
    retry_on_conflict("check_in", move || {
        let options = options.clone();
        async move { check_in_once(ctx, Lookup::Code(lookup_code), session_id, options).await }
    })
    .await
}

/// Administrator check-in without a code scan. Follows the same rules as [`check_in`]
/// from the registration status onward and always records the `manual` method.
#[instrument(skip(ctx, options))]
pub async fn manual_check_in(
    ctx: &SeminarContext,
    registration_id: i64,
    session_id: i64,
    options: CheckInOptions,
) -> Result<CheckInResult> {
    let options = CheckInOptions {
        method: CheckInMethod::Manual,
        ..options
    };
    retry_on_conflict("manual_check_in", move || {
        let options = options.clone();
        async move {
            check_in_once(ctx, Lookup::Registration(registration_id), session_id, options).await
        }
    })
    .await
}

async fn check_in_once(
    ctx: &SeminarContext,
    lookup: Lookup<'_>,
    session_id: i64,
    options: CheckInOptions,
) -> Result<CheckInResult> {
    let txn = begin_write(&ctx.database).await?;
    let now = ctx.now();

    let registration = match lookup {
        Lookup::Code(code) => registration::find_by_code(&txn, code)
            .await?
            .ok_or_else(|| Error::CodeNotFound {
                code: code.to_string(),
            })?,
        Lookup::Registration(id) => registration::require_registration(&txn, id).await?,
    };

    if registration.status != RegistrationStatus::Active {
        return Err(Error::RegistrationNotActive {
            registration_id: registration.id,
            status: registration.status.as_str().to_string(),
        });
    }

    let session = catalog::require_session(&txn, session_id).await?;
    if session.seminar_id != registration.seminar_id {
        return Err(Error::SessionMismatch {
            session_id,
            seminar_id: registration.seminar_id,
        });
    }

    if matches!(lookup, Lookup::Code(_)) {
        Registration::update_many()
            .col_expr(
                registration_entity::Column::ScanCount,
                Expr::col(registration_entity::Column::ScanCount).add(1),
            )
            .filter(registration_entity::Column::Id.eq(registration.id))
            .exec(&txn)
            .await?;
    }

    let existing = Attendance::find_by_id((registration.id, session_id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        info!(
            "Registration {} already checked in to session {}",
            registration.id, session_id
        );
        return keep_scan_and_fail(
            txn,
            Error::AlreadyCheckedIn {
                registration_id: registration.id,
                session_id,
            },
        )
        .await;
    }

    if options.is_makeup && registration.makeup_used {
        return keep_scan_and_fail(
            txn,
            Error::MakeupAlreadyUsed {
                registration_id: registration.id,
            },
        )
        .await;
    }

    let Some(user_id) = registration.user_id else {
        warn!("Guest registration {} cannot earn credits yet", registration.id);
        return keep_scan_and_fail(
            txn,
            Error::UserNotAssigned {
                registration_id: registration.id,
            },
        )
        .await;
    };

    let credits = ctx.settings.credits_per_session;
    let attendance = attendance::ActiveModel {
        registration_id: Set(registration.id),
        session_id: Set(session_id),
        checked_in_at: Set(now),
        credits_awarded: Set(credits),
        is_makeup: Set(options.is_makeup),
        method: Set(options.method),
        notes: Set(options.notes),
    }
    .insert(&txn)
    .await?;

    if options.is_makeup {
        // Conditional so two concurrent makeup check-ins cannot both spend the allowance
        let result = Registration::update_many()
            .col_expr(registration_entity::Column::MakeupUsed, Expr::value(true))
            .filter(registration_entity::Column::Id.eq(registration.id))
            .filter(registration_entity::Column::MakeupUsed.eq(false))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(Error::MakeupAlreadyUsed {
                registration_id: registration.id,
            });
        }
    }

    let updated =
        registration::record_session_progress(&txn, &ctx.settings, registration.id, 1, now).await?;

    let note = format!("Session {}: {}", session.sequence, session.topic);
    let ledger_entry = ledger::award_at(
        &txn,
        user_id,
        credits,
        Some(session_id),
        LedgerType::SessionAttendance,
        note,
        now,
    )
    .await?;

    txn.commit().await?;

    let total_credits = ledger::get_total(&ctx.database, user_id).await?;
    info!(
        "Registration {} checked in to session {} (+{} credits, makeup: {})",
        updated.id, session_id, credits, options.is_makeup
    );
    ctx.events.publish(SeminarEvent::CreditsAwarded {
        user_id,
        registration_id: Some(updated.id),
        session_id: Some(session_id),
        credits,
        ledger_entry_id: ledger_entry.id,
    });

    Ok(CheckInResult {
        attendance,
        registration: updated,
        ledger_entry,
        total_credits,
    })
}

/// Commits the scan counter bump, then reports the rejection.
async fn keep_scan_and_fail(txn: DatabaseTransaction, error: Error) -> Result<CheckInResult> {
    txn.commit().await?;
    Err(error)
}

/// Lists a registration's check-ins in the order they happened.
pub async fn list_attendance_for_registration<C>(
    db: &C,
    registration_id: i64,
) -> Result<Vec<attendance::Model>>
where
    C: ConnectionTrait,
{
    Attendance::find()
        .filter(attendance::Column::RegistrationId.eq(registration_id))
        .order_by_asc(attendance::Column::CheckedInAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Aggregates attendance for one session. Read-only.
pub async fn session_stats<C>(db: &C, session_id: i64) -> Result<SessionStats>
where
    C: ConnectionTrait,
{
    let session = catalog::require_session(db, session_id).await?;
    let seat_holders = [RegistrationStatus::Active, RegistrationStatus::Completed];

    let total_registrants = Registration::find()
        .filter(registration_entity::Column::SeminarId.eq(session.seminar_id))
        .filter(registration_entity::Column::Status.is_in(seat_holders))
        .count(db)
        .await?;

    let checked_in = Attendance::find()
        .inner_join(Registration)
        .filter(attendance::Column::SessionId.eq(session_id))
        .filter(registration_entity::Column::Status.is_in(seat_holders))
        .count(db)
        .await?;

    Ok(SessionStats {
        session_id,
        total_registrants,
        checked_in,
        not_checked_in: total_registrants.saturating_sub(checked_in),
        attendance_rate: percentage(checked_in, total_registrants),
    })
}

/// `part / whole` as a percentage, 0 when `whole` is 0.
#[must_use]
pub(crate) fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    // Counts are far below 2^52, so the conversion is exact
    #[allow(clippy::cast_precision_loss)]
    let rate = (part as f64 / whole as f64) * 100.0;
    rate
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::config::program::ProgramSettings;
    use crate::test_utils::*;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn test_check_in_awards_credit_and_progress() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;
        let mut events = ctx.events.subscribe();

        let result =
            check_in(&ctx, &enrolled.code, sessions[0].id, CheckInOptions::default()).await?;

        assert_eq!(result.attendance.credits_awarded, 2);
        assert_eq!(result.attendance.method, CheckInMethod::QrScan);
        assert!(!result.attendance.is_makeup);
        assert_eq!(result.registration.sessions_completed, 1);
        assert_eq!(result.registration.sessions_remaining, 9);
        assert_eq!(result.registration.scan_count, 1);
        assert_eq!(result.ledger_entry.credits, 2);
        assert_eq!(result.ledger_entry.event_ref, Some(sessions[0].id));
        assert_eq!(result.total_credits, 2);

        assert_eq!(
            events.try_recv().unwrap(),
            SeminarEvent::CreditsAwarded {
                user_id: 1,
                registration_id: Some(enrolled.id),
                session_id: Some(sessions[0].id),
                credits: 2,
                ledger_entry_id: result.ledger_entry.id,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_check_in_twice_is_idempotent() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        check_in(&ctx, &enrolled.code, sessions[0].id, CheckInOptions::default()).await?;
        let second =
            check_in(&ctx, &enrolled.code, sessions[0].id, CheckInOptions::default()).await;

        let err = second.unwrap_err();
        assert!(matches!(err, Error::AlreadyCheckedIn { .. }));
        assert!(err.is_informational());

        assert_eq!(ledger::get_total(&ctx.database, 1).await?, 2);
        assert_eq!(ledger::get_ledger(&ctx.database, 1).await?.len(), 1);
        assert_eq!(
            list_attendance_for_registration(&ctx.database, enrolled.id)
                .await?
                .len(),
            1
        );

        let current = registration::require_registration(&ctx.database, enrolled.id).await?;
        assert_eq!(current.sessions_completed, 1);
        assert_eq!(current.scan_count, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scans_award_once() -> Result<()> {
        let (ctx, _clock, _dir) = shared_test_context(8).await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            let code = enrolled.code.clone();
            let session_id = sessions[0].id;
            tasks.spawn(async move {
                check_in(&ctx, &code, session_id, CheckInOptions::default()).await
            });
        }

        let mut succeeded = 0;
        let mut duplicates = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => succeeded += 1,
                Err(Error::AlreadyCheckedIn { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(ledger::get_total(&ctx.database, 1).await?, 2);
        let registration = registration::require_registration(&ctx.database, enrolled.id).await?;
        assert_eq!(registration.sessions_completed, 1);
        assert_eq!(registration.scan_count, 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_check_in_rejections() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let (_other, other_sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        let unknown = check_in(&ctx, "CE2026-XXXXXXXXXX", sessions[0].id, CheckInOptions::default())
            .await;
        assert!(matches!(unknown, Err(Error::CodeNotFound { .. })));

        let mismatch = check_in(
            &ctx,
            &enrolled.code,
            other_sessions[0].id,
            CheckInOptions::default(),
        )
        .await;
        assert!(matches!(mismatch, Err(Error::SessionMismatch { .. })));

        let missing_session =
            check_in(&ctx, &enrolled.code, 9999, CheckInOptions::default()).await;
        assert!(matches!(
            missing_session,
            Err(Error::NotFound {
                entity: "session",
                ..
            })
        ));

        registration::cancel(&ctx, enrolled.id).await?;
        let cancelled =
            check_in(&ctx, &enrolled.code, sessions[0].id, CheckInOptions::default()).await;
        assert!(matches!(cancelled, Err(Error::RegistrationNotActive { .. })));

        assert_eq!(ledger::get_total(&ctx.database, 1).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_makeup_is_single_use() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;
        let makeup = CheckInOptions {
            is_makeup: true,
            notes: Some("Missed session 1".to_string()),
            ..CheckInOptions::default()
        };

        let first = check_in(&ctx, &enrolled.code, sessions[1].id, makeup.clone()).await?;
        assert!(first.attendance.is_makeup);
        assert!(first.registration.makeup_used);

        let second = check_in(&ctx, &enrolled.code, sessions[2].id, makeup).await;
        assert!(matches!(second, Err(Error::MakeupAlreadyUsed { .. })));

        // A regular check-in to the same session still works
        check_in(&ctx, &enrolled.code, sessions[2].id, CheckInOptions::default()).await?;

        let rows = list_attendance_for_registration(&ctx.database, enrolled.id).await?;
        assert_eq!(rows.iter().filter(|row| row.is_makeup).count(), 1);
        assert_eq!(ledger::get_total(&ctx.database, 1).await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_guest_registration_needs_user() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let guest = registration::enroll(&ctx, seminar.id, None, 1).await?;

        let result = check_in(&ctx, &guest.code, sessions[0].id, CheckInOptions::default()).await;
        assert!(matches!(result, Err(Error::UserNotAssigned { .. })));
        assert!(
            list_attendance_for_registration(&ctx.database, guest.id)
                .await?
                .is_empty()
        );

        registration::assign_user(&ctx, guest.id, 44).await?;
        let result =
            check_in(&ctx, &guest.code, sessions[0].id, CheckInOptions::default()).await?;
        assert_eq!(result.total_credits, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_tracks_every_check_in() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        for (k, session) in sessions.iter().enumerate() {
            let result =
                check_in(&ctx, &enrolled.code, session.id, CheckInOptions::default()).await?;
            let k = i32::try_from(k).unwrap() + 1;
            assert_eq!(result.registration.sessions_completed, k);
            assert_eq!(result.registration.sessions_remaining, (10 - k).max(0));
        }

        let finished = registration::require_registration(&ctx.database, enrolled.id).await?;
        assert_eq!(finished.status, RegistrationStatus::Completed);
        assert_eq!(finished.sessions_remaining, 0);
        assert_eq!(ledger::get_total(&ctx.database, 1).await?, 20);
        Ok(())
    }

    #[tokio::test]
    async fn test_lower_threshold_completes_early() -> Result<()> {
        let settings = ProgramSettings {
            completion_threshold: 8,
            ..ProgramSettings::default()
        };
        let (ctx, _clock) = test_context_with(settings).await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        for session in &sessions[..8] {
            check_in(&ctx, &enrolled.code, session.id, CheckInOptions::default()).await?;
        }
        let current = registration::require_registration(&ctx.database, enrolled.id).await?;
        assert_eq!(current.status, RegistrationStatus::Completed);
        assert_eq!(current.sessions_remaining, 2);

        let late = check_in(&ctx, &enrolled.code, sessions[8].id, CheckInOptions::default()).await;
        assert!(matches!(late, Err(Error::RegistrationNotActive { .. })));

        // Completed registrations still hold their seat
        assert_eq!(
            registration::get_enrollment_count(&ctx.database, seminar.id).await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_check_in_does_not_count_scans() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;

        let result = manual_check_in(
            &ctx,
            enrolled.id,
            sessions[0].id,
            CheckInOptions {
                notes: Some("Badge forgotten".to_string()),
                ..CheckInOptions::default()
            },
        )
        .await?;
        assert_eq!(result.attendance.method, CheckInMethod::Manual);
        assert_eq!(result.attendance.notes.as_deref(), Some("Badge forgotten"));
        assert_eq!(result.registration.scan_count, 0);

        let again =
            manual_check_in(&ctx, enrolled.id, sessions[0].id, CheckInOptions::default()).await;
        assert!(matches!(again, Err(Error::AlreadyCheckedIn { .. })));

        let missing = manual_check_in(&ctx, 404, sessions[0].id, CheckInOptions::default()).await;
        assert!(matches!(
            missing,
            Err(Error::NotFound {
                entity: "registration",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_session_stats() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let a = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;
        registration::enroll(&ctx, seminar.id, Some(2), 2).await?;
        registration::enroll(&ctx, seminar.id, Some(3), 3).await?;
        let d = registration::enroll(&ctx, seminar.id, Some(4), 4).await?;
        registration::cancel(&ctx, d.id).await?;

        check_in(&ctx, &a.code, sessions[0].id, CheckInOptions::default()).await?;

        let stats = session_stats(&ctx.database, sessions[0].id).await?;
        assert_eq!(stats.total_registrants, 3);
        assert_eq!(stats.checked_in, 1);
        assert_eq!(stats.not_checked_in, 2);
        assert!((stats.attendance_rate - 100.0 / 3.0).abs() < 1e-9);

        let empty = session_stats(&ctx.database, sessions[1].id).await?;
        assert_eq!(empty.checked_in, 0);
        assert_eq!(empty.attendance_rate, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_progress_rebuilds_cache() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let enrolled = registration::enroll(&ctx, seminar.id, Some(1), 1).await?;
        check_in(&ctx, &enrolled.code, sessions[0].id, CheckInOptions::default()).await?;
        let makeup = CheckInOptions {
            is_makeup: true,
            ..CheckInOptions::default()
        };
        check_in(&ctx, &enrolled.code, sessions[1].id, makeup).await?;

        // Corrupt the cached counters
        let mut active_model: registration_entity::ActiveModel =
            registration::require_registration(&ctx.database, enrolled.id)
                .await?
                .into();
        active_model.sessions_completed = Set(7);
        active_model.sessions_remaining = Set(3);
        active_model.makeup_used = Set(false);
        active_model.update(&ctx.database).await?;

        let repaired =
            registration::reconcile_progress(&ctx.database, &ctx.settings, enrolled.id).await?;
        assert_eq!(repaired.sessions_completed, 2);
        assert_eq!(repaired.sessions_remaining, 8);
        assert!(repaired.makeup_used);
        Ok(())
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(4, 4), 100.0);
    }
}
