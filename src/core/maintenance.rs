//! Scheduled maintenance
//!
//! Expires stale waitlist holds, emits session reminders, and flags missed sessions.
//! The binary runs [`run_maintenance`] on an interval; every step is idempotent so a run can
//! be repeated safely. Bookkeeping lives in the `system_state` table: the date of the last
//! reminder run, and one key per (registration, session) already flagged as missed.

use crate::{
    context::SeminarContext,
    core::{begin_write, catalog, waitlist},
    entities::{
        Attendance, Registration, RegistrationStatus, SystemState, registration, system_state,
    },
    errors::{Error, Result},
    events::SeminarEvent,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{Set, prelude::*};
use tracing::{info, instrument};

const LAST_REMINDER_RUN_KEY: &str = "last_reminder_run";

/// Outcome of one maintenance run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSummary {
    /// Date the run was evaluated for
    pub run_date: NaiveDate,
    /// Waitlist holds expired
    pub expired_holds: u64,
    /// Reminders emitted, or None if reminders already ran today
    pub reminders_sent: Option<u64>,
    /// Newly flagged missed sessions
    pub missed_flagged: u64,
}

/// Runs every maintenance step for the context clock's current date.
#[instrument(skip(ctx))]
pub async fn run_maintenance(ctx: &SeminarContext) -> Result<MaintenanceSummary> {
    let today = ctx.now().date_naive();

    let expired_holds = waitlist::expire_stale_holds(ctx).await?;
    let reminders_sent = send_session_reminders(ctx, today).await?;
    let missed_flagged = flag_missed_sessions(ctx, today).await?;

    Ok(MaintenanceSummary {
        run_date: today,
        expired_holds,
        reminders_sent,
        missed_flagged,
    })
}

/// Emits `session_reminder_due` for every active registration with a session
/// `reminder_days_before` days after `today`.
///
/// # Returns
/// * `Ok(Some(count))` - reminders were evaluated and `count` events emitted
/// * `Ok(None)` - reminders already ran for `today`
pub async fn send_session_reminders(
    ctx: &SeminarContext,
    today: NaiveDate,
) -> Result<Option<u64>> {
    let txn = begin_write(&ctx.database).await?;

    if get_last_reminder_run(&txn).await? == Some(today) {
        return Ok(None);
    }

    let target = ctx.settings.reminder_target(today)?;
    let mut events = Vec::new();
    for session in catalog::list_sessions_on(&txn, target).await? {
        for registration in active_registrations(&txn, session.seminar_id).await? {
            events.push(SeminarEvent::SessionReminderDue {
                registration_id: registration.id,
                user_id: registration.user_id,
                session_id: session.id,
                seminar_id: session.seminar_id,
                session_date: session.date,
            });
        }
    }

    set_state(
        &txn,
        LAST_REMINDER_RUN_KEY,
        today.format("%Y-%m-%d").to_string(),
        ctx.now(),
    )
    .await?;
    txn.commit().await?;

    let count = events.len() as u64;
    info!("Queued {} reminder(s) for sessions on {}", count, target);
    ctx.events.publish_all(events);
    Ok(Some(count))
}

/// Emits `missed_session` once for each active registration without attendance at a session
/// that took place before `today`.
///
/// Sessions before the registration was created are not counted as missed.
pub async fn flag_missed_sessions(ctx: &SeminarContext, today: NaiveDate) -> Result<u64> {
    let txn = begin_write(&ctx.database).await?;
    let now = ctx.now();

    let mut events = Vec::new();
    for session in catalog::list_sessions_before(&txn, today).await? {
        for registration in active_registrations(&txn, session.seminar_id).await? {
            if registration.created_at.date_naive() > session.date {
                continue;
            }
            let attended = Attendance::find_by_id((registration.id, session.id))
                .one(&txn)
                .await?
                .is_some();
            if attended {
                continue;
            }

            let key = missed_key(registration.id, session.id);
            if get_state(&txn, &key).await?.is_some() {
                continue;
            }
            set_state(&txn, &key, session.date.format("%Y-%m-%d").to_string(), now).await?;

            events.push(SeminarEvent::MissedSession {
                registration_id: registration.id,
                user_id: registration.user_id,
                session_id: session.id,
                seminar_id: session.seminar_id,
            });
        }
    }
    txn.commit().await?;

    let count = events.len() as u64;
    if count > 0 {
        info!("Flagged {} missed session(s)", count);
    }
    ctx.events.publish_all(events);
    Ok(count)
}

/// Retrieves the date reminders last ran for.
pub async fn get_last_reminder_run<C>(db: &C) -> Result<Option<NaiveDate>>
where
    C: ConnectionTrait,
{
    match get_state(db, LAST_REMINDER_RUN_KEY).await? {
        Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::Config {
                message: format!("Failed to parse last reminder run date: {e}"),
            }),
        None => Ok(None),
    }
}

/// Formats a maintenance summary for the log.
#[must_use]
pub fn format_maintenance_summary(summary: &MaintenanceSummary) -> String {
    let reminders = summary
        .reminders_sent
        .map_or_else(|| "already sent".to_string(), |count| count.to_string());
    format!(
        "Maintenance for {}: {} hold(s) expired, reminders {}, {} missed session(s) flagged",
        summary.run_date, summary.expired_holds, reminders, summary.missed_flagged
    )
}

async fn active_registrations<C>(db: &C, seminar_id: i64) -> Result<Vec<registration::Model>>
where
    C: ConnectionTrait,
{
    Registration::find()
        .filter(registration::Column::SeminarId.eq(seminar_id))
        .filter(registration::Column::Status.eq(RegistrationStatus::Active))
        .all(db)
        .await
        .map_err(Into::into)
}

fn missed_key(registration_id: i64, session_id: i64) -> String {
    format!("missed_notified:{registration_id}:{session_id}")
}

async fn get_state<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let state = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;
    Ok(state.map(|s| s.value))
}

async fn set_state<C>(db: &C, key: &str, value: String, now: DateTime<Utc>) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = SystemState::find()
        .filter(system_state::Column::Key.eq(key))
        .one(db)
        .await?;

    if let Some(state) = existing {
        let mut active_model: system_state::ActiveModel = state.into();
        active_model.value = Set(value);
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        system_state::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::attendance::{self, CheckInOptions};
    use crate::core::registration as enrollment;
    use crate::test_utils::*;
    use chrono::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_reminders_run_once_per_day() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let a = enrollment::enroll(&ctx, seminar.id, Some(1), 1).await?;
        let b = enrollment::enroll(&ctx, seminar.id, Some(2), 2).await?;
        enrollment::cancel(&ctx, b.id).await?;
        let mut events = ctx.events.subscribe();

        // First session is on 2026-01-10; reminders go out three days before
        let sent = send_session_reminders(&ctx, date(2026, 1, 7)).await?;
        assert_eq!(sent, Some(1));
        assert_eq!(
            events.try_recv().unwrap(),
            SeminarEvent::SessionReminderDue {
                registration_id: a.id,
                user_id: Some(1),
                session_id: sessions[0].id,
                seminar_id: seminar.id,
                session_date: date(2026, 1, 10),
            }
        );

        assert_eq!(send_session_reminders(&ctx, date(2026, 1, 7)).await?, None);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(
            get_last_reminder_run(&ctx.database).await?,
            Some(date(2026, 1, 7))
        );

        // A day with no session three days out
        assert_eq!(send_session_reminders(&ctx, date(2026, 1, 8)).await?, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_reminder_lead_is_reported() -> Result<()> {
        let settings = crate::config::program::ProgramSettings {
            reminder_days_before: i64::MAX,
            ..Default::default()
        };
        let (ctx, _clock) = test_context_with(settings).await?;
        create_seminar_with_sessions(&ctx, 5).await?;

        let result = send_session_reminders(&ctx, date(2026, 1, 7)).await;
        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(get_last_reminder_run(&ctx.database).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_missed_sessions_flagged_once() -> Result<()> {
        let (ctx, _clock) = test_context().await?;
        let (seminar, sessions) = create_seminar_with_sessions(&ctx, 5).await?;
        let a = enrollment::enroll(&ctx, seminar.id, Some(1), 1).await?;
        let b = enrollment::enroll(&ctx, seminar.id, Some(2), 2).await?;
        attendance::check_in(&ctx, &a.code, sessions[0].id, CheckInOptions::default()).await?;

        // The day after session 1: only b missed it
        let flagged = flag_missed_sessions(&ctx, date(2026, 1, 11)).await?;
        assert_eq!(flagged, 1);
        assert_eq!(flag_missed_sessions(&ctx, date(2026, 1, 11)).await?, 0);

        // After session 2 both missed it; b's first miss is not repeated
        let mut events = ctx.events.subscribe();
        assert_eq!(flag_missed_sessions(&ctx, date(2026, 1, 18)).await?, 2);
        let mut missed = Vec::new();
        while let Ok(SeminarEvent::MissedSession {
            registration_id,
            session_id,
            ..
        }) = events.try_recv()
        {
            missed.push((registration_id, session_id));
        }
        missed.sort_unstable();
        assert_eq!(
            missed,
            vec![(a.id, sessions[1].id), (b.id, sessions[1].id)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_run_maintenance_expires_holds() -> Result<()> {
        let (ctx, clock) = test_context().await?;
        let seminar = create_test_seminar(&ctx.database, 1).await?;
        let entry = waitlist::join(
            &ctx,
            seminar.id,
            waitlist::WaitlistContact {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                phone: None,
                user_id: None,
            },
        )
        .await?;
        waitlist::notify_next(&ctx, seminar.id).await?;

        clock.advance(Duration::hours(72));
        let summary = run_maintenance(&ctx).await?;
        assert_eq!(summary.expired_holds, 1);
        assert_eq!(summary.reminders_sent, Some(0));
        assert_eq!(summary.missed_flagged, 0);
        assert_eq!(summary.run_date, ctx.now().date_naive());

        let entry = waitlist::require_entry(&ctx.database, entry.id).await?;
        assert_eq!(entry.status, crate::entities::WaitlistStatus::Expired);

        let again = run_maintenance(&ctx).await?;
        assert_eq!(again.expired_holds, 0);
        assert_eq!(again.reminders_sent, None);
        assert!(format_maintenance_summary(&again).contains("reminders already sent"));
        Ok(())
    }
}
