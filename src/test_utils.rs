//! Shared test utilities for the seminar core.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::program::ProgramSettings,
    context::{Clock, SeminarContext},
    core::catalog::{self, NewSession},
    entities::{seminar, session},
    errors::Result,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness. Run with `RUST_LOG=debug` to see it.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// The pool is pinned to one connection: every `sqlite::memory:` connection is its own
/// database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database in a temporary directory, served by a pool of up
/// to `max_connections` connections. Concurrency tests use this so that transactions really
/// contend for the store's lock.
///
/// The database is deleted when the returned directory is dropped.
pub async fn setup_shared_test_db(max_connections: u32) -> Result<(DatabaseConnection, TempDir)> {
    init_test_tracing();
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((db, dir))
}

/// Same as [`test_context`] over [`setup_shared_test_db`].
pub async fn shared_test_context(
    max_connections: u32,
) -> Result<(SeminarContext, Arc<ManualClock>, TempDir)> {
    let (db, dir) = setup_shared_test_db(max_connections).await?;
    let clock = Arc::new(ManualClock::new(test_start_time()));
    let ctx = SeminarContext::with_clock(
        db,
        ProgramSettings::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    Ok((ctx, clock, dir))
}

/// Clock that only moves when a test moves it
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts the clock at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jumps to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map_or_else(|poisoned| *poisoned.into_inner(), |now| *now)
    }
}

/// Default start of the manual clock: a few days before the first test session.
#[must_use]
pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Creates a context over a fresh test database with default program rules and a manual
/// clock started at [`test_start_time`].
pub async fn test_context() -> Result<(SeminarContext, Arc<ManualClock>)> {
    test_context_with(ProgramSettings::default()).await
}

/// Same as [`test_context`] with custom program rules.
pub async fn test_context_with(
    settings: ProgramSettings,
) -> Result<(SeminarContext, Arc<ManualClock>)> {
    let db = setup_test_db().await?;
    let clock = Arc::new(ManualClock::new(test_start_time()));
    let ctx = SeminarContext::with_clock(db, settings, Arc::clone(&clock) as Arc<dyn Clock>);
    Ok((ctx, clock))
}

/// Creates a test seminar with sensible defaults.
///
/// # Defaults
/// * title: "Monthly Seminar 2026"
/// * year: 2026
/// * tuition: 1500.0
pub async fn create_test_seminar(
    db: &DatabaseConnection,
    capacity: i32,
) -> Result<seminar::Model> {
    catalog::create_seminar(db, "Monthly Seminar 2026".to_string(), 2026, capacity, 1500.0).await
}

/// Session details for `sequence`, held weekly from 2026-01-10, 09:00 to 13:00.
#[must_use]
pub fn test_session(sequence: i32) -> NewSession {
    let first = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap_or_default();
    NewSession {
        sequence,
        date: first + Duration::days(7 * i64::from(sequence - 1)),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        end_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
        topic: format!("Topic {sequence}"),
        capacity: 50,
    }
}

/// Creates a test seminar with its full ten-session schedule.
pub async fn create_seminar_with_sessions(
    ctx: &SeminarContext,
    capacity: i32,
) -> Result<(seminar::Model, Vec<session::Model>)> {
    let seminar = create_test_seminar(&ctx.database, capacity).await?;
    let mut sessions = Vec::new();
    for sequence in 1..=ctx.settings.total_sessions {
        sessions.push(
            catalog::create_session(&ctx.database, &ctx.settings, seminar.id, test_session(sequence))
                .await?,
        );
    }
    Ok((seminar, sessions))
}
