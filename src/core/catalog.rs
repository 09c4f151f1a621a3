//! Session catalog - Seminar offerings and their fixed schedule of sessions.
//!
//! This is plain storage with validation: seminars are created by an administrator, their
//! capacity and lifecycle status are mutable, and each seminar gets exactly one session per
//! sequence number. All functions are async and generic over the connection so they can run
//! inside a caller's transaction.

use crate::{
    config::program::ProgramSettings,
    entities::{Seminar, SeminarStatus, Session, seminar, session},
    errors::{Error, Result},
};
use chrono::{NaiveDate, NaiveTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

/// Details of a session to schedule
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Position in the program (1-based)
    pub sequence: i32,
    /// Calendar date
    pub date: NaiveDate,
    /// Start time
    pub start_time: NaiveTime,
    /// End time
    pub end_time: NaiveTime,
    /// Lecture topic
    pub topic: String,
    /// Seats in the room
    pub capacity: i32,
}

/// Creates a new seminar in `upcoming` status with empty capacity counters.
pub async fn create_seminar<C>(
    db: &C,
    title: String,
    year: i32,
    capacity: i32,
    tuition: f64,
) -> Result<seminar::Model>
where
    C: ConnectionTrait,
{
    if title.trim().is_empty() {
        return Err(validation("Seminar title cannot be empty"));
    }
    if capacity < 1 {
        return Err(validation("Seminar capacity must be at least 1"));
    }
    if !tuition.is_finite() || tuition < 0.0 {
        return Err(validation("Tuition must be a non-negative amount"));
    }

    let model = seminar::ActiveModel {
        title: Set(title.trim().to_string()),
        year: Set(year),
        capacity: Set(capacity),
        tuition: Set(tuition),
        status: Set(SeminarStatus::Upcoming),
        enrolled_count: Set(0),
        held_count: Set(0),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    let seminar = model.insert(db).await?;
    info!("Created seminar {} ({}), capacity {}", seminar.id, seminar.title, capacity);
    Ok(seminar)
}

/// Finds a seminar by id, returning None if it does not exist.
pub async fn get_seminar<C>(db: &C, seminar_id: i64) -> Result<Option<seminar::Model>>
where
    C: ConnectionTrait,
{
    Seminar::find_by_id(seminar_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a seminar by id, failing with `NotFound` if it does not exist.
pub async fn require_seminar<C>(db: &C, seminar_id: i64) -> Result<seminar::Model>
where
    C: ConnectionTrait,
{
    get_seminar(db, seminar_id).await?.ok_or(Error::NotFound {
        entity: "seminar",
        id: seminar_id,
    })
}

/// Lists all seminars, newest program year first.
pub async fn list_seminars<C>(db: &C) -> Result<Vec<seminar::Model>>
where
    C: ConnectionTrait,
{
    Seminar::find()
        .order_by_desc(seminar::Column::Year)
        .order_by_asc(seminar::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves a seminar to a new lifecycle status. Cancelled seminars stay cancelled.
pub async fn update_seminar_status<C>(
    db: &C,
    seminar_id: i64,
    status: SeminarStatus,
) -> Result<seminar::Model>
where
    C: ConnectionTrait,
{
    let seminar = require_seminar(db, seminar_id).await?;
    if seminar.status == SeminarStatus::Cancelled && status != SeminarStatus::Cancelled {
        return Err(validation("A cancelled seminar cannot be reopened"));
    }

    let mut active_model: seminar::ActiveModel = seminar.into();
    active_model.status = Set(status);
    let updated = active_model.update(db).await?;
    info!("Seminar {} is now {}", seminar_id, status.as_str());
    Ok(updated)
}

/// Changes a seminar's capacity. The new capacity may not drop below the seats already
/// taken by registrations and live waitlist holds.
pub async fn update_seminar_capacity<C>(
    db: &C,
    seminar_id: i64,
    capacity: i32,
) -> Result<seminar::Model>
where
    C: ConnectionTrait,
{
    use sea_orm::sea_query::Expr;

    if capacity < 1 {
        return Err(validation("Seminar capacity must be at least 1"));
    }
    require_seminar(db, seminar_id).await?;

    // Guarded in the statement itself so a concurrent enrollment cannot slip under it
    let result = Seminar::update_many()
        .col_expr(seminar::Column::Capacity, Expr::value(capacity))
        .filter(seminar::Column::Id.eq(seminar_id))
        .filter(
            Expr::expr(
                Expr::col(seminar::Column::EnrolledCount).add(Expr::col(seminar::Column::HeldCount)),
            )
            .lte(capacity),
        )
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(validation(
            "Capacity cannot be lower than the seats already taken",
        ));
    }
    require_seminar(db, seminar_id).await
}

/// Schedules a session for a seminar.
///
/// The sequence number must lie within the configured program length and must not
/// already be taken in this seminar.
pub async fn create_session<C>(
    db: &C,
    settings: &ProgramSettings,
    seminar_id: i64,
    new_session: NewSession,
) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    if !(1..=settings.total_sessions).contains(&new_session.sequence) {
        return Err(validation(&format!(
            "Session sequence must be between 1 and {}",
            settings.total_sessions
        )));
    }
    validate_session_fields(
        &new_session.topic,
        new_session.start_time,
        new_session.end_time,
        new_session.capacity,
    )?;
    require_seminar(db, seminar_id).await?;

    let taken = Session::find()
        .filter(session::Column::SeminarId.eq(seminar_id))
        .filter(session::Column::Sequence.eq(new_session.sequence))
        .one(db)
        .await?;
    if taken.is_some() {
        return Err(validation(&format!(
            "Seminar {seminar_id} already has a session {}",
            new_session.sequence
        )));
    }

    let model = session::ActiveModel {
        seminar_id: Set(seminar_id),
        sequence: Set(new_session.sequence),
        date: Set(new_session.date),
        start_time: Set(new_session.start_time),
        end_time: Set(new_session.end_time),
        topic: Set(new_session.topic.trim().to_string()),
        capacity: Set(new_session.capacity),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Reschedules or edits an existing session. The sequence number is fixed.
pub async fn update_session<C>(
    db: &C,
    session_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    topic: String,
    capacity: i32,
) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    validate_session_fields(&topic, start_time, end_time, capacity)?;
    let session = require_session(db, session_id).await?;

    let mut active_model: session::ActiveModel = session.into();
    active_model.date = Set(date);
    active_model.start_time = Set(start_time);
    active_model.end_time = Set(end_time);
    active_model.topic = Set(topic.trim().to_string());
    active_model.capacity = Set(capacity);
    active_model.update(db).await.map_err(Into::into)
}

/// Finds a session by id, returning None if it does not exist.
pub async fn get_session<C>(db: &C, session_id: i64) -> Result<Option<session::Model>>
where
    C: ConnectionTrait,
{
    Session::find_by_id(session_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a session by id, failing with `NotFound` if it does not exist.
pub async fn require_session<C>(db: &C, session_id: i64) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    get_session(db, session_id).await?.ok_or(Error::NotFound {
        entity: "session",
        id: session_id,
    })
}

/// Lists a seminar's sessions in program order.
pub async fn list_sessions<C>(db: &C, seminar_id: i64) -> Result<Vec<session::Model>>
where
    C: ConnectionTrait,
{
    Session::find()
        .filter(session::Column::SeminarId.eq(seminar_id))
        .order_by_asc(session::Column::Sequence)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists sessions of open seminars taking place on `date`.
pub async fn list_sessions_on<C>(db: &C, date: NaiveDate) -> Result<Vec<session::Model>>
where
    C: ConnectionTrait,
{
    Session::find()
        .inner_join(Seminar)
        .filter(session::Column::Date.eq(date))
        .filter(seminar::Column::Status.is_in([SeminarStatus::Upcoming, SeminarStatus::Active]))
        .order_by_asc(session::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists sessions of open seminars that took place before `date`.
pub async fn list_sessions_before<C>(db: &C, date: NaiveDate) -> Result<Vec<session::Model>>
where
    C: ConnectionTrait,
{
    Session::find()
        .inner_join(Seminar)
        .filter(session::Column::Date.lt(date))
        .filter(seminar::Column::Status.is_in([SeminarStatus::Upcoming, SeminarStatus::Active]))
        .order_by_asc(session::Column::Date)
        .order_by_asc(session::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

fn validate_session_fields(
    topic: &str,
    start_time: NaiveTime,
    end_time: NaiveTime,
    capacity: i32,
) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(validation("Session topic cannot be empty"));
    }
    if end_time <= start_time {
        return Err(validation("Session must end after it starts"));
    }
    if capacity < 1 {
        return Err(validation("Session capacity must be at least 1"));
    }
    Ok(())
}

fn validation(message: &str) -> Error {
    Error::Validation {
        message: message.to_string(),
    }
}
