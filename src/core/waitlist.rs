//! Waitlist manager - FIFO queue per seminar with time-boxed promotion holds.
//!
//! When a seat frees up, the earliest waiting entry is notified and a seat is held for it by
//! incrementing the seminar's `held_count`. Open enrollment cannot take a held seat. The hold
//! either becomes a registration (`convert`), lapses (`expire_stale_holds`), or is withdrawn
//! (`remove`), and each of those releases or consumes exactly one held seat.

use crate::{
    context::SeminarContext,
    core::{
        begin_write, catalog,
        registration::{self, SeatSource},
        retry_on_conflict,
    },
    entities::{
        Seminar, SeminarStatus, Waitlist, WaitlistStatus, registration as registration_entity,
        seminar, waitlist,
    },
    errors::{Error, Result},
    events::SeminarEvent,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Contact details supplied when joining a waitlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistContact {
    /// Contact name
    pub name: String,
    /// Contact email, compared case-insensitively
    pub email: String,
    /// Optional phone number
    pub phone: Option<String>,
    /// Known user, if the contact has an account
    pub user_id: Option<i64>,
}

/// A waitlist entry together with its live rank among waiting entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    /// The stored entry
    pub entry: waitlist::Model,
    /// 1-based rank among `waiting` entries, None for any other status
    pub rank: Option<u64>,
}

/// Adds a contact to the end of a seminar's waitlist.
///
/// The seminar does not have to be full; the enrollment UI decides when to offer the
/// waitlist. Positions are assigned as `max(position) + 1` and never reused.
///
/// # Errors
/// * `Validation` - empty name or email
/// * `NotFound` - the seminar does not exist
/// * `SeminarNotOpen` - the seminar is completed or cancelled
/// * `AlreadyWaitlisted` - the email already has a waiting or notified entry
#[instrument(skip(ctx, contact), fields(email = %contact.email))]
pub async fn join(
    ctx: &SeminarContext,
    seminar_id: i64,
    contact: WaitlistContact,
) -> Result<waitlist::Model> {
    let name = contact.name.trim().to_string();
    let email = contact.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() {
        return Err(Error::Validation {
            message: "Waitlist contact needs a name and an email".to_string(),
        });
    }
    let contact = WaitlistContact {
        name,
        email,
        ..contact
    };

    retry_on_conflict("join_waitlist", move || {
        let contact = contact.clone();
        async move { join_once(ctx, seminar_id, contact).await }
    })
    .await
}

async fn join_once(
    ctx: &SeminarContext,
    seminar_id: i64,
    contact: WaitlistContact,
) -> Result<waitlist::Model> {
    let txn = begin_write(&ctx.database).await?;

    let seminar = catalog::require_seminar(&txn, seminar_id).await?;
    if !seminar.status.is_open() {
        return Err(Error::SeminarNotOpen {
            seminar_id,
            status: seminar.status.as_str().to_string(),
        });
    }

    let duplicate = Waitlist::find()
        .filter(waitlist::Column::SeminarId.eq(seminar_id))
        .filter(waitlist::Column::Email.eq(contact.email.as_str()))
        .filter(waitlist::Column::Status.is_in([WaitlistStatus::Waiting, WaitlistStatus::Notified]))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(Error::AlreadyWaitlisted {
            seminar_id,
            email: contact.email,
        });
    }

    let last_position: Option<Option<i32>> = Waitlist::find()
        .select_only()
        .column_as(waitlist::Column::Position.max(), "max_position")
        .filter(waitlist::Column::SeminarId.eq(seminar_id))
        .into_tuple()
        .one(&txn)
        .await?;
    let position = last_position.flatten().unwrap_or(0) + 1;

    let entry = waitlist::ActiveModel {
        seminar_id: Set(seminar_id),
        name: Set(contact.name),
        email: Set(contact.email),
        phone: Set(contact.phone),
        user_id: Set(contact.user_id),
        position: Set(position),
        status: Set(WaitlistStatus::Waiting),
        created_at: Set(ctx.now()),
        notified_at: Set(None),
        expires_at: Set(None),
        registration_id: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(
        "Waitlist entry {} joined seminar {} at position {}",
        entry.id, seminar_id, position
    );
    Ok(entry)
}

/// Offers a held seat to the earliest waiting entry.
///
/// # Errors
/// * `NoneWaiting` - nobody is waiting
/// * `CapacityExceeded` - every seat is taken or already held
/// * `SeminarNotOpen` - the seminar is completed or cancelled
#[instrument(skip(ctx))]
pub async fn notify_next(ctx: &SeminarContext, seminar_id: i64) -> Result<waitlist::Model> {
    retry_on_conflict("notify_next", move || async move {
        let txn = begin_write(&ctx.database).await?;
        let now = ctx.now();

        let seminar = catalog::require_seminar(&txn, seminar_id).await?;
        if !seminar.status.is_open() {
            return Err(Error::SeminarNotOpen {
                seminar_id,
                status: seminar.status.as_str().to_string(),
            });
        }

        let next = Waitlist::find()
            .filter(waitlist::Column::SeminarId.eq(seminar_id))
            .filter(waitlist::Column::Status.eq(WaitlistStatus::Waiting))
            .order_by_asc(waitlist::Column::Position)
            .one(&txn)
            .await?
            .ok_or(Error::NoneWaiting { seminar_id })?;

        let held = Seminar::update_many()
            .col_expr(
                seminar::Column::HeldCount,
                Expr::col(seminar::Column::HeldCount).add(1),
            )
            .filter(seminar::Column::Id.eq(seminar_id))
            .filter(seminar::Column::Status.is_in([SeminarStatus::Upcoming, SeminarStatus::Active]))
            .filter(
                Expr::expr(
                    Expr::col(seminar::Column::EnrolledCount)
                        .add(Expr::col(seminar::Column::HeldCount)),
                )
                .lt(Expr::col(seminar::Column::Capacity)),
            )
            .exec(&txn)
            .await?;
        if held.rows_affected == 0 {
            return Err(Error::CapacityExceeded {
                seminar_id,
                capacity: seminar.capacity,
            });
        }

        let expires_at = ctx.settings.hold_deadline(now)?;
        let notified = Waitlist::update_many()
            .col_expr(waitlist::Column::Status, Expr::value(WaitlistStatus::Notified))
            .col_expr(waitlist::Column::NotifiedAt, Expr::value(Some(now)))
            .col_expr(waitlist::Column::ExpiresAt, Expr::value(Some(expires_at)))
            .filter(waitlist::Column::Id.eq(next.id))
            .filter(waitlist::Column::Status.eq(WaitlistStatus::Waiting))
            .exec(&txn)
            .await?;
        if notified.rows_affected == 0 {
            return Err(Error::ConcurrencyConflict {
                message: format!("waitlist entry {} was notified concurrently", next.id),
            });
        }

        let entry = require_entry(&txn, next.id).await?;
        txn.commit().await?;

        info!(
            "Waitlist entry {} notified for seminar {}, hold until {}",
            entry.id, seminar_id, expires_at
        );
        ctx.events.publish(SeminarEvent::WaitlistNotified {
            waitlist_id: entry.id,
            seminar_id,
            email: entry.email.clone(),
            expires_at,
        });
        Ok(entry)
    })
    .await
}

/// Promotes the next waiting entry after a seat was freed, if there is anyone to promote
/// and a seat to hold.
pub async fn on_capacity_freed(
    ctx: &SeminarContext,
    seminar_id: i64,
) -> Result<Option<waitlist::Model>> {
    match notify_next(ctx, seminar_id).await {
        Ok(entry) => Ok(Some(entry)),
        Err(
            Error::NoneWaiting { .. } | Error::CapacityExceeded { .. } | Error::SeminarNotOpen { .. },
        ) => {
            debug!("No waitlist promotion for seminar {}", seminar_id);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Turns a notified entry into a registration using its held seat.
///
/// If enrollment fails the entry goes back to `waiting` at its original position and the
/// held seat is released.
///
/// # Errors
/// * `InvalidTransition` - the entry is not `notified`
/// * `HoldExpired` - the hold lapsed; the entry is marked `expired`
/// * any enrollment error, after the revert
#[instrument(skip(ctx))]
pub async fn convert(
    ctx: &SeminarContext,
    waitlist_id: i64,
    user_id: Option<i64>,
    order_id: i64,
) -> Result<registration_entity::Model> {
    let now = ctx.now();
    let txn = begin_write(&ctx.database).await?;

    let entry = require_entry(&txn, waitlist_id).await?;
    if entry.status != WaitlistStatus::Notified {
        return Err(invalid_transition(&entry, WaitlistStatus::Converted));
    }

    if entry.expires_at.is_none_or(|expires_at| expires_at <= now) {
        expire_entry(&txn, &entry).await?;
        txn.commit().await?;
        info!("Waitlist hold {} lapsed before conversion", waitlist_id);
        return Err(Error::HoldExpired { waitlist_id });
    }

    let enrolled = registration::enroll_in_txn(
        &txn,
        &ctx.settings,
        entry.seminar_id,
        user_id.or(entry.user_id),
        order_id,
        now,
        SeatSource::Held,
    )
    .await;

    let registration = match enrolled {
        Ok(registration) => registration,
        Err(e) => {
            txn.rollback().await?;
            warn!("Conversion of waitlist entry {} failed: {}", waitlist_id, e);
            revert_to_waiting(ctx, &entry).await?;
            return Err(e);
        }
    };

    let mut active_model: waitlist::ActiveModel = entry.into();
    active_model.status = Set(WaitlistStatus::Converted);
    active_model.expires_at = Set(None);
    active_model.registration_id = Set(Some(registration.id));
    active_model.update(&txn).await?;
    txn.commit().await?;

    info!(
        "Waitlist entry {} converted to registration {}",
        waitlist_id, registration.id
    );
    ctx.events.publish(registration::created_event(&registration));
    Ok(registration)
}

/// Puts a notified entry back in the queue and releases its held seat.
async fn revert_to_waiting(ctx: &SeminarContext, entry: &waitlist::Model) -> Result<()> {
    let txn = begin_write(&ctx.database).await?;
    let reverted = Waitlist::update_many()
        .col_expr(waitlist::Column::Status, Expr::value(WaitlistStatus::Waiting))
        .col_expr(
            waitlist::Column::NotifiedAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .col_expr(
            waitlist::Column::ExpiresAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .filter(waitlist::Column::Id.eq(entry.id))
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Notified))
        .exec(&txn)
        .await?;
    if reverted.rows_affected == 1 {
        release_hold(&txn, entry.seminar_id).await?;
    }
    txn.commit().await?;
    info!("Waitlist entry {} returned to waiting", entry.id);
    Ok(())
}

/// Expires every notified entry whose hold has lapsed and releases their seats.
///
/// Returns the number of entries expired. Freed seats are not offered to the next entry
/// automatically.
#[instrument(skip(ctx))]
pub async fn expire_stale_holds(ctx: &SeminarContext) -> Result<u64> {
    let now = ctx.now();
    let txn = begin_write(&ctx.database).await?;

    let stale = Waitlist::find()
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Notified))
        .filter(waitlist::Column::ExpiresAt.lte(now))
        .all(&txn)
        .await?;

    let mut expired = 0;
    for entry in &stale {
        if expire_entry(&txn, entry).await? {
            expired += 1;
        }
    }
    txn.commit().await?;

    if expired > 0 {
        info!("Expired {} stale waitlist hold(s)", expired);
    }
    Ok(expired)
}

/// Marks a notified entry expired, clears its hold deadline and releases its seat. Returns
/// false if the entry had already left `notified`.
async fn expire_entry<C>(db: &C, entry: &waitlist::Model) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = Waitlist::update_many()
        .col_expr(waitlist::Column::Status, Expr::value(WaitlistStatus::Expired))
        .col_expr(
            waitlist::Column::ExpiresAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .filter(waitlist::Column::Id.eq(entry.id))
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Notified))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Ok(false);
    }
    release_hold(db, entry.seminar_id).await?;
    Ok(true)
}

async fn release_hold<C>(db: &C, seminar_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    Seminar::update_many()
        .col_expr(
            seminar::Column::HeldCount,
            Expr::col(seminar::Column::HeldCount).sub(1),
        )
        .filter(seminar::Column::Id.eq(seminar_id))
        .filter(seminar::Column::HeldCount.gt(0))
        .exec(db)
        .await?;
    Ok(())
}

/// Withdraws a waiting or notified entry. Removing a notified entry releases its hold.
#[instrument(skip(ctx))]
pub async fn remove(ctx: &SeminarContext, waitlist_id: i64) -> Result<waitlist::Model> {
    let txn = begin_write(&ctx.database).await?;
    let entry = require_entry(&txn, waitlist_id).await?;

    let was_notified = match entry.status {
        WaitlistStatus::Waiting => false,
        WaitlistStatus::Notified => true,
        _ => return Err(invalid_transition(&entry, WaitlistStatus::Removed)),
    };
    let seminar_id = entry.seminar_id;

    let mut active_model: waitlist::ActiveModel = entry.into();
    active_model.status = Set(WaitlistStatus::Removed);
    active_model.expires_at = Set(None);
    let removed = active_model.update(&txn).await?;

    if was_notified {
        release_hold(&txn, seminar_id).await?;
    }
    txn.commit().await?;

    info!("Waitlist entry {} removed", waitlist_id);
    Ok(removed)
}

/// Finds a waitlist entry by id, returning None if it does not exist.
pub async fn get_entry<C>(db: &C, waitlist_id: i64) -> Result<Option<waitlist::Model>>
where
    C: ConnectionTrait,
{
    Waitlist::find_by_id(waitlist_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a waitlist entry by id, failing with `NotFound` if it does not exist.
pub async fn require_entry<C>(db: &C, waitlist_id: i64) -> Result<waitlist::Model>
where
    C: ConnectionTrait,
{
    get_entry(db, waitlist_id).await?.ok_or(Error::NotFound {
        entity: "waitlist entry",
        id: waitlist_id,
    })
}

/// Lists a seminar's waitlist in join order, with the live rank of each waiting entry.
pub async fn list_waitlist<C>(db: &C, seminar_id: i64) -> Result<Vec<RankedEntry>>
where
    C: ConnectionTrait,
{
    let entries = Waitlist::find()
        .filter(waitlist::Column::SeminarId.eq(seminar_id))
        .order_by_asc(waitlist::Column::Position)
        .all(db)
        .await?;

    let mut waiting = 0;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let rank = (entry.status == WaitlistStatus::Waiting).then(|| {
                waiting += 1;
                waiting
            });
            RankedEntry { entry, rank }
        })
        .collect())
}

/// 1-based rank of a waiting entry among the seminar's waiting entries.
///
/// Returns None once the entry has left `waiting`.
pub async fn current_rank<C>(db: &C, waitlist_id: i64) -> Result<Option<u64>>
where
    C: ConnectionTrait,
{
    let entry = require_entry(db, waitlist_id).await?;
    if entry.status != WaitlistStatus::Waiting {
        return Ok(None);
    }

    let ahead = Waitlist::find()
        .filter(waitlist::Column::SeminarId.eq(entry.seminar_id))
        .filter(waitlist::Column::Status.eq(WaitlistStatus::Waiting))
        .filter(waitlist::Column::Position.lt(entry.position))
        .count(db)
        .await?;
    Ok(Some(ahead + 1))
}

fn invalid_transition(entry: &waitlist::Model, to: WaitlistStatus) -> Error {
    Error::InvalidTransition {
        waitlist_id: entry.id,
        from: entry.status.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}
