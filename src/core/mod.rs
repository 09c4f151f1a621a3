//! Core business logic - enrollment, attendance, credits, waitlist, and reporting.
//!
//! Every operation takes a [`SeminarContext`](crate::context::SeminarContext) (or a bare
//! connection for storage-only helpers) and returns a structured `Result`; nothing here
//! knows about HTTP, email, or rendering.

use crate::{
    entities::{SystemState, system_state},
    errors::Result,
};
use sea_orm::{
    DatabaseConnection, DatabaseTransaction, TransactionTrait, prelude::*, sea_query::Expr,
};
use std::future::Future;
use tracing::warn;

/// Attendance / check-in state machine
pub mod attendance;
/// Seminar and session storage
pub mod catalog;
/// Append-only CE credit ledger
pub mod ledger;
/// Scheduled maintenance: hold expiry, reminders, missed sessions
pub mod maintenance;
/// Enrollment and capacity accounting
pub mod registration;
/// Read-only aggregations
pub mod report;
/// Waitlist queue and promotion holds
pub mod waitlist;

/// Runs `operation`, retrying it once if it lost a race on a store constraint.
///
/// A second conflict is surfaced to the caller unchanged.
pub(crate) async fn retry_on_conflict<T, F, Fut>(name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match operation().await {
        Err(e) if e.is_retryable() => {
            warn!("{} hit a concurrent update ({}), retrying once", name, e);
            operation().await
        }
        other => other,
    }
}

/// Opens a transaction that already holds the store's write lock.
///
/// `SQLite` begins transactions deferred, and one that reads before its first write fails
/// with `SQLITE_BUSY` instead of waiting. Writing first makes it queue on the busy timeout.
pub(crate) async fn begin_write(db: &DatabaseConnection) -> Result<DatabaseTransaction> {
    let txn = db.begin().await?;
    SystemState::update_many()
        .col_expr(system_state::Column::Value, Expr::col(system_state::Column::Value).into())
        .filter(system_state::Column::Id.lt(0))
        .exec(&txn)
        .await?;
    Ok(txn)
}
