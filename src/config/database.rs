//! Database configuration module.
//!
//! This module handles the store connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite uniqueness rules that the entity
//! attributes cannot express (one session per sequence number, one registration per user and
//! seminar, one waitlist position per seminar) are added as explicit unique indexes.

use crate::entities::{
    Attendance, CreditLedger, Registration, Seminar, Session, SystemState, Waitlist, registration,
    session, waitlist,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/ce_seminars.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable or returns the default
/// local `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the store named by `DATABASE_URL`.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    Database::connect(options).await.map_err(Into::into)
}

/// Creates every table and unique index if they do not already exist.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let tables = [
        schema.create_table_from_entity(Seminar).if_not_exists().to_owned(),
        schema.create_table_from_entity(Session).if_not_exists().to_owned(),
        schema.create_table_from_entity(Registration).if_not_exists().to_owned(),
        schema.create_table_from_entity(Attendance).if_not_exists().to_owned(),
        schema.create_table_from_entity(CreditLedger).if_not_exists().to_owned(),
        schema.create_table_from_entity(Waitlist).if_not_exists().to_owned(),
        schema.create_table_from_entity(SystemState).if_not_exists().to_owned(),
    ];
    for table in &tables {
        db.execute(builder.build(table)).await?;
    }

    for index in unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    info!("Database tables ensured.");
    Ok(())
}

fn unique_indexes() -> [IndexCreateStatement; 3] {
    [
        Index::create()
            .name("idx_sessions_seminar_sequence")
            .table(Session)
            .col(session::Column::SeminarId)
            .col(session::Column::Sequence)
            .unique()
            .if_not_exists()
            .to_owned(),
        // NULL user ids (guest checkout) never collide with each other
        Index::create()
            .name("idx_registrations_seminar_user")
            .table(Registration)
            .col(registration::Column::SeminarId)
            .col(registration::Column::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_waitlist_seminar_position")
            .table(Waitlist)
            .col(waitlist::Column::SeminarId)
            .col(waitlist::Column::Position)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        attendance::Model as AttendanceModel, credit_ledger::Model as LedgerModel,
        registration::Model as RegistrationModel, seminar::Model as SeminarModel,
        session::Model as SessionModel, system_state::Model as SystemStateModel,
        waitlist::Model as WaitlistModel,
    };
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<SeminarModel> = Seminar::find().limit(1).all(&db).await?;
        let _: Vec<SessionModel> = Session::find().limit(1).all(&db).await?;
        let _: Vec<RegistrationModel> = Registration::find().limit(1).all(&db).await?;
        let _: Vec<AttendanceModel> = Attendance::find().limit(1).all(&db).await?;
        let _: Vec<LedgerModel> = CreditLedger::find().limit(1).all(&db).await?;
        let _: Vec<WaitlistModel> = Waitlist::find().limit(1).all(&db).await?;
        let _: Vec<SystemStateModel> = SystemState::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
