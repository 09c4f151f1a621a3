//! Unified error type for the seminar core.
//!
//! Every expected, recoverable condition is a distinct variant so callers (scanning UI,
//! enrollment UI, admin tools) can react to it without string matching.

use sea_orm::{DbErr, RuntimeErr, SqlErr, sqlx};
use thiserror::Error;

/// Primary `SQLite` result codes for a store locked by another connection
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// All errors produced by the seminar core.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity ("seminar", "session", "registration", "waitlist entry")
        entity: &'static str,
        /// Identifier that was looked up
        id: i64,
    },

    /// A scanned or typed check-in code matched no registration
    #[error("No registration matches code '{code}'")]
    CodeNotFound {
        /// The code as supplied by the caller
        code: String,
    },

    /// The seminar has no free seat (enrolled plus held seats reached capacity)
    #[error("Seminar {seminar_id} is full (capacity {capacity})")]
    CapacityExceeded {
        /// Seminar that is full
        seminar_id: i64,
        /// Configured capacity
        capacity: i32,
    },

    /// The seminar is not accepting enrollments in its current lifecycle state
    #[error("Seminar {seminar_id} is not open for enrollment (status: {status})")]
    SeminarNotOpen {
        /// Seminar id
        seminar_id: i64,
        /// Current lifecycle status
        status: String,
    },

    /// The user already holds an active or completed registration for the seminar
    #[error("User {user_id} is already enrolled in seminar {seminar_id}")]
    AlreadyEnrolled {
        /// Seminar id
        seminar_id: i64,
        /// User id
        user_id: i64,
    },

    /// Check-in attempted on a cancelled or completed registration
    #[error("Registration {registration_id} is not active (status: {status})")]
    RegistrationNotActive {
        /// Registration id
        registration_id: i64,
        /// Current status
        status: String,
    },

    /// The session belongs to a different seminar than the registration
    #[error("Session {session_id} does not belong to seminar {seminar_id}")]
    SessionMismatch {
        /// Session id
        session_id: i64,
        /// Seminar of the registration
        seminar_id: i64,
    },

    /// The registration was already checked in to this session; no credit was awarded
    #[error("Registration {registration_id} is already checked in to session {session_id}")]
    AlreadyCheckedIn {
        /// Registration id
        registration_id: i64,
        /// Session id
        session_id: i64,
    },

    /// The registration's single makeup session was already used
    #[error("Registration {registration_id} has already used its makeup session")]
    MakeupAlreadyUsed {
        /// Registration id
        registration_id: i64,
    },

    /// Credits cannot be posted for a guest registration until a user is assigned
    #[error("Registration {registration_id} has no user assigned")]
    UserNotAssigned {
        /// Registration id
        registration_id: i64,
    },

    /// No waiting entry exists for the seminar
    #[error("Nobody is waiting for seminar {seminar_id}")]
    NoneWaiting {
        /// Seminar id
        seminar_id: i64,
    },

    /// The contact already has a live waitlist entry for the seminar
    #[error("'{email}' is already on the waitlist for seminar {seminar_id}")]
    AlreadyWaitlisted {
        /// Seminar id
        seminar_id: i64,
        /// Contact email
        email: String,
    },

    /// The promotion hold lapsed before conversion
    #[error("Waitlist hold {waitlist_id} has expired")]
    HoldExpired {
        /// Waitlist entry id
        waitlist_id: i64,
    },

    /// A waitlist status change that the state machine does not allow
    #[error("Cannot move waitlist entry {waitlist_id} from {from} to {to}")]
    InvalidTransition {
        /// Waitlist entry id
        waitlist_id: i64,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Lost a race on a uniqueness or capacity constraint; retry the whole operation
    #[error("Concurrent update conflict: {message}")]
    ConcurrencyConflict {
        /// Store-level detail
        message: String,
    },

    /// Rejected input (empty names, zero credit amounts, out-of-range sequence numbers)
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable description
        message: String,
    },

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description
        message: String,
    },

    /// Store failure
    #[error("Database error: {0}")]
    Database(DbErr),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(message)) => Self::ConcurrencyConflict { message },
            _ if is_lock_contention(&err) => Self::ConcurrencyConflict {
                message: err.to_string(),
            },
            _ => Self::Database(err),
        }
    }
}

/// Whether the store rejected the statement because another writer held the lock.
///
/// `SQLite` reports extended result codes; the low byte is the primary code.
fn is_lock_contention(err: &DbErr) -> bool {
    let (DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
    | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e)))) = err
    else {
        return false;
    };
    e.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

impl Error {
    /// `AlreadyCheckedIn` is reported to the scanning UI as information, not failure.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(self, Self::AlreadyCheckedIn { .. })
    }

    /// Whether the enrollment UI should offer the waitlist instead of an error.
    #[must_use]
    pub const fn suggests_waitlist(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Whether the failure was a transient race worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let already = Error::AlreadyCheckedIn {
            registration_id: 1,
            session_id: 2,
        };
        assert!(already.is_informational());
        assert!(!already.is_retryable());

        let full = Error::CapacityExceeded {
            seminar_id: 1,
            capacity: 2,
        };
        assert!(full.suggests_waitlist());
        assert!(!full.is_informational());

        let race = Error::ConcurrencyConflict {
            message: "UNIQUE constraint failed".to_string(),
        };
        assert!(race.is_retryable());
    }

    #[test]
    fn test_plain_db_error_is_not_a_conflict() {
        let err: Error = DbErr::Custom("boom".to_string()).into();
        assert!(matches!(err, Error::Database(_)));

        let err: Error = DbErr::Exec(RuntimeErr::Internal("database is locked".to_string())).into();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn test_locked_store_is_a_conflict() -> Result<()> {
        use sea_orm::{ConnectOptions, ConnectionTrait, Database, TransactionTrait};

        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("locked.sqlite").display());

        let holder = Database::connect(url.as_str()).await?;
        crate::config::database::create_tables(&holder).await?;

        let mut options = ConnectOptions::new(url.as_str());
        options
            .max_connections(1)
            .sqlx_logging(false)
            .map_sqlx_sqlite_opts(|opts| opts.busy_timeout(std::time::Duration::ZERO));
        let contender = Database::connect(options).await?;

        let txn = holder.begin().await?;
        txn.execute_unprepared(
            "INSERT INTO system_state (key, value, updated_at) VALUES ('k', 'v', '2026-01-05T08:00:00Z')",
        )
        .await?;

        let blocked = contender
            .execute_unprepared("UPDATE system_state SET value = 'w'")
            .await
            .map_err(Error::from);
        assert!(matches!(blocked, Err(Error::ConcurrencyConflict { .. })));
        assert!(blocked.is_err_and(|e| e.is_retryable()));

        txn.rollback().await?;
        Ok(())
    }

    #[test]
    fn test_error_messages() {
        let err = Error::NotFound {
            entity: "seminar",
            id: 7,
        };
        assert_eq!(err.to_string(), "seminar 7 not found");

        let err = Error::MakeupAlreadyUsed { registration_id: 3 };
        assert_eq!(
            err.to_string(),
            "Registration 3 has already used its makeup session"
        );
    }
}
