//! Shared context injected into every core operation.
//!
//! The context carries the store connection, the program rules, the event bus, and the
//! clock. Tests build one over an in-memory `SQLite` database with a manual clock.

use crate::config::program::ProgramSettings;
use crate::events::EventBus;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Abstracts "now" so hold expiry and reminders can be tested deterministically
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything a core operation needs
#[derive(Clone)]
pub struct SeminarContext {
    /// Database connection for all store operations
    pub database: DatabaseConnection,
    /// Program rules
    pub settings: ProgramSettings,
    /// Outgoing events
    pub events: EventBus,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl SeminarContext {
    /// Creates a context using the system clock.
    #[must_use]
    pub fn new(database: DatabaseConnection, settings: ProgramSettings) -> Self {
        Self::with_clock(database, settings, Arc::new(SystemClock))
    }

    /// Creates a context with an explicit time source.
    #[must_use]
    pub fn with_clock(
        database: DatabaseConnection,
        settings: ProgramSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = EventBus::new(settings.event_buffer);
        Self {
            database,
            settings,
            events,
            clock,
        }
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
