//! Typed events published by the core after each committed state change.
//!
//! Notification delivery (email, SMS, dashboards) subscribes to the [`EventBus`]; the core
//! never renders or sends anything itself. Events are published only after the owning
//! transaction commits, so a subscriber never sees an event for a rolled-back change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Something external collaborators may want to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SeminarEvent {
    /// A registration was created or reactivated
    RegistrationCreated {
        /// Registration id
        registration_id: i64,
        /// Seminar id
        seminar_id: i64,
        /// Participant, if known
        user_id: Option<i64>,
        /// Originating order
        order_id: i64,
    },
    /// A registration was cancelled and its seat freed
    RegistrationCancelled {
        /// Registration id
        registration_id: i64,
        /// Seminar id
        seminar_id: i64,
        /// Participant, if known
        user_id: Option<i64>,
    },
    /// Credits were added to a user's ledger
    CreditsAwarded {
        /// User credited
        user_id: i64,
        /// Registration that earned the credit, for attendance awards
        registration_id: Option<i64>,
        /// Session attended, for attendance awards
        session_id: Option<i64>,
        /// Amount credited
        credits: i32,
        /// Ledger entry written
        ledger_entry_id: i64,
    },
    /// A session is coming up for an active registration
    SessionReminderDue {
        /// Registration to remind
        registration_id: i64,
        /// Participant, if known
        user_id: Option<i64>,
        /// Upcoming session
        session_id: i64,
        /// Seminar id
        seminar_id: i64,
        /// Date of the session
        session_date: NaiveDate,
    },
    /// A waitlisted contact was offered a seat
    WaitlistNotified {
        /// Waitlist entry id
        waitlist_id: i64,
        /// Seminar id
        seminar_id: i64,
        /// Contact email
        email: String,
        /// End of the hold
        expires_at: DateTime<Utc>,
    },
    /// An active registration has no attendance for a session that already took place
    MissedSession {
        /// Registration id
        registration_id: i64,
        /// Participant, if known
        user_id: Option<i64>,
        /// Session missed
        session_id: i64,
        /// Seminar id
        seminar_id: i64,
    },
}

impl SeminarEvent {
    /// Stable event name used by subscribers for routing
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegistrationCreated { .. } => "registration_created",
            Self::RegistrationCancelled { .. } => "registration_cancelled",
            Self::CreditsAwarded { .. } => "credits_awarded",
            Self::SessionReminderDue { .. } => "session_reminder_due",
            Self::WaitlistNotified { .. } => "waitlist_notified",
            Self::MissedSession { .. } => "missed_session",
        }
    }
}

/// In-process fan-out of [`SeminarEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SeminarEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a new subscriber that receives every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SeminarEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; having no subscribers is not an error.
    pub fn publish(&self, event: SeminarEvent) {
        trace!(?event, "publishing event");
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!("Published {} to {} subscriber(s)", name, receivers),
            Err(_) => debug!("Published {} with no subscribers", name),
        }
    }

    /// Publishes a batch of events in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = SeminarEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}
