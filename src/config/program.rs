//! Program rule configuration loaded from `config.toml`.
//!
//! The rules that differ between program years (credits per session, how many sessions
//! certify a participant, how long a waitlist hold lasts) live in a TOML file rather than
//! in code. Every field has a default so an empty file is a valid configuration.

use crate::errors::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MAX_HOLD_DURATION_HOURS: i64 = 24 * 365;
const MAX_REMINDER_DAYS_BEFORE: i64 = 365;

/// Top-level structure of `config.toml`
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Seminar program rules
    #[serde(default)]
    pub program: ProgramSettings,
}

/// Rules for a seminar program
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProgramSettings {
    /// Number of scheduled sessions in a seminar
    pub total_sessions: i32,
    /// Sessions a registration must complete to become `completed`
    pub completion_threshold: i32,
    /// CE credits awarded per attended session
    pub credits_per_session: i32,
    /// How long a notified waitlist entry may hold a seat
    pub hold_duration_hours: i64,
    /// Days before a session that reminders go out
    pub reminder_days_before: i64,
    /// Seconds between maintenance runs in the binary
    pub maintenance_interval_secs: u64,
    /// Capacity of the in-process event channel
    pub event_buffer: usize,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            total_sessions: 10,
            completion_threshold: 10,
            credits_per_session: 2,
            hold_duration_hours: 48,
            reminder_days_before: 3,
            maintenance_interval_secs: 3600,
            event_buffer: 256,
        }
    }
}

impl ProgramSettings {
    /// Hold window granted by `notify_next`.
    pub fn hold_duration(&self) -> Result<Duration> {
        Duration::try_hours(self.hold_duration_hours)
            .ok_or_else(|| invalid("hold_duration_hours is out of range"))
    }

    /// End of a hold that starts at `from`.
    pub fn hold_deadline(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        from.checked_add_signed(self.hold_duration()?)
            .ok_or_else(|| invalid("hold_duration_hours is out of range"))
    }

    /// Date of the sessions whose reminders go out on `today`.
    pub fn reminder_target(&self, today: NaiveDate) -> Result<NaiveDate> {
        Duration::try_days(self.reminder_days_before)
            .and_then(|lead| today.checked_add_signed(lead))
            .ok_or_else(|| invalid("reminder_days_before is out of range"))
    }

    /// Rejects settings that would break the progress invariants.
    pub fn validate(&self) -> Result<()> {
        if self.total_sessions < 1 {
            return Err(invalid("total_sessions must be at least 1"));
        }
        if !(1..=self.total_sessions).contains(&self.completion_threshold) {
            return Err(invalid(
                "completion_threshold must be between 1 and total_sessions",
            ));
        }
        if self.credits_per_session < 1 {
            return Err(invalid("credits_per_session must be positive"));
        }
        if !(1..=MAX_HOLD_DURATION_HOURS).contains(&self.hold_duration_hours) {
            return Err(invalid("hold_duration_hours must be between 1 and 8760"));
        }
        if !(0..=MAX_REMINDER_DAYS_BEFORE).contains(&self.reminder_days_before) {
            return Err(invalid("reminder_days_before must be between 0 and 365"));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(invalid("maintenance_interval_secs must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config {
        message: message.to_string(),
    }
}

/// Loads and validates configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A rule is out of range
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    tracing::debug!("Loading configuration from {:?}", path);
    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path.display()),
    })?;

    parse_config(&contents)
}

/// Parses and validates configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.program.validate()?;
    Ok(config)
}

/// Loads configuration from `CE_SEMINARS_CONFIG` or `./config.toml`, falling back to the
/// defaults when the default file is absent.
pub fn load_default_config() -> Result<Config> {
    if let Ok(path) = std::env::var("CE_SEMINARS_CONFIG") {
        return load_config(path);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        load_config(DEFAULT_CONFIG_PATH)
    } else {
        tracing::info!("No {} found, using default program settings", DEFAULT_CONFIG_PATH);
        Ok(Config::default())
    }
}
