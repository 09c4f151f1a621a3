//! Seminar entity - A yearly continuing-education program offering.
//!
//! Seminars are never physically deleted; their lifecycle is carried by `status`.
//! `enrolled_count` and `held_count` are the store-level capacity counters that enrollment
//! and waitlist promotion update with conditional writes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a seminar offering
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SeminarStatus {
    /// Scheduled, accepting enrollments
    #[sea_orm(string_value = "upcoming")]
    Upcoming,
    /// Sessions are under way, still accepting enrollments
    #[sea_orm(string_value = "active")]
    Active,
    /// All sessions held
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Called off
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SeminarStatus {
    /// Stored string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether new registrations and waitlist holds are allowed
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Upcoming | Self::Active)
    }
}

/// Seminar database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seminars")]
pub struct Model {
    /// Unique identifier for the seminar
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display title (e.g., "Monthly Seminar 2026")
    pub title: String,
    /// Program year
    pub year: i32,
    /// Maximum number of active or completed registrations
    pub capacity: i32,
    /// Tuition per registration in dollars
    pub tuition: f64,
    /// Lifecycle status
    pub status: SeminarStatus,
    /// Registrations currently in `active` or `completed` status
    pub enrolled_count: i32,
    /// Seats reserved by notified waitlist entries
    pub held_count: i32,
    /// When the seminar was created
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Seats not taken by registrations or live holds
    #[must_use]
    pub fn available_spots(&self) -> i32 {
        (self.capacity - self.enrolled_count - self.held_count).max(0)
    }
}

/// Defines relationships between Seminar and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One seminar has ten sessions
    #[sea_orm(has_many = "super::session::Entity")]
    Sessions,
    /// One seminar has many registrations
    #[sea_orm(has_many = "super::registration::Entity")]
    Registrations,
    /// One seminar has a waitlist
    #[sea_orm(has_many = "super::waitlist::Entity")]
    Waitlist,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl Related<super::registration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Registrations.def()
    }
}

impl Related<super::waitlist::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Waitlist.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
