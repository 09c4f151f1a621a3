//! Registration entity - A user's enrollment in a seminar.
//!
//! `sessions_completed` and `sessions_remaining` are a cache of the attendance rows; the
//! check-in state machine is their only writer and `reconcile_progress` can rebuild them.
//! `code` is the scannable QR payload and is unique across all seminars.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RegistrationStatus {
    /// Enrolled and attending
    #[sea_orm(string_value = "active")]
    Active,
    /// Reached the completion threshold
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Cancelled by the participant or an administrator
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl RegistrationStatus {
    /// Stored string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the registration occupies a seat
    #[must_use]
    pub const fn holds_seat(self) -> bool {
        matches!(self, Self::Active | Self::Completed)
    }
}

/// Registration database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "registrations")]
pub struct Model {
    /// Unique identifier for the registration
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Seminar enrolled in
    pub seminar_id: i64,
    /// Participant; `None` for guest checkout until backfilled
    pub user_id: Option<i64>,
    /// Originating order reference
    pub order_id: i64,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Scannable check-in code
    #[sea_orm(unique)]
    pub code: String,
    /// Sessions attended so far
    pub sessions_completed: i32,
    /// Sessions left in the program, never below zero
    pub sessions_remaining: i32,
    /// Whether the single makeup session has been used
    pub makeup_used: bool,
    /// Number of code scans, informational only
    pub scan_count: i32,
    /// When the registration was created
    pub created_at: DateTimeUtc,
    /// When the registration was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Registration and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each registration belongs to one seminar
    #[sea_orm(
        belongs_to = "super::seminar::Entity",
        from = "Column::SeminarId",
        to = "super::seminar::Column::Id"
    )]
    Seminar,
    /// One registration has many check-ins
    #[sea_orm(has_many = "super::attendance::Entity")]
    Attendance,
}

impl Related<super::seminar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Seminar.def()
    }
}

impl Related<super::attendance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attendance.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
