//! Session entity - One of the scheduled meetings of a seminar.
//!
//! `sequence` orders the sessions within a seminar and is unique per seminar
//! (enforced by the `idx_sessions_seminar_sequence` index).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Session database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Unique identifier for the session
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Seminar this session belongs to
    pub seminar_id: i64,
    /// Position in the program, 1 through the program length
    pub sequence: i32,
    /// Calendar date of the meeting
    pub date: Date,
    /// Start time
    pub start_time: Time,
    /// End time
    pub end_time: Time,
    /// Topic of the lecture
    pub topic: String,
    /// Seats in the room
    pub capacity: i32,
}

/// Defines relationships between Session and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each session belongs to one seminar
    #[sea_orm(
        belongs_to = "super::seminar::Entity",
        from = "Column::SeminarId",
        to = "super::seminar::Column::Id"
    )]
    Seminar,
    /// One session has many check-ins
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
