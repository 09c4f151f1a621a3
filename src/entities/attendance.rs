//! Attendance entity - One successful check-in of a registration at a session.
//!
//! The composite primary key (`registration_id`, `session_id`) is the store-level guarantee
//! that a registration is checked in to a session at most once. Rows are never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a check-in was recorded
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CheckInMethod {
    /// Scanned QR code or typed lookup code
    #[sea_orm(string_value = "qr_scan")]
    #[default]
    QrScan,
    /// Entered by an administrator
    #[sea_orm(string_value = "manual")]
    Manual,
}

/// Attendance database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attendance")]
pub struct Model {
    /// Registration that checked in
    #[sea_orm(primary_key, auto_increment = false)]
    pub registration_id: i64,
    /// Session attended
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: i64,
    /// When the check-in happened
    pub checked_in_at: DateTimeUtc,
    /// CE credits granted for this session
    pub credits_awarded: i32,
    /// Whether this attendance used the registration's makeup allowance
    pub is_makeup: bool,
    /// How the check-in was recorded
    pub method: CheckInMethod,
    /// Free-text notes from the check-in desk
    pub notes: Option<String>,
}

/// Defines relationships between Attendance and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each check-in belongs to one registration
    #[sea_orm(
        belongs_to = "super::registration::Entity",
        from = "Column::RegistrationId",
        to = "super::registration::Column::Id"
    )]
    Registration,
    /// Each check-in belongs to one session
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::SessionId",
        to = "super::session::Column::Id"
    )]
    Session,
}

impl Related<super::registration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Registration.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
