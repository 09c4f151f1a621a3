//! Waitlist entity - A position in a seminar's waiting queue.
//!
//! `position` is the fixed join order within a seminar and is never reused. The live rank
//! among waiting entries is computed on read.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Waitlist entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum WaitlistStatus {
    /// In the queue
    #[sea_orm(string_value = "waiting")]
    Waiting,
    /// Offered a seat, hold running until `expires_at`
    #[sea_orm(string_value = "notified")]
    Notified,
    /// Turned into a registration
    #[sea_orm(string_value = "converted")]
    Converted,
    /// Hold lapsed
    #[sea_orm(string_value = "expired")]
    Expired,
    /// Withdrawn by the contact or an administrator
    #[sea_orm(string_value = "removed")]
    Removed,
}

impl WaitlistStatus {
    /// Stored string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Notified => "notified",
            Self::Converted => "converted",
            Self::Expired => "expired",
            Self::Removed => "removed",
        }
    }

    /// No transition leaves a terminal status
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converted | Self::Expired | Self::Removed)
    }
}

/// Waitlist database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "waitlist")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Seminar being waited for
    pub seminar_id: i64,
    /// Contact name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Contact phone
    pub phone: Option<String>,
    /// Known user, if the contact has an account
    pub user_id: Option<i64>,
    /// Join order within the seminar
    pub position: i32,
    /// Current status
    pub status: WaitlistStatus,
    /// When the contact joined
    pub created_at: DateTimeUtc,
    /// When the seat was offered
    pub notified_at: Option<DateTimeUtc>,
    /// End of the hold, set only while `notified`
    pub expires_at: Option<DateTimeUtc>,
    /// Registration created on conversion
    pub registration_id: Option<i64>,
}

/// Defines relationships between Waitlist and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one seminar
    #[sea_orm(
        belongs_to = "super::seminar::Entity",
        from = "Column::SeminarId",
        to = "super::seminar::Column::Id"
    )]
    Seminar,
}

impl Related<super::seminar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Seminar.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
