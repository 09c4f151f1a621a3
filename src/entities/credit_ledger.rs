//! Credit ledger entity - Append-only CE credit transactions.
//!
//! A user's credit total is the sum of their entries. Entries are never updated or deleted;
//! corrections are new entries with a negative amount.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of credit transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum LedgerType {
    /// Credit earned by checking in to a session
    #[sea_orm(string_value = "session_attendance")]
    SessionAttendance,
    /// Administrator grant or deduction
    #[sea_orm(string_value = "manual_adjustment")]
    ManualAdjustment,
    /// Compensating entry that reverses an earlier attendance award
    #[sea_orm(string_value = "correction")]
    Correction,
}

/// Credit ledger database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_ledger")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User the credits belong to
    pub user_id: i64,
    /// Optional session or event the entry refers to
    pub event_ref: Option<i64>,
    /// Signed credit amount
    pub credits: i32,
    /// Kind of transaction
    pub transaction_type: LedgerType,
    /// Free-text note for the audit trail
    pub note: String,
    /// When the entry was written
    pub created_at: DateTimeUtc,
}

/// Ledger entries stand alone
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
