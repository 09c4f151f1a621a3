//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod attendance;
pub mod credit_ledger;
pub mod registration;
pub mod seminar;
pub mod session;
pub mod system_state;
pub mod waitlist;

// Re-export specific types to avoid conflicts
pub use attendance::{
    CheckInMethod, Column as AttendanceColumn, Entity as Attendance, Model as AttendanceModel,
};
pub use credit_ledger::{
    Column as CreditLedgerColumn, Entity as CreditLedger, LedgerType, Model as LedgerEntry,
};
pub use registration::{
    Column as RegistrationColumn, Entity as Registration, Model as RegistrationModel,
    RegistrationStatus,
};
pub use seminar::{Column as SeminarColumn, Entity as Seminar, Model as SeminarModel, SeminarStatus};
pub use session::{Column as SessionColumn, Entity as Session, Model as SessionModel};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
pub use waitlist::{
    Column as WaitlistColumn, Entity as Waitlist, Model as WaitlistModel, WaitlistStatus,
};
