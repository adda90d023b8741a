//! Clinic data access for the agenda engine.
//!
//! Provides the record types, the [`Store`] interface and a SQLite backend.

pub mod models;
pub mod sqlite;
pub mod store;

pub use models::{
    AccountDetails, Appointment, AppointmentDetails, AppointmentStatus, CalendarIntegration,
    CalendarProvider, IntegrationStatus, NewIntegration, Patient, SyncStatus, SyncUpdate,
    UnknownVariant, User,
};
pub use sqlite::SqliteStore;
pub use store::{RangeQuery, Store, StoreResult};
