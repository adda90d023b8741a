//! Google Calendar sync and iCalendar export for clinic appointments.
//!
//! [`CalendarService`] is the surface the route layer uses. Underneath it,
//! [`SyncEngine`] pushes appointments through a [`CalendarGateway`] and
//! [`IcsExporter`] renders them with [`IcsSerializer`].

pub mod client;
pub mod error;
pub mod export;
pub mod gateway;
pub mod ics;
pub mod locks;
pub mod service;
pub mod sync;
pub mod types;

pub use client::GoogleCalendarClient;
pub use error::CalendarError;
pub use export::{IcsExport, IcsExporter, CONTENT_TYPE};
pub use gateway::CalendarGateway;
pub use ics::IcsSerializer;
pub use locks::SyncLocks;
pub use service::{CalendarService, DisconnectOutcome, IntegrationStatusView};
pub use sync::{SyncAction, SyncEngine, SyncOutcome};
pub use types::{AccessRole, Calendar, EventPayload};
