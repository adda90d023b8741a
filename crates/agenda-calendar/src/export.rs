//! `.ics` exports backed by the store.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

use agenda_core::{EngineError, EngineResult};
use agenda_store::{AppointmentStatus, RangeQuery, Store};

use crate::ics::IcsSerializer;

/// Content type for `.ics` responses.
pub const CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// A rendered calendar file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcsExport {
    pub content: String,
    pub file_name: String,
}

impl IcsExport {
    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// `Content-Disposition` header value for a download.
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

pub struct IcsExporter {
    store: Arc<dyn Store>,
    serializer: IcsSerializer,
}

impl IcsExporter {
    pub fn new(store: Arc<dyn Store>, serializer: IcsSerializer) -> Self {
        Self { store, serializer }
    }

    pub fn serializer(&self) -> &IcsSerializer {
        &self.serializer
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn export_appointment(&self, appointment_id: &str) -> EngineResult<IcsExport> {
        let details = self
            .store
            .find_appointment(appointment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;

        Ok(IcsExport {
            content: self.serializer.serialize_event(&details)?,
            file_name: format!("appointment-{}.ics", file_segment(appointment_id)),
        })
    }

    /// A patient's scheduled and confirmed appointments.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn export_patient(&self, patient_id: &str) -> EngineResult<IcsExport> {
        if self.store.find_patient(patient_id).await?.is_none() {
            return Err(EngineError::not_found("Patient", patient_id));
        }

        let appointments = self
            .store
            .find_appointments_by_patient(patient_id, &AppointmentStatus::PATIENT_EXPORT)
            .await?;
        if appointments.is_empty() {
            return Err(EngineError::EmptyResult(format!(
                "No upcoming appointments for patient {}",
                patient_id
            )));
        }

        Ok(IcsExport {
            content: self.serializer.serialize_events(&appointments)?,
            file_name: format!("patient-{}-appointments.ics", file_segment(patient_id)),
        })
    }

    /// Appointments starting between `start` and `end` inclusive, optionally
    /// for one user.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn export_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> EngineResult<IcsExport> {
        if end < start {
            return Err(EngineError::EmptyResult(
                "Range end is before its start".to_string(),
            ));
        }

        let appointments = self
            .store
            .find_appointments_by_range(&RangeQuery {
                start,
                end,
                user_id,
                statuses: &AppointmentStatus::RANGE_EXPORT,
            })
            .await?;
        if appointments.is_empty() {
            return Err(EngineError::EmptyResult(
                "No appointments in range".to_string(),
            ));
        }

        let offset = self.serializer.offset()?;
        let start_day = start.with_timezone(&offset).format("%Y-%m-%d");
        let end_day = end.with_timezone(&offset).format("%Y-%m-%d");
        let file_name = match user_id {
            Some(user) => format!(
                "appointments-{}-{}-{}.ics",
                file_segment(user),
                start_day,
                end_day
            ),
            None => format!("appointments-{}-{}.ics", start_day, end_day),
        };

        Ok(IcsExport {
            content: self.serializer.serialize_events(&appointments)?,
            file_name,
        })
    }

    /// Whole clinic-local days, from the start of `first` to the end of `last`.
    pub async fn export_days(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        user_id: Option<&str>,
    ) -> EngineResult<IcsExport> {
        let offset = self.serializer.offset()?;
        let local_midnight = |day: NaiveDate| {
            offset
                .from_local_datetime(&day.and_time(NaiveTime::MIN))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| EngineError::EmptyResult(format!("Invalid day: {}", day)))
        };

        let start = local_midnight(first)?;
        let end = local_midnight(last)? + Duration::days(1) - Duration::milliseconds(1);
        self.export_range(start, end, user_id).await
    }
}

/// Keep identifiers safe inside a file name.
fn file_segment(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
