//! SQLite implementation of [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;

use agenda_core::{DatabaseError, RusqliteErrorExt};

use crate::models::{
    AccountDetails, Appointment, AppointmentDetails, AppointmentStatus, CalendarIntegration,
    CalendarProvider, NewIntegration, Patient, SyncUpdate, UnknownVariant, User,
};
use crate::store::{RangeQuery, Store, StoreResult};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    email TEXT
);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    location TEXT,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'SCHEDULED',
    user_id TEXT NOT NULL REFERENCES users(id),
    patient_id TEXT NOT NULL REFERENCES patients(id),
    google_event_id TEXT,
    sync_status TEXT NOT NULL DEFAULT 'PENDING',
    sync_error TEXT,
    last_sync_ms INTEGER
);

CREATE TABLE IF NOT EXISTS calendar_integrations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    token_expiry_ms INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    sync_status TEXT NOT NULL DEFAULT 'ACTIVE',
    sync_error TEXT,
    last_sync_ms INTEGER,
    calendar_id TEXT,
    calendar_name TEXT,
    email TEXT,
    created_ms INTEGER NOT NULL,
    updated_ms INTEGER NOT NULL,
    UNIQUE (user_id, provider)
);

CREATE INDEX IF NOT EXISTS idx_appointments_start ON appointments(start_ms);
CREATE INDEX IF NOT EXISTS idx_appointments_user ON appointments(user_id);
CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id);
"#;

const INTEGRATION_COLUMNS: &str = "id, user_id, provider, access_token, refresh_token, \
     token_expiry_ms, is_active, sync_status, sync_error, last_sync_ms, calendar_id, \
     calendar_name, email, created_ms, updated_ms";

const APPOINTMENT_SELECT: &str = r#"
SELECT a.id, a.title, a.description, a.location, a.start_ms, a.end_ms, a.status,
       a.user_id, a.patient_id, a.google_event_id, a.sync_status, a.sync_error, a.last_sync_ms,
       u.name, u.email, p.full_name, p.email
FROM appointments a
JOIN users u ON u.id = a.user_id
JOIN patients p ON p.id = a.patient_id
"#;

/// SQLite-backed store. The connection is shared behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        tracing::debug!("Opened agenda database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.with_conn(|conn| conn.execute_batch(SCHEMA))?;
        Ok(store)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(RusqliteErrorExt::into_database_error)
    }

    pub fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)",
                params![user.id, user.name, user.email],
            )
        })?;
        Ok(())
    }

    pub fn insert_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO patients (id, full_name, email) VALUES (?1, ?2, ?3)",
                params![patient.id, patient.full_name, patient.email],
            )
        })?;
        Ok(())
    }

    /// Insert an appointment, sync fields included.
    pub fn insert_appointment(&self, appointment: &Appointment) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO appointments
                (id, title, description, location, start_ms, end_ms, status, user_id, patient_id,
                 google_event_id, sync_status, sync_error, last_sync_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    appointment.id,
                    appointment.title,
                    appointment.description,
                    appointment.location,
                    appointment.start_time.timestamp_millis(),
                    appointment.end_time.timestamp_millis(),
                    appointment.status.as_str(),
                    appointment.user_id,
                    appointment.patient_id,
                    appointment.google_event_id,
                    appointment.sync_status.as_str(),
                    appointment.sync_error,
                    appointment.last_sync_at.map(|t| t.timestamp_millis()),
                ],
            )
        })?;
        Ok(())
    }

    fn query_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        active_only: bool,
    ) -> StoreResult<Option<CalendarIntegration>> {
        let mut sql = format!(
            "SELECT {} FROM calendar_integrations WHERE user_id = ?1 AND provider = ?2",
            INTEGRATION_COLUMNS
        );
        if active_only {
            sql.push_str(" AND is_active = 1");
        }

        self.with_conn(|conn| {
            conn.query_row(&sql, params![user_id, provider.as_str()], row_to_integration)
                .optional()
        })
    }

    fn query_appointments(
        &self,
        filter: &str,
        values: Vec<Value>,
    ) -> StoreResult<Vec<AppointmentDetails>> {
        let sql = format!(
            "{} WHERE {} ORDER BY a.start_ms ASC, a.id ASC",
            APPOINTMENT_SELECT, filter
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_details)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_active_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<Option<CalendarIntegration>> {
        self.query_integration(user_id, provider, true)
    }

    async fn find_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<Option<CalendarIntegration>> {
        self.query_integration(user_id, provider, false)
    }

    async fn upsert_integration(&self, new: &NewIntegration) -> StoreResult<CalendarIntegration> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO calendar_integrations
                (id, user_id, provider, access_token, refresh_token, token_expiry_ms,
                 is_active, sync_status, created_ms, updated_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 'ACTIVE', ?7, ?7)
                ON CONFLICT (user_id, provider) DO UPDATE SET
                    id = excluded.id,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_expiry_ms = excluded.token_expiry_ms,
                    is_active = 1,
                    sync_status = 'ACTIVE',
                    sync_error = NULL,
                    last_sync_ms = NULL,
                    calendar_id = NULL,
                    calendar_name = NULL,
                    email = NULL,
                    created_ms = excluded.created_ms,
                    updated_ms = excluded.updated_ms
                "#,
                params![
                    id,
                    new.user_id,
                    new.provider.as_str(),
                    new.access_token,
                    new.refresh_token,
                    new.token_expiry.timestamp_millis(),
                    now,
                ],
            )
        })?;

        self.query_integration(&new.user_id, new.provider, false)?
            .ok_or_else(|| {
                DatabaseError::QueryFailed(format!(
                    "integration for user {} vanished after upsert",
                    new.user_id
                ))
            })
    }

    async fn update_integration_tokens(
        &self,
        integration_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE calendar_integrations
                SET access_token = ?1, refresh_token = ?2, token_expiry_ms = ?3, updated_ms = ?4
                WHERE id = ?5
                "#,
                params![
                    access_token,
                    refresh_token,
                    token_expiry.timestamp_millis(),
                    now,
                    integration_id
                ],
            )
        })?;
        expect_changed(changed, "integration", integration_id)
    }

    async fn mark_integration_error(
        &self,
        integration_id: &str,
        message: &str,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE calendar_integrations
                SET sync_status = 'ERROR', sync_error = ?1, updated_ms = ?2
                WHERE id = ?3
                "#,
                params![message, now, integration_id],
            )
        })?;
        expect_changed(changed, "integration", integration_id)
    }

    async fn deactivate_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<bool> {
        let now = Utc::now().timestamp_millis();
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE calendar_integrations
                SET is_active = 0, sync_status = 'DISABLED', updated_ms = ?1
                WHERE user_id = ?2 AND provider = ?3
                "#,
                params![now, user_id, provider.as_str()],
            )
        })?;
        Ok(changed > 0)
    }

    async fn record_integration_sync(
        &self,
        integration_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE calendar_integrations SET last_sync_ms = ?1, updated_ms = ?1 WHERE id = ?2",
                params![at.timestamp_millis(), integration_id],
            )
        })?;
        Ok(())
    }

    async fn update_integration_account(
        &self,
        integration_id: &str,
        details: &AccountDetails,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE calendar_integrations
                SET calendar_id = ?1, calendar_name = ?2, email = ?3, updated_ms = ?4
                WHERE id = ?5
                "#,
                params![
                    details.calendar_id,
                    details.calendar_name,
                    details.email,
                    now,
                    integration_id
                ],
            )
        })?;
        expect_changed(changed, "integration", integration_id)
    }

    async fn find_appointment(
        &self,
        appointment_id: &str,
    ) -> StoreResult<Option<AppointmentDetails>> {
        let sql = format!("{} WHERE a.id = ?1", APPOINTMENT_SELECT);
        self.with_conn(|conn| {
            conn.query_row(&sql, params![appointment_id], row_to_details)
                .optional()
        })
    }

    async fn find_patient(&self, patient_id: &str) -> StoreResult<Option<Patient>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, full_name, email FROM patients WHERE id = ?1",
                params![patient_id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        full_name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    async fn find_appointments_by_patient(
        &self,
        patient_id: &str,
        statuses: &[AppointmentStatus],
    ) -> StoreResult<Vec<AppointmentDetails>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = vec![Value::Text(patient_id.to_string())];
        values.extend(status_values(statuses));
        let filter = format!(
            "a.patient_id = ? AND a.status IN ({})",
            placeholders(statuses.len())
        );
        self.query_appointments(&filter, values)
    }

    async fn find_appointments_by_range(
        &self,
        query: &RangeQuery<'_>,
    ) -> StoreResult<Vec<AppointmentDetails>> {
        if query.statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut filter = String::from("a.start_ms >= ? AND a.start_ms <= ?");
        let mut values = vec![
            Value::Integer(query.start.timestamp_millis()),
            Value::Integer(query.end.timestamp_millis()),
        ];
        if let Some(user_id) = query.user_id {
            filter.push_str(" AND a.user_id = ?");
            values.push(Value::Text(user_id.to_string()));
        }
        filter.push_str(&format!(
            " AND a.status IN ({})",
            placeholders(query.statuses.len())
        ));
        values.extend(status_values(query.statuses));

        self.query_appointments(&filter, values)
    }

    async fn update_appointment_sync(
        &self,
        appointment_id: &str,
        update: &SyncUpdate,
    ) -> StoreResult<()> {
        let changed = self.with_conn(|conn| match update {
            SyncUpdate::Synced { remote_event_id, at } => conn.execute(
                r#"
                UPDATE appointments
                SET google_event_id = ?1, sync_status = 'SYNCED', sync_error = NULL,
                    last_sync_ms = ?2
                WHERE id = ?3
                "#,
                params![remote_event_id, at.timestamp_millis(), appointment_id],
            ),
            SyncUpdate::Failed { error } => conn.execute(
                "UPDATE appointments SET sync_status = 'FAILED', sync_error = ?1 WHERE id = ?2",
                params![error, appointment_id],
            ),
            SyncUpdate::Cleared { at } => conn.execute(
                r#"
                UPDATE appointments
                SET google_event_id = NULL, sync_status = 'PENDING', sync_error = NULL,
                    last_sync_ms = COALESCE(?1, last_sync_ms)
                WHERE id = ?2
                "#,
                params![at.map(|t| t.timestamp_millis()), appointment_id],
            ),
        })?;
        expect_changed(changed, "appointment", appointment_id)
    }

    async fn reset_user_appointment_sync(&self, user_id: &str) -> StoreResult<u64> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE appointments
                SET google_event_id = NULL, sync_status = 'PENDING', sync_error = NULL
                WHERE user_id = ?1
                "#,
                params![user_id],
            )
        })?;
        tracing::debug!("Reset sync state of {} appointments for user {}", changed, user_id);
        Ok(changed as u64)
    }
}

fn expect_changed(changed: usize, entity: &str, id: &str) -> StoreResult<()> {
    if changed == 0 {
        return Err(DatabaseError::QueryFailed(format!(
            "{} {} does not exist",
            entity, id
        )));
    }
    Ok(())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn status_values(statuses: &[AppointmentStatus]) -> impl Iterator<Item = Value> + '_ {
    statuses.iter().map(|s| Value::Text(s.as_str().to_string()))
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_integration(row: &Row<'_>) -> rusqlite::Result<CalendarIntegration> {
    Ok(CalendarIntegration {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: parse_column(row, 2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        token_expiry: from_ms(row.get(5)?),
        is_active: row.get::<_, i32>(6)? != 0,
        sync_status: parse_column(row, 7)?,
        sync_error: row.get(8)?,
        last_sync_at: row.get::<_, Option<i64>>(9)?.map(from_ms),
        calendar_id: row.get(10)?,
        calendar_name: row.get(11)?,
        email: row.get(12)?,
        created_at: from_ms(row.get(13)?),
        updated_at: from_ms(row.get(14)?),
    })
}

fn row_to_details(row: &Row<'_>) -> rusqlite::Result<AppointmentDetails> {
    let appointment = Appointment {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        location: row.get(3)?,
        start_time: from_ms(row.get(4)?),
        end_time: from_ms(row.get(5)?),
        status: parse_column(row, 6)?,
        user_id: row.get(7)?,
        patient_id: row.get(8)?,
        google_event_id: row.get(9)?,
        sync_status: parse_column(row, 10)?,
        sync_error: row.get(11)?,
        last_sync_at: row.get::<_, Option<i64>>(12)?.map(from_ms),
    };
    let owner = User {
        id: appointment.user_id.clone(),
        name: row.get(13)?,
        email: row.get(14)?,
    };
    let patient = Patient {
        id: appointment.patient_id.clone(),
        full_name: row.get(15)?,
        email: row.get(16)?,
    };

    Ok(AppointmentDetails {
        appointment,
        owner,
        patient,
    })
}
