//! RFC 5545 iCalendar rendering of appointments.
//!
//! Output is pure text: one VCALENDAR holding a VTIMEZONE for the clinic's
//! fixed offset and one VEVENT per appointment. Every content line ends with
//! CRLF and lines over 75 octets are folded without splitting a UTF-8
//! character.

use chrono::{DateTime, FixedOffset, Utc};

use agenda_core::{CalendarConfig, ConfigError, EngineError, EngineResult, ReminderConfig};
use agenda_store::{AppointmentDetails, AppointmentStatus};

/// Maximum octets in a content line, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 75;

const CRLF: &str = "\r\n";

/// Escape a TEXT value: backslash, semicolon, comma, then newlines. A bare
/// CR counts as a newline.
pub fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\\n")
}

/// Inverse of [`escape_text`].
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other @ ('\\' | ';' | ',')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Fold one content line (given without its CRLF).
///
/// The first segment holds up to 75 octets; each continuation is CRLF, a
/// space, and up to 74 octets, so no physical line exceeds 75 octets.
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + (line.len() / (MAX_LINE_OCTETS - 1)) * 3);
    let mut limit = MAX_LINE_OCTETS;
    let mut used = 0;

    for ch in line.chars() {
        let width = ch.len_utf8();
        if used + width > limit {
            out.push_str(CRLF);
            out.push(' ');
            used = 0;
            limit = MAX_LINE_OCTETS - 1;
        }
        out.push(ch);
        used += width;
    }

    out
}

/// Remove every fold (CRLF followed by one space or tab).
pub fn unfold(text: &str) -> String {
    text.replace("\r\n ", "").replace("\r\n\t", "")
}

/// `YYYYMMDDTHHMMSSZ`
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Local wall-clock time in basic format, no `Z`.
fn format_local(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant
        .with_timezone(&offset)
        .format("%Y%m%dT%H%M%S")
        .to_string()
}

/// `-0300` style offset.
fn format_utc_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.abs();
    format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
}

/// Parameter values may not contain DQUOTE; ones with `:`, `;` or `,` are quoted.
fn param_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    if cleaned.contains(&[':', ';', ','][..]) {
        format!("\"{}\"", cleaned)
    } else {
        cleaned
    }
}

fn event_status(status: AppointmentStatus) -> &'static str {
    match status {
        AppointmentStatus::Scheduled => "TENTATIVE",
        AppointmentStatus::Confirmed | AppointmentStatus::Completed => "CONFIRMED",
        AppointmentStatus::Cancelled | AppointmentStatus::NoShow => "CANCELLED",
    }
}

/// Relative trigger before the start, e.g. `-P1D`, `-PT1H`, `-PT15M`.
fn alarm_trigger(minutes: u32) -> String {
    if minutes == 0 {
        "PT0M".to_string()
    } else if minutes % (24 * 60) == 0 {
        format!("-P{}D", minutes / (24 * 60))
    } else if minutes % 60 == 0 {
        format!("-PT{}H", minutes / 60)
    } else {
        format!("-PT{}M", minutes)
    }
}

fn alarm_lead(minutes: u32) -> String {
    match minutes {
        0 => "now".to_string(),
        1440 => "tomorrow".to_string(),
        60 => "in 1 hour".to_string(),
        m if m % 1440 == 0 => format!("in {} days", m / 1440),
        m if m % 60 == 0 => format!("in {} hours", m / 60),
        m => format!("in {} minutes", m),
    }
}

/// Accumulates content lines, folding each and terminating it with CRLF.
#[derive(Default)]
struct ContentWriter {
    out: String,
}

impl ContentWriter {
    fn line(&mut self, line: &str) {
        self.out.push_str(&fold_line(line));
        self.out.push_str(CRLF);
    }

    fn property(&mut self, name: &str, value: &str) {
        self.line(&format!("{}:{}", name, value));
    }

    fn text(&mut self, name: &str, value: &str) {
        self.property(name, &escape_text(value));
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Renders appointments as iCalendar documents.
#[derive(Debug, Clone)]
pub struct IcsSerializer {
    config: CalendarConfig,
}

impl IcsSerializer {
    pub fn new(config: CalendarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    /// The clinic's fixed UTC offset.
    pub fn offset(&self) -> EngineResult<FixedOffset> {
        let minutes = self.config.time_zone.utc_offset_minutes;
        FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            EngineError::Config(ConfigError::Invalid(format!(
                "UTC offset out of range: {} minutes",
                minutes
            )))
        })
    }

    /// One appointment as a single-event calendar, stamped now.
    pub fn serialize_event(&self, appointment: &AppointmentDetails) -> EngineResult<String> {
        self.serialize_events_at(std::slice::from_ref(appointment), Utc::now())
    }

    /// Several appointments in one calendar, stamped now.
    pub fn serialize_events(&self, appointments: &[AppointmentDetails]) -> EngineResult<String> {
        self.serialize_events_at(appointments, Utc::now())
    }

    /// Several appointments in one calendar, in the given order, with an
    /// explicit DTSTAMP.
    pub fn serialize_events_at(
        &self,
        appointments: &[AppointmentDetails],
        stamp: DateTime<Utc>,
    ) -> EngineResult<String> {
        if appointments.is_empty() {
            return Err(EngineError::EmptyResult(
                "No appointments to export".to_string(),
            ));
        }
        for details in appointments {
            check_preconditions(details)?;
        }

        let tz = &self.config.time_zone;
        let offset = self.offset()?;

        let mut w = ContentWriter::default();
        w.property("BEGIN", "VCALENDAR");
        w.property("VERSION", "2.0");
        w.property("PRODID", &self.config.product_id);
        w.property("CALSCALE", "GREGORIAN");
        w.property("METHOD", "PUBLISH");
        w.text("X-WR-CALNAME", &self.config.calendar_name);
        w.property("X-WR-TIMEZONE", &tz.tzid);

        let tz_offset = format_utc_offset(tz.utc_offset_minutes);
        w.property("BEGIN", "VTIMEZONE");
        w.property("TZID", &tz.tzid);
        w.property("BEGIN", "STANDARD");
        w.property("DTSTART", "19700101T000000");
        w.property("TZOFFSETFROM", &tz_offset);
        w.property("TZOFFSETTO", &tz_offset);
        w.property("TZNAME", &tz.abbreviation);
        w.property("END", "STANDARD");
        w.property("END", "VTIMEZONE");

        let stamp = format_utc(stamp);
        for details in appointments {
            self.write_event(&mut w, details, &stamp, offset);
        }

        w.property("END", "VCALENDAR");
        Ok(w.finish())
    }

    fn write_event(
        &self,
        w: &mut ContentWriter,
        details: &AppointmentDetails,
        stamp: &str,
        offset: FixedOffset,
    ) {
        let appointment = &details.appointment;
        let tzid = &self.config.time_zone.tzid;

        w.property("BEGIN", "VEVENT");
        w.property(
            "UID",
            &format!("appointment-{}@{}", appointment.id, self.config.uid_domain),
        );
        w.property("DTSTAMP", stamp);
        w.property(
            &format!("DTSTART;TZID={}", tzid),
            &format_local(appointment.start_time, offset),
        );
        w.property(
            &format!("DTEND;TZID={}", tzid),
            &format_local(appointment.end_time, offset),
        );
        w.text("SUMMARY", &appointment.title);
        if let Some(description) = appointment.description.as_deref().filter(|d| !d.is_empty()) {
            w.text("DESCRIPTION", description);
        }
        if let Some(location) = appointment.location.as_deref().filter(|l| !l.is_empty()) {
            w.text("LOCATION", location);
        }
        w.property("STATUS", event_status(appointment.status));
        w.property(
            &format!("ORGANIZER;CN={}", param_value(&details.owner.name)),
            &format!("mailto:{}", details.owner.email),
        );
        if let Some(email) = details.patient.email.as_deref().filter(|e| !e.is_empty()) {
            w.property(
                &format!(
                    "ATTENDEE;CN={};RSVP=TRUE",
                    param_value(&details.patient.full_name)
                ),
                &format!("mailto:{}", email),
            );
        }

        for reminder in &self.config.reminders {
            write_alarm(w, &appointment.title, reminder);
        }

        w.property("END", "VEVENT");
    }
}

fn write_alarm(w: &mut ContentWriter, title: &str, reminder: &ReminderConfig) {
    w.property("BEGIN", "VALARM");
    w.property("ACTION", "DISPLAY");
    w.text(
        "DESCRIPTION",
        &format!("Reminder: {} {}", title, alarm_lead(reminder.minutes)),
    );
    w.property("TRIGGER", &alarm_trigger(reminder.minutes));
    w.property("END", "VALARM");
}

fn check_preconditions(details: &AppointmentDetails) -> EngineResult<()> {
    let appointment = &details.appointment;
    if appointment.title.trim().is_empty() {
        return Err(EngineError::SerializationPrecondition(format!(
            "appointment {} has no title",
            appointment.id
        )));
    }
    if appointment.end_time < appointment.start_time {
        return Err(EngineError::SerializationPrecondition(format!(
            "appointment {} ends before it starts",
            appointment.id
        )));
    }
    Ok(())
}
