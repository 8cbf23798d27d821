use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::recurrence::{expand_occurrences, reconcile, CalendarEntry};
use super::SchedulingError;
use crate::db::repository;
use crate::models::{Treatment, TreatmentStatus};

/// Sessions are shown as one-hour blocks.
pub const EVENT_DURATION_MINUTES: i64 = 60;

pub const COLOR_SCHEDULED: &str = "#3498db";
pub const COLOR_COMPLETED: &str = "#2ecc71";
pub const COLOR_CANCELLED: &str = "#e74c3c";
pub const COLOR_VIRTUAL: &str = "#9b59b6";

/// Calendar event in the shape the practice calendar consumes.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: TreatmentStatus,
    pub color: &'static str,
    pub is_virtual: bool,
    pub treatment_id: Option<Uuid>,
    pub recurring_id: Option<Uuid>,
    pub patient_id: Uuid,
}

impl CalendarEvent {
    pub fn from_treatment(t: &Treatment, patient_name: &str) -> Self {
        Self {
            id: t.id.to_string(),
            title: format!("{patient_name} - {}", t.treatment_type),
            start: t.created_at,
            end: t.created_at + Duration::minutes(EVENT_DURATION_MINUTES),
            status: t.status,
            color: status_color(t.status),
            is_virtual: false,
            treatment_id: Some(t.id),
            recurring_id: t.recurring_id,
            patient_id: t.patient_id,
        }
    }

    fn virtual_occurrence(rule_id: Uuid, patient_id: Uuid, title: String, at: NaiveDateTime) -> Self {
        Self {
            id: format!("recurring-{rule_id}-{}", at.format("%Y%m%d%H%M")),
            title,
            start: at,
            end: at + Duration::minutes(EVENT_DURATION_MINUTES),
            status: TreatmentStatus::Scheduled,
            color: COLOR_VIRTUAL,
            is_virtual: true,
            treatment_id: None,
            recurring_id: Some(rule_id),
            patient_id,
        }
    }
}

pub fn status_color(status: TreatmentStatus) -> &'static str {
    match status {
        TreatmentStatus::Scheduled => COLOR_SCHEDULED,
        TreatmentStatus::Completed => COLOR_COMPLETED,
        TreatmentStatus::Cancelled => COLOR_CANCELLED,
    }
}

/// Every real treatment of the user's patients in `[start, end)` plus the
/// not-yet-materialized occurrences of their active recurring rules, sorted
/// by start time.
pub fn calendar_feed(
    conn: &Connection,
    user_id: &Uuid,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<CalendarEvent>, SchedulingError> {
    if end <= start {
        return Ok(Vec::new());
    }

    let real = repository::list_treatments_in_window(conn, user_id, &start, &end)?;
    let mut events: Vec<CalendarEvent> = real
        .iter()
        .map(|(t, name)| CalendarEvent::from_treatment(t, name))
        .collect();

    // Occurrences share the window bounds, so the real rows are enough to
    // reconcile against.
    let existing: Vec<Treatment> = real.iter().map(|(t, _)| t.clone()).collect();

    let rules = repository::list_recurring(conn, user_id, true)?;
    for (rule, patient_name) in &rules {
        let occurrences = expand_occurrences(rule, start, end);
        for entry in reconcile(rule, &occurrences, &existing) {
            if let CalendarEntry::Virtual { at } = entry {
                events.push(CalendarEvent::virtual_occurrence(
                    rule.id,
                    rule.patient_id,
                    format!("{patient_name} - {}", rule.treatment_type),
                    at,
                ));
            }
        }
    }

    events.sort_by(|a, b| a.start.cmp(&b.start).then(a.is_virtual.cmp(&b.is_virtual)));
    tracing::debug!(
        user_id = %user_id,
        real = real.len(),
        total = events.len(),
        "Built calendar feed"
    );
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{insert_patient, insert_recurring, insert_treatment, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, RecurrenceType, RecurringAppointment, User, UserRole};
    use chrono::{NaiveDate, NaiveTime};

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn setup() -> (Connection, Uuid, Patient) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Marta");
        insert_patient(&conn, &FieldKey::from_bytes([2u8; 32]), &patient).unwrap();
        (conn, user.id, patient)
    }

    #[test]
    fn feed_merges_real_and_virtual_without_duplicates() {
        let (conn, user_id, patient) = setup();
        let rule = RecurringAppointment::new(
            patient.id,
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            RecurrenceType::Weekly,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            "Rehab",
        );
        insert_recurring(&conn, &rule).unwrap();

        let mut materialized = Treatment::new(patient.id, "Rehab", dt(2024, 3, 13, 10));
        materialized.recurring_id = Some(rule.id);
        materialized.status = TreatmentStatus::Completed;
        insert_treatment(&conn, &materialized).unwrap();
        insert_treatment(&conn, &Treatment::new(patient.id, "Assessment", dt(2024, 3, 8, 9))).unwrap();

        let events = calendar_feed(&conn, &user_id, dt(2024, 3, 1, 0), dt(2024, 3, 21, 0)).unwrap();

        let summary: Vec<(u32, bool)> = events
            .iter()
            .map(|e| (chrono::Datelike::day(&e.start), e.is_virtual))
            .collect();
        assert_eq!(summary, vec![(6, true), (8, false), (13, false), (20, true)]);

        let completed = &events[2];
        assert_eq!(completed.color, COLOR_COMPLETED);
        assert_eq!(completed.title, "Marta - Rehab");
        assert_eq!(completed.end - completed.start, Duration::minutes(60));
        assert_eq!(events[0].color, COLOR_VIRTUAL);
        assert_eq!(events[0].recurring_id, Some(rule.id));
    }

    #[test]
    fn virtual_slots_respect_an_afternoon_window_start() {
        let (conn, user_id, patient) = setup();
        let rule = RecurringAppointment::new(
            patient.id,
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            RecurrenceType::DailyMonFri,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            "Rehab",
        );
        insert_recurring(&conn, &rule).unwrap();

        let events = calendar_feed(&conn, &user_id, dt(2024, 3, 4, 15), dt(2024, 3, 6, 0)).unwrap();
        let starts: Vec<NaiveDateTime> = events.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![dt(2024, 3, 5, 10)]);
    }

    #[test]
    fn inverted_window_is_empty() {
        let (conn, user_id, _) = setup();
        assert!(calendar_feed(&conn, &user_id, dt(2024, 3, 2, 0), dt(2024, 3, 1, 0)).unwrap().is_empty());
    }
}
