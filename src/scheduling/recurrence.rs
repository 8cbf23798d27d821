use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;

use crate::models::{RecurrenceType, RecurringAppointment, Treatment};

/// Whether `day` is generated by the rule, ignoring time of day.
pub fn occurs_on(rule: &RecurringAppointment, day: NaiveDate) -> bool {
    if !rule.is_active || day < rule.start_date {
        return false;
    }
    if rule.end_date.is_some_and(|end| day > end) {
        return false;
    }
    match rule.recurrence_type {
        RecurrenceType::Weekly => day.weekday() == rule.start_date.weekday(),
        RecurrenceType::DailyMonFri => !matches!(day.weekday(), Weekday::Sat | Weekday::Sun),
    }
}

/// Candidate occurrence datetimes of `rule` inside the half-open window
/// `[window_start, window_end)`, ascending.
///
/// Days are walked from the window start's date and each candidate is kept
/// only when its datetime lies in the window; a window that is empty or
/// inverted yields nothing.
pub fn expand_occurrences(
    rule: &RecurringAppointment,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Vec<NaiveDateTime> {
    if window_end <= window_start || !rule.is_active {
        return Vec::new();
    }

    let mut day = window_start.date().max(rule.start_date);
    let mut out = Vec::new();
    while day.and_time(chrono::NaiveTime::MIN) < window_end {
        if rule.end_date.is_some_and(|end| day > end) {
            break;
        }
        if occurs_on(rule, day) {
            let at = day.and_time(rule.time_of_day);
            if window_start <= at && at < window_end {
                out.push(at);
            }
        }
        day += Duration::days(1);
    }
    out
}

/// One slot on the calendar: a persisted treatment or a computed occurrence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarEntry {
    Materialized(Treatment),
    Virtual {
        at: NaiveDateTime,
    },
}

impl CalendarEntry {
    pub fn start(&self) -> NaiveDateTime {
        match self {
            Self::Materialized(t) => t.created_at,
            Self::Virtual { at } => *at,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }
}

/// Pair each candidate with the treatment of the same patient at exactly
/// the same datetime, if one exists.
pub fn reconcile(
    rule: &RecurringAppointment,
    occurrences: &[NaiveDateTime],
    existing: &[Treatment],
) -> Vec<CalendarEntry> {
    occurrences
        .iter()
        .map(|at| {
            existing
                .iter()
                .find(|t| t.patient_id == rule.patient_id && t.created_at == *at)
                .map(|t| CalendarEntry::Materialized(t.clone()))
                .unwrap_or(CalendarEntry::Virtual { at: *at })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(0, 0, 0).unwrap()
    }

    fn rule(kind: RecurrenceType, start: NaiveDate) -> RecurringAppointment {
        RecurringAppointment::new(
            Uuid::new_v4(),
            start,
            kind,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            "Physio",
        )
    }

    #[test]
    fn weekly_rule_follows_start_weekday() {
        // 2024-03-06 is a Wednesday
        let r = rule(RecurrenceType::Weekly, date(2024, 3, 6));
        let got = expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 4, 1));
        let days: Vec<u32> = got.iter().map(|d| d.day()).collect();
        assert_eq!(days, vec![6, 13, 20, 27]);
        assert!(got.iter().all(|d| d.weekday() == Weekday::Wed));
        assert!(got.iter().all(|d| d.time() == NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
    }

    #[test]
    fn weekday_rule_skips_weekends() {
        let r = rule(RecurrenceType::DailyMonFri, date(2024, 3, 1));
        // Fri 1 .. Sun 10 (exclusive 11)
        let got = expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 3, 11));
        let days: Vec<u32> = got.iter().map(|d| d.day()).collect();
        assert_eq!(days, vec![1, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn rule_bounds_are_inclusive_window_end_exclusive() {
        let mut r = rule(RecurrenceType::DailyMonFri, date(2024, 3, 5));
        r.end_date = Some(date(2024, 3, 7));
        let got = expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 3, 31));
        let days: Vec<u32> = got.iter().map(|d| d.day()).collect();
        assert_eq!(days, vec![5, 6, 7]);

        let open = rule(RecurrenceType::DailyMonFri, date(2024, 3, 4));
        let got = expand_occurrences(&open, midnight(2024, 3, 4), midnight(2024, 3, 6));
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn empty_or_inverted_window_yields_nothing() {
        let r = rule(RecurrenceType::DailyMonFri, date(2024, 3, 1));
        assert!(expand_occurrences(&r, midnight(2024, 3, 5), midnight(2024, 3, 5)).is_empty());
        assert!(expand_occurrences(&r, midnight(2024, 3, 9), midnight(2024, 3, 5)).is_empty());
    }

    #[test]
    fn window_bounds_apply_to_the_time_of_day() {
        // 10:00 sessions; the window opens at 15:00 on the 4th and closes at
        // 10:00 on the 6th.
        let r = rule(RecurrenceType::DailyMonFri, date(2024, 3, 4));
        let start = date(2024, 3, 4).and_hms_opt(15, 0, 0).unwrap();
        let end = date(2024, 3, 6).and_hms_opt(10, 0, 0).unwrap();
        let got = expand_occurrences(&r, start, end);
        assert_eq!(got, vec![date(2024, 3, 5).and_hms_opt(10, 0, 0).unwrap()]);

        let from_ten = date(2024, 3, 4).and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(expand_occurrences(&r, from_ten, end).first(), Some(&from_ten));
    }

    #[test]
    fn inactive_rule_yields_nothing() {
        let mut r = rule(RecurrenceType::DailyMonFri, date(2024, 3, 1));
        r.is_active = false;
        assert!(expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 4, 1)).is_empty());
    }

    #[test]
    fn window_before_rule_start_yields_nothing() {
        let r = rule(RecurrenceType::Weekly, date(2024, 6, 3));
        assert!(expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 4, 1)).is_empty());
    }

    #[test]
    fn reconcile_suppresses_exact_matches_only() {
        let r = rule(RecurrenceType::Weekly, date(2024, 3, 6));
        let occ = expand_occurrences(&r, midnight(2024, 3, 1), midnight(2024, 3, 21));
        assert_eq!(occ.len(), 3);

        let exact = Treatment::new(r.patient_id, "Physio", occ[0]);
        let off_by_minute = Treatment::new(r.patient_id, "Physio", occ[1] + Duration::minutes(1));
        let other_patient = Treatment::new(Uuid::new_v4(), "Physio", occ[2]);

        let entries = reconcile(&r, &occ, &[exact.clone(), off_by_minute, other_patient]);
        assert!(matches!(&entries[0], CalendarEntry::Materialized(t) if t.id == exact.id));
        assert!(entries[1].is_virtual());
        assert!(entries[2].is_virtual());
        assert_eq!(entries[2].start(), occ[2]);
    }
}
