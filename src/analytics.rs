//! Dashboard and practice statistics.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::maintenance::{self, MaintenanceSummary};
use crate::models::{PatientStatus, Treatment, TreatmentStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub treatment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub treatment_type: String,
    pub status: TreatmentStatus,
    pub scheduled_at: NaiveDateTime,
}

impl SessionSummary {
    fn from_pair((t, name): (Treatment, String)) -> Self {
        Self {
            treatment_id: t.id,
            patient_id: t.patient_id,
            patient_name: name,
            treatment_type: t.treatment_type,
            status: t.status,
            scheduled_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_patients: i64,
    pub active_patients: i64,
    pub pending_review_patients: i64,
    pub todays_appointments: i64,
    pub upcoming: Vec<SessionSummary>,
    pub recent: Vec<SessionSummary>,
    pub maintenance: MaintenanceSummary,
}

/// Runs the maintenance jobs for the user, then gathers the counts.
pub fn dashboard(conn: &Connection, user_id: &Uuid, now: NaiveDateTime) -> Result<Dashboard, DatabaseError> {
    let maintenance = maintenance::run_maintenance(conn, Some(user_id), now.date())?;

    Ok(Dashboard {
        total_patients: repository::count_patients(conn, user_id, None)?,
        active_patients: repository::count_patients(conn, user_id, Some(PatientStatus::Active))?,
        pending_review_patients: repository::count_patients(conn, user_id, Some(PatientStatus::PendingReview))?,
        todays_appointments: repository::count_treatments_on(conn, user_id, now.date())?,
        upcoming: repository::list_upcoming_treatments(conn, user_id, &now, 5)?
            .into_iter()
            .map(SessionSummary::from_pair)
            .collect(),
        recent: repository::list_recent_treatments(conn, user_id, 5)?
            .into_iter()
            .map(SessionSummary::from_pair)
            .collect(),
        maintenance,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthCount {
    pub month: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisCount {
    pub diagnosis: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PracticeStats {
    pub total_patients: i64,
    pub active_patients: i64,
    pub inactive_patients: i64,
    pub total_treatments: i64,
    pub completed_treatments: i64,
    /// Percentage of treatments that are Completed, one decimal.
    pub completion_rate: f64,
    pub treatments_by_month: Vec<MonthCount>,
    pub new_patients_by_month: Vec<MonthCount>,
    pub top_diagnoses: Vec<DiagnosisCount>,
    pub avg_treatments_per_patient: f64,
}

/// The twelve `YYYY-MM` keys ending with the month of `today`.
pub fn last_twelve_months(today: NaiveDate) -> Vec<String> {
    let first_of_month = today.with_day(1).unwrap_or(today);
    (0..12u32)
        .rev()
        .filter_map(|back| first_of_month.checked_sub_months(Months::new(back)))
        .map(|d| d.format("%Y-%m").to_string())
        .collect()
}

/// Fill gaps so every month of the series is present.
fn dense_series(keys: &[String], sparse: Vec<(String, i64)>) -> Vec<MonthCount> {
    keys.iter()
        .map(|k| MonthCount {
            month: k.clone(),
            count: sparse.iter().find(|(m, _)| m == k).map_or(0, |(_, c)| *c),
        })
        .collect()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn practice_stats(conn: &Connection, user_id: &Uuid, today: NaiveDate) -> Result<PracticeStats, DatabaseError> {
    let total_patients = repository::count_patients(conn, user_id, None)?;
    let total_treatments = repository::count_treatments(conn, user_id, None)?;
    let completed_treatments = repository::count_treatments(conn, user_id, Some(TreatmentStatus::Completed))?;

    let months = last_twelve_months(today);
    let series_start = months
        .first()
        .and_then(|m| NaiveDate::parse_from_str(&format!("{m}-01"), "%Y-%m-%d").ok())
        .unwrap_or(today);

    Ok(PracticeStats {
        total_patients,
        active_patients: repository::count_patients(conn, user_id, Some(PatientStatus::Active))?,
        inactive_patients: repository::count_patients(conn, user_id, Some(PatientStatus::Inactive))?,
        total_treatments,
        completed_treatments,
        completion_rate: if total_treatments > 0 {
            round1(completed_treatments as f64 * 100.0 / total_treatments as f64)
        } else {
            0.0
        },
        treatments_by_month: dense_series(&months, repository::treatments_by_month(conn, user_id, series_start)?),
        new_patients_by_month: dense_series(&months, repository::new_patients_by_month(conn, user_id, series_start)?),
        top_diagnoses: repository::top_diagnoses(conn, user_id, 10)?
            .into_iter()
            .map(|(diagnosis, count)| DiagnosisCount { diagnosis, count })
            .collect(),
        avg_treatments_per_patient: if total_patients > 0 {
            round1(total_treatments as f64 / total_patients as f64)
        } else {
            0.0
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{insert_patient, insert_treatment, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, User, UserRole};

    #[test]
    fn twelve_month_keys_end_at_current_month() {
        let keys = last_twelve_months(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(keys.len(), 12);
        assert_eq!(keys.first().unwrap(), "2023-04");
        assert_eq!(keys.last().unwrap(), "2024-03");
    }

    #[test]
    fn stats_count_and_rate() {
        let conn = open_memory_database().unwrap();
        let key = FieldKey::from_bytes([6u8; 32]);
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();

        let mut a = Patient::new(user.id, "A");
        a.diagnosis = Some("Low back pain".into());
        let mut b = Patient::new(user.id, "B");
        b.diagnosis = Some("Low back pain".into());
        insert_patient(&conn, &key, &a).unwrap();
        insert_patient(&conn, &key, &b).unwrap();

        let today = chrono::Local::now().naive_local();
        let mut done = Treatment::new(a.id, "x", today - chrono::Duration::days(1));
        done.status = TreatmentStatus::Completed;
        insert_treatment(&conn, &done).unwrap();
        insert_treatment(&conn, &Treatment::new(a.id, "x", today + chrono::Duration::days(1))).unwrap();
        insert_treatment(&conn, &Treatment::new(b.id, "x", today + chrono::Duration::days(2))).unwrap();

        let stats = practice_stats(&conn, &user.id, today.date()).unwrap();
        assert_eq!(stats.total_patients, 2);
        assert_eq!(stats.total_treatments, 3);
        assert_eq!(stats.completion_rate, 33.3);
        assert_eq!(stats.avg_treatments_per_patient, 1.5);
        assert_eq!(stats.top_diagnoses[0].count, 2);
        assert_eq!(stats.treatments_by_month.len(), 12);
        assert_eq!(stats.new_patients_by_month.last().unwrap().count, 2);
    }

    #[test]
    fn dashboard_runs_maintenance_first() {
        let conn = open_memory_database().unwrap();
        let key = FieldKey::from_bytes([6u8; 32]);
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let p = Patient::new(user.id, "A");
        insert_patient(&conn, &key, &p).unwrap();

        let now = chrono::Local::now().naive_local();
        insert_treatment(&conn, &Treatment::new(p.id, "past", now - chrono::Duration::days(2))).unwrap();
        insert_treatment(&conn, &Treatment::new(p.id, "next", now + chrono::Duration::days(2))).unwrap();

        let dash = dashboard(&conn, &user.id, now).unwrap();
        assert_eq!(dash.maintenance.treatments_completed, 1);
        assert_eq!(dash.total_patients, 1);
        assert_eq!(dash.active_patients, 1);
        assert_eq!(dash.upcoming.len(), 1);
        assert_eq!(dash.upcoming[0].treatment_type, "next");
        assert_eq!(dash.recent.len(), 2);
    }
}
