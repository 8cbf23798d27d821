//! Housekeeping jobs run from the dashboard and the CLI.

use chrono::{Duration, NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{repository, DatabaseError};

/// Patients without a session for this many days become Inactive.
pub const INACTIVITY_DAYS: i64 = 60;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub treatments_completed: usize,
    pub patients_inactivated: usize,
}

/// Scheduled treatments dated before `today` become Completed. `None`
/// covers every practitioner.
pub fn mark_past_treatments_as_completed(
    conn: &Connection,
    user_id: Option<&Uuid>,
    today: NaiveDate,
) -> Result<usize, DatabaseError> {
    let count = repository::complete_past_scheduled_treatments(conn, user_id, &today.and_time(NaiveTime::MIN))?;
    if count > 0 {
        tracing::info!(count, "Marked past treatments as Completed");
    }
    Ok(count)
}

/// Active patients whose latest session is more than
/// [`INACTIVITY_DAYS`] before `today` (or who never had one) become
/// Inactive. Patients registered within that period are spared.
pub fn mark_inactive_patients(
    conn: &Connection,
    user_id: Option<&Uuid>,
    today: NaiveDate,
) -> Result<usize, DatabaseError> {
    let cutoff = today - Duration::days(INACTIVITY_DAYS);
    let count = repository::inactivate_dormant_patients(conn, user_id, cutoff)?;
    if count > 0 {
        tracing::info!(count, %cutoff, "Marked patients as Inactive");
    }
    Ok(count)
}

/// Both jobs in one transaction.
pub fn run_maintenance(
    conn: &Connection,
    user_id: Option<&Uuid>,
    today: NaiveDate,
) -> Result<MaintenanceSummary, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let summary = MaintenanceSummary {
        treatments_completed: mark_past_treatments_as_completed(&tx, user_id, today)?,
        patients_inactivated: mark_inactive_patients(&tx, user_id, today)?,
    };
    tx.commit()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{get_patient, get_treatment, insert_patient, insert_treatment, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, PatientStatus, Treatment, TreatmentStatus, User, UserRole};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        conn: Connection,
        key: FieldKey,
        user_id: Uuid,
    }

    fn fixture() -> Fixture {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        Fixture {
            conn,
            key: FieldKey::from_bytes([8u8; 32]),
            user_id: user.id,
        }
    }

    fn patient_registered(f: &Fixture, name: &str, registered: NaiveDate) -> Patient {
        let mut p = Patient::new(f.user_id, name);
        p.created_at = registered.and_hms_opt(8, 0, 0).unwrap();
        insert_patient(&f.conn, &f.key, &p).unwrap();
        p
    }

    #[test]
    fn past_scheduled_sessions_complete() {
        let f = fixture();
        let p = patient_registered(&f, "A", day(2024, 1, 1));
        let yesterday = Treatment::new(p.id, "x", day(2024, 5, 9).and_hms_opt(17, 0, 0).unwrap());
        let today = Treatment::new(p.id, "x", day(2024, 5, 10).and_hms_opt(8, 0, 0).unwrap());
        insert_treatment(&f.conn, &yesterday).unwrap();
        insert_treatment(&f.conn, &today).unwrap();

        assert_eq!(mark_past_treatments_as_completed(&f.conn, Some(&f.user_id), day(2024, 5, 10)).unwrap(), 1);
        let reloaded = get_treatment(&f.conn, &f.user_id, &today.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TreatmentStatus::Scheduled);
        let reloaded = get_treatment(&f.conn, &f.user_id, &yesterday.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TreatmentStatus::Completed);
    }

    #[test]
    fn dormant_patients_become_inactive() {
        let f = fixture();
        let today = day(2024, 6, 30);

        let dormant = patient_registered(&f, "Dormant", day(2024, 1, 1));
        insert_treatment(&f.conn, &Treatment::new(dormant.id, "x", day(2024, 4, 1).and_hms_opt(9, 0, 0).unwrap())).unwrap();

        let recent = patient_registered(&f, "Recent", day(2024, 1, 1));
        insert_treatment(&f.conn, &Treatment::new(recent.id, "x", day(2024, 6, 1).and_hms_opt(9, 0, 0).unwrap())).unwrap();

        let never_seen = patient_registered(&f, "Never", day(2024, 2, 1));
        let new_patient = patient_registered(&f, "New", day(2024, 6, 20));

        assert_eq!(mark_inactive_patients(&f.conn, None, today).unwrap(), 2);

        let status = |id| get_patient(&f.conn, &f.key, &f.user_id, id).unwrap().unwrap().status;
        assert_eq!(status(&dormant.id), PatientStatus::Inactive);
        assert_eq!(status(&never_seen.id), PatientStatus::Inactive);
        assert_eq!(status(&recent.id), PatientStatus::Active);
        assert_eq!(status(&new_patient.id), PatientStatus::Active);
    }

    #[test]
    fn run_maintenance_reports_both_counts() {
        let f = fixture();
        let p = patient_registered(&f, "A", day(2024, 1, 1));
        insert_treatment(&f.conn, &Treatment::new(p.id, "x", day(2024, 1, 5).and_hms_opt(9, 0, 0).unwrap())).unwrap();

        let summary = run_maintenance(&f.conn, Some(&f.user_id), day(2024, 6, 1)).unwrap();
        assert_eq!(
            summary,
            MaintenanceSummary {
                treatments_completed: 1,
                patients_inactivated: 1,
            }
        );
    }
}
