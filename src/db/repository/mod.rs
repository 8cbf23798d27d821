//! Repository layer: entity-scoped database operations.
//!
//! Every query that returns practice data is scoped by the owning
//! practitioner's id. Functions take `&Connection` so they run equally on a
//! plain connection or inside a caller's transaction.

mod billing;
mod calendly;
mod clinic;
mod compliance;
mod diagnosis;
mod finance;
mod location;
mod patient;
mod recurring;
mod report;
pub(crate) mod row;
mod treatment;
mod user;

pub use billing::*;
pub use calendly::*;
pub use clinic::*;
pub use compliance::*;
pub use diagnosis::*;
pub use finance::*;
pub use location::*;
pub use patient::*;
pub use recurring::*;
pub use report::*;
pub use treatment::*;
pub use user::*;

pub use row::{parse_datetime, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::sqlite::open_memory_database;
    use crate::models::*;
    use chrono::{NaiveDate, NaiveTime};
    use rusqlite::Connection;
    use uuid::Uuid;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn cascade_delete_leaves_no_orphans() {
        let conn = open_memory_database().unwrap();
        let key = FieldKey::from_bytes([3u8; 32]);
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Full record");
        insert_patient(&conn, &key, &patient).unwrap();

        let rule = RecurringAppointment::new(
            patient.id,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            RecurrenceType::Weekly,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            "Rehab",
        );
        insert_recurring(&conn, &rule).unwrap();
        let mut treatment = Treatment::new(
            patient.id,
            "Rehab",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        );
        treatment.recurring_id = Some(rule.id);
        insert_treatment(&conn, &treatment).unwrap();
        insert_trigger_point(
            &conn,
            &TriggerPoint {
                id: Uuid::new_v4(),
                treatment_id: treatment.id,
                location_x: 0.5,
                location_y: 0.5,
                kind: None,
                muscle: None,
                intensity: Some(3),
                symptoms: None,
                referral_pattern: None,
            },
        )
        .unwrap();
        insert_patient_report(
            &conn,
            &PatientReport {
                id: Uuid::new_v4(),
                patient_id: patient.id,
                content: "report".into(),
                report_type: "AI Generated".into(),
                generated_at: treatment.created_at,
            },
        )
        .unwrap();
        insert_consent(
            &conn,
            &UserConsent {
                id: Uuid::new_v4(),
                user_id: user.id,
                patient_id: patient.id,
                purpose: "treatment".into(),
                given_at: treatment.created_at,
                expires_at: None,
                notes: None,
                is_active: true,
            },
        )
        .unwrap();
        insert_patient_diagnosis(
            &conn,
            &PatientDiagnosis::new(patient.id, "M54.5", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        )
        .unwrap();

        let tx = conn.unchecked_transaction().unwrap();
        assert!(delete_patient_cascade(&tx, &user.id, &patient.id).unwrap());
        tx.commit().unwrap();

        for table in [
            "patients",
            "treatments",
            "trigger_points",
            "recurring_appointments",
            "patient_reports",
            "user_consents",
            "patient_diagnoses",
        ] {
            assert_eq!(count(&conn, table), 0, "{table} not emptied");
        }
    }
}
