use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_date, fmt_datetime};
use crate::crypto::FieldKey;
use crate::db::DatabaseError;
use crate::models::{Patient, PatientFilter, PatientStatus};

const PATIENT_COLUMNS: &str = "id, user_id, name, email, phone, date_of_birth, diagnosis,
     treatment_plan, notes_encrypted, status, address_line1, address_line2, city, postcode,
     preferred_location, created_at, updated_at";

fn seal_notes(key: &FieldKey, notes: &Option<String>) -> Result<Option<String>, DatabaseError> {
    notes
        .as_deref()
        .filter(|n| !n.is_empty())
        .map(|n| {
            key.encrypt_str(n)
                .map_err(|e| DatabaseError::Corrupted(format!("notes encryption: {e}")))
        })
        .transpose()
}

fn open_notes(key: &FieldKey, (mut patient, sealed): (Patient, Option<String>)) -> Result<Patient, DatabaseError> {
    if let Some(sealed) = sealed {
        let plain = key.decrypt_str(&sealed).map_err(|e| {
            DatabaseError::Corrupted(format!("notes of patient {}: {e}", patient.id))
        })?;
        patient.notes = Some(plain);
    }
    Ok(patient)
}

pub fn insert_patient(conn: &Connection, key: &FieldKey, p: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, user_id, name, email, phone, date_of_birth, diagnosis,
         treatment_plan, notes_encrypted, status, address_line1, address_line2, city, postcode,
         preferred_location, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            p.id.to_string(),
            p.user_id.to_string(),
            p.name,
            p.email,
            p.phone,
            p.date_of_birth.as_ref().map(fmt_date),
            p.diagnosis,
            p.treatment_plan,
            seal_notes(key, &p.notes)?,
            p.status.as_str(),
            p.address_line1,
            p.address_line2,
            p.city,
            p.postcode,
            p.preferred_location,
            fmt_datetime(&p.created_at),
            fmt_datetime(&p.updated_at),
        ],
    )?;
    Ok(())
}

/// Fetch a patient owned by `user_id`. Another practitioner's patient is
/// reported as absent.
pub fn get_patient(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1 AND user_id = ?2");
    let found = conn
        .query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_patient)
        .optional()?;
    found.map(|p| open_notes(key, p)).transpose()
}

/// Ownership check without decrypting anything.
pub fn patient_belongs_to(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE id = ?1 AND user_id = ?2",
        params![id.to_string(), user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_patients(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    filter: &PatientFilter,
) -> Result<Vec<Patient>, DatabaseError> {
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY name COLLATE NOCASE ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id.to_string(), filter.status.map(|s| s.as_str())],
        row_to_patient,
    )?;

    let mut patients = Vec::new();
    for row in rows {
        let patient = open_notes(key, row?)?;
        let keep = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or(true, |needle| patient.matches_search(needle));
        if keep {
            patients.push(patient);
        }
    }
    Ok(patients)
}

pub fn find_patient_by_email(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    email: &str,
) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE user_id = ?1 AND email IS NOT NULL AND LOWER(email) = LOWER(?2)
         ORDER BY created_at ASC LIMIT 1"
    );
    let found = conn
        .query_row(&sql, params![user_id.to_string(), email.trim()], row_to_patient)
        .optional()?;
    found.map(|p| open_notes(key, p)).transpose()
}

pub fn find_patient_by_name(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    name: &str,
) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE user_id = ?1 AND LOWER(name) = LOWER(?2)
         ORDER BY created_at ASC LIMIT 1"
    );
    let found = conn
        .query_row(&sql, params![user_id.to_string(), name.trim()], row_to_patient)
        .optional()?;
    found.map(|p| open_notes(key, p)).transpose()
}

pub fn update_patient(conn: &Connection, key: &FieldKey, p: &Patient) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE patients SET name = ?3, email = ?4, phone = ?5, date_of_birth = ?6,
         diagnosis = ?7, treatment_plan = ?8, notes_encrypted = ?9, status = ?10,
         address_line1 = ?11, address_line2 = ?12, city = ?13, postcode = ?14,
         preferred_location = ?15, updated_at = ?16
         WHERE id = ?1 AND user_id = ?2",
        params![
            p.id.to_string(),
            p.user_id.to_string(),
            p.name,
            p.email,
            p.phone,
            p.date_of_birth.as_ref().map(fmt_date),
            p.diagnosis,
            p.treatment_plan,
            seal_notes(key, &p.notes)?,
            p.status.as_str(),
            p.address_line1,
            p.address_line2,
            p.city,
            p.postcode,
            p.preferred_location,
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("patient", p.id));
    }
    Ok(())
}

/// Returns false when the patient does not exist for this user.
pub fn update_patient_status(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    status: PatientStatus,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE patients SET status = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
        params![
            id.to_string(),
            user_id.to_string(),
            status.as_str(),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected > 0)
}

pub fn count_patients(
    conn: &Connection,
    user_id: &Uuid,
    status: Option<PatientStatus>,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
        params![user_id.to_string(), status.map(|s| s.as_str())],
        |row| row.get(0),
    )?)
}

/// Delete a patient and everything hanging off it. Meant to run inside the
/// caller's transaction. Returns false when the patient is not owned by
/// `user_id`.
pub fn delete_patient_cascade(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    if !patient_belongs_to(conn, user_id, id)? {
        return Ok(false);
    }
    let id = id.to_string();
    conn.execute(
        "DELETE FROM trigger_points WHERE treatment_id IN
         (SELECT id FROM treatments WHERE patient_id = ?1)",
        params![id],
    )?;
    conn.execute("DELETE FROM treatments WHERE patient_id = ?1", params![id])?;
    conn.execute("DELETE FROM recurring_appointments WHERE patient_id = ?1", params![id])?;
    conn.execute("DELETE FROM patient_reports WHERE patient_id = ?1", params![id])?;
    conn.execute("DELETE FROM user_consents WHERE patient_id = ?1", params![id])?;
    conn.execute("DELETE FROM patient_diagnoses WHERE patient_id = ?1", params![id])?;
    conn.execute(
        "UPDATE unmatched_calendly_bookings SET matched_patient_id = NULL WHERE matched_patient_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM patients WHERE id = ?1", params![id])?;
    Ok(true)
}

/// Overwrite the free-text diagnosis shown in patient lists.
pub fn set_patient_diagnosis(conn: &Connection, id: &Uuid, diagnosis: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE patients SET diagnosis = ?2, updated_at = ?3 WHERE id = ?1",
        params![
            id.to_string(),
            diagnosis,
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(())
}

/// Active patients with no session on or after `cutoff` become Inactive.
/// Patients registered on or after `cutoff` are left alone.
pub fn inactivate_dormant_patients(
    conn: &Connection,
    user_id: Option<&Uuid>,
    cutoff: NaiveDate,
) -> Result<usize, DatabaseError> {
    let cutoff_str = fmt_date(&cutoff);
    let affected = conn.execute(
        "UPDATE patients SET status = 'Inactive', updated_at = ?3
         WHERE status = 'Active'
           AND (?1 IS NULL OR user_id = ?1)
           AND DATE(created_at) < ?2
           AND NOT EXISTS (
               SELECT 1 FROM treatments t
               WHERE t.patient_id = patients.id AND DATE(t.created_at) >= ?2
           )",
        params![
            user_id.map(|u| u.to_string()),
            cutoff_str,
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected)
}

/// (month `YYYY-MM`, count) of newly registered patients since `from`.
pub fn new_patients_by_month(
    conn: &Connection,
    user_id: &Uuid,
    from: NaiveDate,
) -> Result<Vec<(String, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', created_at) AS month, COUNT(*)
         FROM patients WHERE user_id = ?1 AND DATE(created_at) >= ?2
         GROUP BY month ORDER BY month ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string(), fmt_date(&from)], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Most common diagnoses, case-sensitive as entered.
pub fn top_diagnoses(conn: &Connection, user_id: &Uuid, limit: usize) -> Result<Vec<(String, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT diagnosis, COUNT(*) AS n FROM patients
         WHERE user_id = ?1 AND diagnosis IS NOT NULL AND TRIM(diagnosis) <> ''
         GROUP BY diagnosis ORDER BY n DESC, diagnosis ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id.to_string(), limit as i64], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_patient(row: &rusqlite::Row) -> Result<(Patient, Option<String>), rusqlite::Error> {
    let patient = Patient {
        id: row::uuid(row, 0)?,
        user_id: row::uuid(row, 1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        date_of_birth: row::opt_date(row, 5)?,
        diagnosis: row.get(6)?,
        treatment_plan: row.get(7)?,
        notes: None,
        status: row::enumeration(row, 9)?,
        address_line1: row.get(10)?,
        address_line2: row.get(11)?,
        city: row.get(12)?,
        postcode: row.get(13)?,
        preferred_location: row.get(14)?,
        created_at: row::datetime(row, 15)?,
        updated_at: row::datetime(row, 16)?,
    };
    Ok((patient, row.get(8)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_user;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{User, UserRole};

    fn setup() -> (Connection, FieldKey, Uuid) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        (conn, FieldKey::from_bytes([9u8; 32]), user.id)
    }

    #[test]
    fn notes_are_encrypted_at_rest() {
        let (conn, key, user_id) = setup();
        let mut p = Patient::new(user_id, "Lucia");
        p.notes = Some("Old ACL reconstruction".into());
        insert_patient(&conn, &key, &p).unwrap();

        let raw: String = conn
            .query_row("SELECT notes_encrypted FROM patients WHERE id = ?1", params![p.id.to_string()], |r| r.get(0))
            .unwrap();
        assert!(!raw.contains("ACL"));

        let loaded = get_patient(&conn, &key, &user_id, &p.id).unwrap().unwrap();
        assert_eq!(loaded.notes.as_deref(), Some("Old ACL reconstruction"));
    }

    #[test]
    fn other_practitioner_cannot_read_patient() {
        let (conn, key, user_id) = setup();
        let other = User::new("other", "other@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &other).unwrap();
        let p = Patient::new(user_id, "Private");
        insert_patient(&conn, &key, &p).unwrap();

        assert!(get_patient(&conn, &key, &other.id, &p.id).unwrap().is_none());
        assert!(!update_patient_status(&conn, &other.id, &p.id, PatientStatus::Inactive).unwrap());
        assert!(!delete_patient_cascade(&conn, &other.id, &p.id).unwrap());
    }

    #[test]
    fn search_matches_decrypted_notes() {
        let (conn, key, user_id) = setup();
        let mut a = Patient::new(user_id, "Alba");
        a.notes = Some("runner, plantar fasciitis".into());
        insert_patient(&conn, &key, &a).unwrap();
        insert_patient(&conn, &key, &Patient::new(user_id, "Bruno")).unwrap();

        let filter = PatientFilter {
            search: Some("plantar".into()),
            ..Default::default()
        };
        let found = list_patients(&conn, &key, &user_id, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alba");
    }

    #[test]
    fn status_filter_and_counts() {
        let (conn, key, user_id) = setup();
        let mut pending = Patient::new(user_id, "Pending");
        pending.status = PatientStatus::PendingReview;
        insert_patient(&conn, &key, &pending).unwrap();
        insert_patient(&conn, &key, &Patient::new(user_id, "Active")).unwrap();

        assert_eq!(count_patients(&conn, &user_id, None).unwrap(), 2);
        assert_eq!(count_patients(&conn, &user_id, Some(PatientStatus::PendingReview)).unwrap(), 1);
        let filter = PatientFilter {
            status: Some(PatientStatus::Active),
            ..Default::default()
        };
        assert_eq!(list_patients(&conn, &key, &user_id, &filter).unwrap().len(), 1);
    }

    #[test]
    fn find_by_email_is_case_insensitive() {
        let (conn, key, user_id) = setup();
        let mut p = Patient::new(user_id, "Eva");
        p.email = Some("Eva@Mail.test".into());
        insert_patient(&conn, &key, &p).unwrap();
        let found = find_patient_by_email(&conn, &key, &user_id, "eva@mail.test").unwrap();
        assert_eq!(found.unwrap().id, p.id);
        let by_name = find_patient_by_name(&conn, &key, &user_id, "EVA").unwrap();
        assert_eq!(by_name.unwrap().id, p.id);
    }
}
