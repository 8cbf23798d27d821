use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_date, fmt_datetime};
use crate::db::DatabaseError;
use crate::models::{CategoryCount, DiagnosisTemplate, Icd10Code, PatientDiagnosis};

const CODE_COLUMNS: &str =
    "c.code, c.description, c.short_description, c.category, c.subcategory, c.is_active, c.is_physiotherapy_relevant";

const TEMPLATE_COLUMNS: &str = "id, name, description, primary_code, default_severity, typical_duration_days,
     common_symptoms, treatment_guidelines, usage_count, created_by, is_active, created_at";

const DIAGNOSIS_COLUMNS: &str = "d.id, d.patient_id, d.code, d.diagnosis_type, d.status, d.confidence_level,
     d.severity, d.clinical_notes, d.onset_date, d.diagnosis_date, d.resolved_date, d.diagnosed_by,
     d.created_at, d.updated_at";

/// Diagnosis columns followed by the joined catalogue entry, scoped to the
/// owning practitioner through the patient.
fn diagnosis_join() -> String {
    format!(
        "SELECT {DIAGNOSIS_COLUMNS}, {CODE_COLUMNS}
         FROM patient_diagnoses d
         JOIN patients p ON p.id = d.patient_id
         JOIN icd10_codes c ON c.code = d.code"
    )
}

// ═══════════════════════════════════════════════════════════
// Catalogue
// ═══════════════════════════════════════════════════════════

pub fn get_icd10_code(conn: &Connection, code: &str) -> Result<Option<Icd10Code>, DatabaseError> {
    let sql = format!("SELECT {CODE_COLUMNS} FROM icd10_codes c WHERE c.code = ?1");
    conn.query_row(&sql, params![code.trim().to_uppercase()], |r| row_to_code(r, 0))
        .optional()
        .map_err(DatabaseError::from)
}

/// Substring search over code and descriptions. LIKE wildcards in `query`
/// match literally.
pub fn search_icd10_codes(
    conn: &Connection,
    query: &str,
    category: Option<&str>,
    limit: usize,
) -> Result<Vec<Icd10Code>, DatabaseError> {
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let sql = format!(
        "SELECT {CODE_COLUMNS} FROM icd10_codes c
         WHERE c.is_active = 1 AND c.is_physiotherapy_relevant = 1
           AND (?2 IS NULL OR c.category = ?2)
           AND (c.code LIKE ?1 ESCAPE '\\'
                OR c.description LIKE ?1 ESCAPE '\\'
                OR c.short_description LIKE ?1 ESCAPE '\\')
         ORDER BY c.code ASC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![pattern, category, limit as i64], |r| row_to_code(r, 0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn icd10_categories(conn: &Connection) -> Result<Vec<CategoryCount>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) FROM icd10_codes
         WHERE is_active = 1 AND is_physiotherapy_relevant = 1
         GROUP BY category ORDER BY category ASC",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(CategoryCount {
            category: r.get(0)?,
            count: r.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

// ═══════════════════════════════════════════════════════════
// Templates
// ═══════════════════════════════════════════════════════════

pub fn list_diagnosis_templates(conn: &Connection) -> Result<Vec<DiagnosisTemplate>, DatabaseError> {
    let sql = format!(
        "SELECT {TEMPLATE_COLUMNS} FROM diagnosis_templates
         WHERE is_active = 1 ORDER BY usage_count DESC, name ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_template)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn get_diagnosis_template(conn: &Connection, id: i64) -> Result<Option<DiagnosisTemplate>, DatabaseError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM diagnosis_templates WHERE id = ?1 AND is_active = 1");
    conn.query_row(&sql, params![id], row_to_template)
        .optional()
        .map_err(DatabaseError::from)
}

/// Insert and return the assigned id. A duplicate name is a constraint
/// violation.
pub fn insert_diagnosis_template(conn: &Connection, t: &DiagnosisTemplate) -> Result<i64, DatabaseError> {
    let symptoms = serde_json::to_string(&t.common_symptoms)
        .map_err(|e| DatabaseError::Corrupted(format!("template symptoms: {e}")))?;
    let result = conn.execute(
        "INSERT INTO diagnosis_templates (name, description, primary_code, default_severity,
         typical_duration_days, common_symptoms, treatment_guidelines, usage_count, created_by,
         is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            t.name,
            t.description,
            t.primary_code,
            t.default_severity.as_str(),
            t.typical_duration_days,
            symptoms,
            t.treatment_guidelines,
            t.usage_count,
            t.created_by.map(|u| u.to_string()),
            t.is_active,
            fmt_datetime(&t.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(DatabaseError::ConstraintViolation(format!("template {} already exists", t.name)))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn increment_template_usage(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE diagnosis_templates SET usage_count = usage_count + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Patient diagnoses
// ═══════════════════════════════════════════════════════════

pub fn insert_patient_diagnosis(conn: &Connection, d: &PatientDiagnosis) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_diagnoses (id, patient_id, code, diagnosis_type, status, confidence_level,
         severity, clinical_notes, onset_date, diagnosis_date, resolved_date, diagnosed_by,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            d.id.to_string(),
            d.patient_id.to_string(),
            d.code,
            d.diagnosis_type.as_str(),
            d.status.as_str(),
            d.confidence_level.as_str(),
            d.severity.as_str(),
            d.clinical_notes,
            d.onset_date.as_ref().map(fmt_date),
            fmt_date(&d.diagnosis_date),
            d.resolved_date.as_ref().map(fmt_date),
            d.diagnosed_by.map(|u| u.to_string()),
            fmt_datetime(&d.created_at),
            fmt_datetime(&d.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient_diagnosis(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    id: &Uuid,
) -> Result<Option<(PatientDiagnosis, Icd10Code)>, DatabaseError> {
    let sql = format!(
        "{} WHERE d.id = ?1 AND d.patient_id = ?2 AND p.user_id = ?3",
        diagnosis_join()
    );
    conn.query_row(
        &sql,
        params![id.to_string(), patient_id.to_string(), user_id.to_string()],
        row_to_diagnosis_with_code,
    )
    .optional()
    .map_err(DatabaseError::from)
}

/// Newest diagnosis first.
pub fn list_patient_diagnoses(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
) -> Result<Vec<(PatientDiagnosis, Icd10Code)>, DatabaseError> {
    let sql = format!(
        "{} WHERE d.patient_id = ?1 AND p.user_id = ?2
         ORDER BY d.diagnosis_date DESC, d.created_at DESC",
        diagnosis_join()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![patient_id.to_string(), user_id.to_string()],
        row_to_diagnosis_with_code,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Every diagnosis across the practitioner's patients.
pub fn list_user_diagnoses(conn: &Connection, user_id: &Uuid) -> Result<Vec<PatientDiagnosis>, DatabaseError> {
    let sql = format!("{} WHERE p.user_id = ?1 ORDER BY d.diagnosis_date DESC", diagnosis_join());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string()], |r| row_to_diagnosis(r))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn update_patient_diagnosis(conn: &Connection, d: &PatientDiagnosis) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE patient_diagnoses SET diagnosis_type = ?2, status = ?3, confidence_level = ?4,
         severity = ?5, clinical_notes = ?6, onset_date = ?7, resolved_date = ?8, updated_at = ?9
         WHERE id = ?1",
        params![
            d.id.to_string(),
            d.diagnosis_type.as_str(),
            d.status.as_str(),
            d.confidence_level.as_str(),
            d.severity.as_str(),
            d.clinical_notes,
            d.onset_date.as_ref().map(fmt_date),
            d.resolved_date.as_ref().map(fmt_date),
            fmt_datetime(&d.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("diagnosis", d.id));
    }
    Ok(())
}

pub fn delete_patient_diagnosis(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    id: &Uuid,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM patient_diagnoses WHERE id = ?1 AND patient_id = ?2
         AND patient_id IN (SELECT id FROM patients WHERE user_id = ?3)",
        params![id.to_string(), patient_id.to_string(), user_id.to_string()],
    )?;
    Ok(affected > 0)
}

/// Turn every other active primary diagnosis of the patient into a
/// secondary one.
pub fn demote_active_primaries(conn: &Connection, patient_id: &Uuid, keep: &Uuid) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE patient_diagnoses SET diagnosis_type = 'secondary', updated_at = ?3
         WHERE patient_id = ?1 AND id <> ?2 AND diagnosis_type = 'primary' AND status = 'active'",
        params![
            patient_id.to_string(),
            keep.to_string(),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    Ok(affected)
}

// ═══════════════════════════════════════════════════════════
// Analytics
// ═══════════════════════════════════════════════════════════

/// (code, count) of active diagnoses, most frequent first.
pub fn top_active_codes(
    conn: &Connection,
    user_id: &Uuid,
    limit: usize,
) -> Result<Vec<(Icd10Code, i64)>, DatabaseError> {
    let sql = format!(
        "SELECT {CODE_COLUMNS}, COUNT(*) AS n
         FROM patient_diagnoses d
         JOIN patients p ON p.id = d.patient_id
         JOIN icd10_codes c ON c.code = d.code
         WHERE p.user_id = ?1 AND d.status = 'active'
         GROUP BY c.code ORDER BY n DESC, c.code ASC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string(), limit as i64], |r| {
        Ok((row_to_code(r, 0)?, r.get(7)?))
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn active_diagnoses_by_category(conn: &Connection, user_id: &Uuid) -> Result<Vec<CategoryCount>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT c.category, COUNT(*) AS n
         FROM patient_diagnoses d
         JOIN patients p ON p.id = d.patient_id
         JOIN icd10_codes c ON c.code = d.code
         WHERE p.user_id = ?1 AND d.status = 'active'
         GROUP BY c.category ORDER BY n DESC, c.category ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |r| {
        Ok(CategoryCount {
            category: r.get(0)?,
            count: r.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Diagnoses dated on or after `from`; with `active_only` every active one.
pub fn count_diagnoses(
    conn: &Connection,
    user_id: &Uuid,
    from: Option<NaiveDate>,
    active_only: bool,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM patient_diagnoses d
         JOIN patients p ON p.id = d.patient_id
         WHERE p.user_id = ?1
           AND (?2 IS NULL OR d.diagnosis_date >= ?2)
           AND (?3 = 0 OR d.status = 'active')",
        params![user_id.to_string(), from.as_ref().map(fmt_date), active_only],
        |r| r.get(0),
    )?)
}

// ═══════════════════════════════════════════════════════════
// Row mappers
// ═══════════════════════════════════════════════════════════

fn row_to_code(r: &rusqlite::Row, at: usize) -> Result<Icd10Code, rusqlite::Error> {
    Ok(Icd10Code {
        code: r.get(at)?,
        description: r.get(at + 1)?,
        short_description: r.get(at + 2)?,
        category: r.get(at + 3)?,
        subcategory: r.get(at + 4)?,
        is_active: r.get(at + 5)?,
        is_physiotherapy_relevant: r.get(at + 6)?,
    })
}

fn row_to_diagnosis(r: &rusqlite::Row) -> Result<PatientDiagnosis, rusqlite::Error> {
    Ok(PatientDiagnosis {
        id: row::uuid(r, 0)?,
        patient_id: row::uuid(r, 1)?,
        code: r.get(2)?,
        diagnosis_type: row::enumeration(r, 3)?,
        status: row::enumeration(r, 4)?,
        confidence_level: row::enumeration(r, 5)?,
        severity: row::enumeration(r, 6)?,
        clinical_notes: r.get(7)?,
        onset_date: row::opt_date(r, 8)?,
        diagnosis_date: row::date(r, 9)?,
        resolved_date: row::opt_date(r, 10)?,
        diagnosed_by: row::opt_uuid(r, 11)?,
        created_at: row::datetime(r, 12)?,
        updated_at: row::datetime(r, 13)?,
    })
}

fn row_to_diagnosis_with_code(r: &rusqlite::Row) -> Result<(PatientDiagnosis, Icd10Code), rusqlite::Error> {
    Ok((row_to_diagnosis(r)?, row_to_code(r, 14)?))
}

fn row_to_template(r: &rusqlite::Row) -> Result<DiagnosisTemplate, rusqlite::Error> {
    let symptoms: String = r.get(6)?;
    Ok(DiagnosisTemplate {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        primary_code: r.get(3)?,
        default_severity: row::enumeration(r, 4)?,
        typical_duration_days: r.get(5)?,
        common_symptoms: serde_json::from_str(&symptoms).unwrap_or_default(),
        treatment_guidelines: r.get(7)?,
        usage_count: r.get(8)?,
        created_by: row::opt_uuid(r, 9)?,
        is_active: r.get(10)?,
        created_at: row::datetime(r, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{insert_patient, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{DiagnosisStatus, DiagnosisType, Patient, User, UserRole};

    fn setup() -> (Connection, User, Patient) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Dx patient");
        insert_patient(&conn, &FieldKey::from_bytes([5u8; 32]), &patient).unwrap();
        (conn, user, patient)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn search_matches_descriptions_and_treats_wildcards_literally() {
        let (conn, _, _) = setup();
        let hits = search_icd10_codes(&conn, "tennis", None, 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code, "M77.1");

        let injuries = search_icd10_codes(&conn, "sprain", Some("Injury"), 20).unwrap();
        assert!(injuries.iter().all(|c| c.category == "Injury"));
        assert!(injuries.iter().any(|c| c.code == "S93.4"));

        assert!(search_icd10_codes(&conn, "%", None, 20).unwrap().is_empty());
        assert_eq!(search_icd10_codes(&conn, "M", None, 3).unwrap().len(), 3);
    }

    #[test]
    fn categories_cover_the_catalogue() {
        let (conn, _, _) = setup();
        let categories = icd10_categories(&conn).unwrap();
        assert_eq!(categories.iter().map(|c| c.count).sum::<i64>(), 52);
        assert!(categories.iter().any(|c| c.category == "Neurological"));
    }

    #[test]
    fn demotion_keeps_only_the_newest_primary() {
        let (conn, user, patient) = setup();
        let first = PatientDiagnosis::new(patient.id, "M54.5", today());
        insert_patient_diagnosis(&conn, &first).unwrap();
        let second = PatientDiagnosis::new(patient.id, "M54.2", today());
        insert_patient_diagnosis(&conn, &second).unwrap();

        assert_eq!(demote_active_primaries(&conn, &patient.id, &second.id).unwrap(), 1);
        let (reloaded, code) = get_patient_diagnosis(&conn, &user.id, &patient.id, &first.id)
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.diagnosis_type, DiagnosisType::Secondary);
        assert_eq!(code.short_description.as_deref(), Some("Low back pain"));
    }

    #[test]
    fn diagnoses_are_scoped_to_the_practitioner() {
        let (conn, user, patient) = setup();
        let dx = PatientDiagnosis::new(patient.id, "M54.5", today());
        insert_patient_diagnosis(&conn, &dx).unwrap();

        let other = Uuid::new_v4();
        assert!(list_patient_diagnoses(&conn, &other, &patient.id).unwrap().is_empty());
        assert!(!delete_patient_diagnosis(&conn, &other, &patient.id, &dx.id).unwrap());
        assert_eq!(list_patient_diagnoses(&conn, &user.id, &patient.id).unwrap().len(), 1);
        assert!(delete_patient_diagnosis(&conn, &user.id, &patient.id, &dx.id).unwrap());
    }

    #[test]
    fn analytics_count_only_active_diagnoses() {
        let (conn, user, patient) = setup();
        insert_patient_diagnosis(&conn, &PatientDiagnosis::new(patient.id, "M54.5", today())).unwrap();
        insert_patient_diagnosis(&conn, &PatientDiagnosis::new(patient.id, "M54.5", today())).unwrap();
        let mut resolved = PatientDiagnosis::new(patient.id, "S93.4", today());
        resolved.status = DiagnosisStatus::Resolved;
        insert_patient_diagnosis(&conn, &resolved).unwrap();

        let top = top_active_codes(&conn, &user.id, 10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!((top[0].0.code.as_str(), top[0].1), ("M54.5", 2));
        assert_eq!(count_diagnoses(&conn, &user.id, None, true).unwrap(), 2);
        assert_eq!(count_diagnoses(&conn, &user.id, Some(today()), false).unwrap(), 3);
        let by_category = active_diagnoses_by_category(&conn, &user.id).unwrap();
        assert_eq!(by_category[0].category, "Musculoskeletal");
    }

    #[test]
    fn templates_order_by_usage() {
        let (conn, _, _) = setup();
        let templates = list_diagnosis_templates(&conn).unwrap();
        assert_eq!(templates.len(), 5);
        let ankle = templates.iter().find(|t| t.name == "Ankle Sprain").unwrap();
        assert_eq!(ankle.common_symptoms.len(), 4);

        increment_template_usage(&conn, ankle.id).unwrap();
        let templates = list_diagnosis_templates(&conn).unwrap();
        assert_eq!(templates[0].name, "Ankle Sprain");
        assert_eq!(templates[0].usage_count, 1);
    }
}
