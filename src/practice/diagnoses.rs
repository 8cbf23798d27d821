use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{check_name, clean, not_found, PracticeError};
use crate::db::repository;
use crate::models::{
    CategoryCount, ConfidenceLevel, DiagnosisRecord, DiagnosisStatus, DiagnosisTemplate, DiagnosisType, Icd10Code,
    PatientDiagnosis, Severity,
};

pub const SEARCH_DEFAULT_LIMIT: usize = 20;
pub const SEARCH_MAX_LIMIT: usize = 50;

/// Catalogue search. Queries shorter than two characters match nothing.
pub fn search_codes(
    conn: &Connection,
    query: &str,
    category: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Icd10Code>, PracticeError> {
    let query = query.trim();
    if query.chars().count() < 2 {
        return Ok(Vec::new());
    }
    let limit = limit.unwrap_or(SEARCH_DEFAULT_LIMIT).clamp(1, SEARCH_MAX_LIMIT);
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    Ok(repository::search_icd10_codes(conn, query, category, limit)?)
}

pub fn list_categories(conn: &Connection) -> Result<Vec<CategoryCount>, PracticeError> {
    Ok(repository::icd10_categories(conn)?)
}

pub fn list_templates(conn: &Connection) -> Result<Vec<DiagnosisTemplate>, PracticeError> {
    Ok(repository::list_diagnosis_templates(conn)?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDiagnosis {
    pub code: String,
    pub diagnosis_type: Option<DiagnosisType>,
    pub status: Option<DiagnosisStatus>,
    pub confidence_level: Option<ConfidenceLevel>,
    pub severity: Option<Severity>,
    pub clinical_notes: Option<String>,
    pub onset_date: Option<NaiveDate>,
    pub diagnosis_date: Option<NaiveDate>,
}

/// Fields a practitioner may change after the fact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosisUpdate {
    pub diagnosis_type: Option<DiagnosisType>,
    pub status: Option<DiagnosisStatus>,
    pub confidence_level: Option<ConfidenceLevel>,
    pub severity: Option<Severity>,
    pub clinical_notes: Option<String>,
}

fn ensure_patient(conn: &Connection, user_id: &Uuid, patient_id: &Uuid) -> Result<(), PracticeError> {
    if !repository::patient_belongs_to(conn, user_id, patient_id)? {
        return Err(not_found("patient", *patient_id));
    }
    Ok(())
}

fn active_code(conn: &Connection, code: &str) -> Result<Icd10Code, PracticeError> {
    repository::get_icd10_code(conn, code)?
        .filter(|c| c.is_active)
        .ok_or_else(|| PracticeError::Invalid(format!("unknown ICD-10 code: {}", code.trim())))
}

/// Make `dx` the only active primary diagnosis and mirror it into the
/// patient's free-text diagnosis.
fn promote(conn: &Connection, dx: &PatientDiagnosis, code: &Icd10Code) -> Result<(), PracticeError> {
    if dx.diagnosis_type != DiagnosisType::Primary || !dx.is_active() {
        return Ok(());
    }
    let demoted = repository::demote_active_primaries(conn, &dx.patient_id, &dx.id)?;
    if demoted > 0 {
        tracing::debug!(patient_id = %dx.patient_id, demoted, "Earlier primary diagnoses demoted");
    }
    repository::set_patient_diagnosis(conn, &dx.patient_id, &code.label())?;
    Ok(())
}

pub fn list_diagnoses(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    today: NaiveDate,
) -> Result<Vec<DiagnosisRecord>, PracticeError> {
    ensure_patient(conn, user_id, patient_id)?;
    Ok(repository::list_patient_diagnoses(conn, user_id, patient_id)?
        .into_iter()
        .map(|(dx, code)| DiagnosisRecord::new(dx, &code, today))
        .collect())
}

pub fn get_diagnosis(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    id: &Uuid,
    today: NaiveDate,
) -> Result<DiagnosisRecord, PracticeError> {
    let (dx, code) = repository::get_patient_diagnosis(conn, user_id, patient_id, id)?
        .ok_or(not_found("diagnosis", *id))?;
    Ok(DiagnosisRecord::new(dx, &code, today))
}

pub fn add_diagnosis(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    input: NewDiagnosis,
    today: NaiveDate,
) -> Result<DiagnosisRecord, PracticeError> {
    ensure_patient(conn, user_id, patient_id)?;
    let code = active_code(conn, &input.code)?;

    let mut dx = PatientDiagnosis::new(*patient_id, &code.code, input.diagnosis_date.unwrap_or(today));
    if let Some(t) = input.diagnosis_type {
        dx.diagnosis_type = t;
    }
    if let Some(s) = input.status {
        dx.status = s;
    }
    if let Some(c) = input.confidence_level {
        dx.confidence_level = c;
    }
    if let Some(s) = input.severity {
        dx.severity = s;
    }
    if dx.status == DiagnosisStatus::Resolved {
        dx.resolved_date = Some(today);
    }
    dx.clinical_notes = clean(input.clinical_notes);
    dx.onset_date = input.onset_date;
    dx.diagnosed_by = Some(*user_id);

    let tx = conn.unchecked_transaction()?;
    repository::insert_patient_diagnosis(&tx, &dx)?;
    promote(&tx, &dx, &code)?;
    tx.commit()?;

    tracing::info!(%patient_id, diagnosis_id = %dx.id, code = %code.code, "Diagnosis added");
    Ok(DiagnosisRecord::new(dx, &code, today))
}

pub fn update_diagnosis(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    id: &Uuid,
    update: DiagnosisUpdate,
    today: NaiveDate,
) -> Result<DiagnosisRecord, PracticeError> {
    let (mut dx, code) = repository::get_patient_diagnosis(conn, user_id, patient_id, id)?
        .ok_or(not_found("diagnosis", *id))?;

    if let Some(status) = update.status {
        dx.status = status;
        if status == DiagnosisStatus::Resolved && dx.resolved_date.is_none() {
            dx.resolved_date = Some(today);
        }
    }
    if let Some(t) = update.diagnosis_type {
        dx.diagnosis_type = t;
    }
    if let Some(c) = update.confidence_level {
        dx.confidence_level = c;
    }
    if let Some(s) = update.severity {
        dx.severity = s;
    }
    if update.clinical_notes.is_some() {
        dx.clinical_notes = clean(update.clinical_notes);
    }
    dx.updated_at = chrono::Local::now().naive_local();

    let tx = conn.unchecked_transaction()?;
    repository::update_patient_diagnosis(&tx, &dx)?;
    promote(&tx, &dx, &code)?;
    tx.commit()?;
    Ok(DiagnosisRecord::new(dx, &code, today))
}

pub fn delete_diagnosis(conn: &Connection, user_id: &Uuid, patient_id: &Uuid, id: &Uuid) -> Result<(), PracticeError> {
    if !repository::delete_patient_diagnosis(conn, user_id, patient_id, id)? {
        return Err(not_found("diagnosis", *id));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateApplication {
    pub severity: Option<Severity>,
    pub clinical_notes: Option<String>,
    pub onset_date: Option<NaiveDate>,
}

/// Record the template's code as the patient's active primary diagnosis.
pub fn apply_template(
    conn: &Connection,
    user_id: &Uuid,
    template_id: i64,
    patient_id: &Uuid,
    input: TemplateApplication,
    today: NaiveDate,
) -> Result<DiagnosisRecord, PracticeError> {
    ensure_patient(conn, user_id, patient_id)?;
    let template = repository::get_diagnosis_template(conn, template_id)?
        .ok_or_else(|| PracticeError::Invalid(format!("unknown diagnosis template: {template_id}")))?;
    let code = active_code(conn, &template.primary_code)?;

    let mut dx = PatientDiagnosis::new(*patient_id, &code.code, today);
    dx.severity = input.severity.unwrap_or(template.default_severity);
    dx.clinical_notes = clean(input.clinical_notes);
    dx.onset_date = input.onset_date;
    dx.diagnosed_by = Some(*user_id);

    let tx = conn.unchecked_transaction()?;
    repository::insert_patient_diagnosis(&tx, &dx)?;
    repository::increment_template_usage(&tx, template.id)?;
    promote(&tx, &dx, &code)?;
    tx.commit()?;

    tracing::info!(%patient_id, template = %template.name, "Diagnosis template applied");
    Ok(DiagnosisRecord::new(dx, &code, today))
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub name: String,
    pub description: Option<String>,
    pub primary_code: String,
    pub default_severity: Option<Severity>,
    pub typical_duration_days: Option<i64>,
    #[serde(default)]
    pub common_symptoms: Vec<String>,
    pub treatment_guidelines: Option<String>,
}

pub fn create_template(conn: &Connection, admin_id: &Uuid, input: TemplateInput) -> Result<DiagnosisTemplate, PracticeError> {
    check_name(&input.name)?;
    let code = active_code(conn, &input.primary_code)?;
    if input.typical_duration_days.is_some_and(|d| d < 0) {
        return Err(PracticeError::Invalid("typical_duration_days must not be negative".into()));
    }
    let mut template = DiagnosisTemplate {
        id: 0,
        name: input.name.trim().to_string(),
        description: clean(input.description),
        primary_code: code.code,
        default_severity: input.default_severity.unwrap_or(Severity::Moderate),
        typical_duration_days: input.typical_duration_days,
        common_symptoms: input
            .common_symptoms
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        treatment_guidelines: clean(input.treatment_guidelines),
        usage_count: 0,
        created_by: Some(*admin_id),
        is_active: true,
        created_at: chrono::Local::now().naive_local(),
    };
    template.id = repository::insert_diagnosis_template(conn, &template)?;
    Ok(template)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CodeFrequency {
    pub code: String,
    pub short_description: Option<String>,
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisAnalytics {
    pub top_codes: Vec<CodeFrequency>,
    pub by_category: Vec<CategoryCount>,
    pub recent_count: i64,
    pub active_count: i64,
}

pub fn diagnosis_analytics(conn: &Connection, user_id: &Uuid, today: NaiveDate) -> Result<DiagnosisAnalytics, PracticeError> {
    let top_codes = repository::top_active_codes(conn, user_id, 10)?
        .into_iter()
        .map(|(code, count)| CodeFrequency {
            code: code.code,
            short_description: code.short_description,
            category: code.category,
            count,
        })
        .collect();
    Ok(DiagnosisAnalytics {
        top_codes,
        by_category: repository::active_diagnoses_by_category(conn, user_id)?,
        recent_count: repository::count_diagnoses(conn, user_id, Some(today - Duration::days(30)), false)?,
        active_count: repository::count_diagnoses(conn, user_id, None, true)?,
    })
}
