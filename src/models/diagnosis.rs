use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ConfidenceLevel, DiagnosisStatus, DiagnosisType, Severity};

/// An entry of the ICD-10 reference catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Icd10Code {
    pub code: String,
    pub description: String,
    pub short_description: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub is_active: bool,
    pub is_physiotherapy_relevant: bool,
}

impl Icd10Code {
    /// `"M54.5: Low back pain"`, the form stored in `patient.diagnosis`.
    pub fn label(&self) -> String {
        let short = self.short_description.as_deref().unwrap_or(&self.description);
        format!("{}: {short}", self.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

/// A reusable starting point for a common presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisTemplate {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub primary_code: String,
    pub default_severity: Severity,
    pub typical_duration_days: Option<i64>,
    pub common_symptoms: Vec<String>,
    pub treatment_guidelines: Option<String>,
    pub usage_count: i64,
    pub created_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientDiagnosis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub code: String,
    pub diagnosis_type: DiagnosisType,
    pub status: DiagnosisStatus,
    pub confidence_level: ConfidenceLevel,
    pub severity: Severity,
    pub clinical_notes: Option<String>,
    pub onset_date: Option<NaiveDate>,
    pub diagnosis_date: NaiveDate,
    pub resolved_date: Option<NaiveDate>,
    pub diagnosed_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PatientDiagnosis {
    pub fn new(patient_id: Uuid, code: &str, today: NaiveDate) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            code: code.to_string(),
            diagnosis_type: DiagnosisType::Primary,
            status: DiagnosisStatus::Active,
            confidence_level: ConfidenceLevel::Confirmed,
            severity: Severity::Moderate,
            clinical_notes: None,
            onset_date: None,
            diagnosis_date: today,
            resolved_date: None,
            diagnosed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DiagnosisStatus::Active
    }

    /// Days from onset until resolution, or until `today` while unresolved.
    pub fn duration_days(&self, today: NaiveDate) -> Option<i64> {
        let onset = self.onset_date?;
        let end = self.resolved_date.unwrap_or(today);
        Some((end - onset).num_days())
    }
}

/// A patient diagnosis joined with its catalogue entry.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisRecord {
    #[serde(flatten)]
    pub diagnosis: PatientDiagnosis,
    pub description: String,
    pub short_description: Option<String>,
    pub category: String,
    pub is_active: bool,
    pub duration_days: Option<i64>,
}

impl DiagnosisRecord {
    pub fn new(diagnosis: PatientDiagnosis, code: &Icd10Code, today: NaiveDate) -> Self {
        Self {
            is_active: diagnosis.is_active(),
            duration_days: diagnosis.duration_days(today),
            description: code.description.clone(),
            short_description: code.short_description.clone(),
            category: code.category.clone(),
            diagnosis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn duration_runs_to_today_until_resolved() {
        let mut dx = PatientDiagnosis::new(Uuid::new_v4(), "M54.5", date(2024, 3, 1));
        assert_eq!(dx.duration_days(date(2024, 3, 11)), None);

        dx.onset_date = Some(date(2024, 3, 1));
        assert_eq!(dx.duration_days(date(2024, 3, 11)), Some(10));

        dx.resolved_date = Some(date(2024, 3, 5));
        assert_eq!(dx.duration_days(date(2024, 3, 11)), Some(4));
    }

    #[test]
    fn label_prefers_the_short_description() {
        let mut code = Icd10Code {
            code: "M77.1".into(),
            description: "Lateral epicondylitis".into(),
            short_description: Some("Tennis elbow".into()),
            category: "Musculoskeletal".into(),
            subcategory: None,
            is_active: true,
            is_physiotherapy_relevant: true,
        };
        assert_eq!(code.label(), "M77.1: Tennis elbow");
        code.short_description = None;
        assert_eq!(code.label(), "M77.1: Lateral epicondylitis");
    }
}
