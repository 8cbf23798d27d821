//! Narrative reports for a patient's progress and for the practice as a
//! whole.
//!
//! Generation is split in three so the HTTP handler can release its
//! database connection while the LLM call is in flight:
//! 1. `draft_*` reads everything it needs and builds the prompt and a
//!    template fallback.
//! 2. `write_report` asks the LLM, degrading to the fallback on any error.
//! 3. `save_*` persists the result.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::analytics::{self, PracticeStats};
use crate::crypto::FieldKey;
use crate::db::{repository, DatabaseError};
use crate::finance::{self, FinanceError, Figure, YearReport};
use crate::integrations::llm::LlmClient;
use crate::integrations::IntegrationError;
use crate::models::{Patient, PatientReport, PracticeReport, Treatment, TreatmentStatus, User};

pub const REPORT_AI: &str = "AI Generated";
pub const REPORT_TEMPLATE: &str = "Fallback Report";
pub const REPORT_NO_KEY: &str = "Fallback Report (No API Key)";
pub const REPORT_API_ERROR: &str = "Fallback Report (API Error)";
pub const REPORT_PARSE_ERROR: &str = "Fallback Report (Parse Error)";
pub const REPORT_TIMEOUT: &str = "Fallback Report (Timeout)";
pub const REPORT_REQUEST_ERROR: &str = "Fallback Report (Request Error)";

const PATIENT_SYSTEM_PROMPT: &str =
    "You are a professional physiotherapist creating a treatment progress report.";
const PRACTICE_SYSTEM_PROMPT: &str =
    "You are a practice-management consultant reviewing a physiotherapy clinic's activity.";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("No treatments recorded for this patient")]
    NoTreatments,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Finance error: {0}")]
    Finance(#[from] FinanceError),
}

impl From<rusqlite::Error> for ReportError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

/// Everything needed to produce a report without touching the database.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    /// `None` means the LLM is not consulted and the fallback is final.
    pub prompt: Option<String>,
    pub system: &'static str,
    pub fallback: String,
    pub fallback_type: &'static str,
}

/// Generated text plus the label describing how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenReport {
    pub content: String,
    pub report_type: String,
}

fn fallback_label(err: &IntegrationError) -> &'static str {
    match err {
        IntegrationError::Timeout(_) => REPORT_TIMEOUT,
        IntegrationError::Status { .. } => REPORT_API_ERROR,
        IntegrationError::ResponseParsing(_) => REPORT_PARSE_ERROR,
        IntegrationError::NotConfigured(_) => REPORT_NO_KEY,
        _ => REPORT_REQUEST_ERROR,
    }
}

/// Ask the LLM for the report body. Never fails: every error path falls
/// back to the template in the draft.
pub async fn write_report(llm: Option<&dyn LlmClient>, draft: ReportDraft) -> WrittenReport {
    let Some(prompt) = draft.prompt.as_deref() else {
        return WrittenReport {
            content: draft.fallback,
            report_type: draft.fallback_type.to_string(),
        };
    };
    let Some(llm) = llm else {
        return WrittenReport {
            content: draft.fallback,
            report_type: REPORT_NO_KEY.to_string(),
        };
    };

    match llm.complete(draft.system, prompt).await {
        Ok(text) if !text.trim().is_empty() => WrittenReport {
            content: text,
            report_type: REPORT_AI.to_string(),
        },
        Ok(_) => {
            tracing::warn!("LLM returned an empty report, using template");
            WrittenReport {
                content: draft.fallback,
                report_type: REPORT_PARSE_ERROR.to_string(),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Report generation failed, using template");
            WrittenReport {
                content: draft.fallback,
                report_type: fallback_label(&e).to_string(),
            }
        }
    }
}

// ═══════════════════════════════════════════
// Patient progress report
// ═══════════════════════════════════════════

/// Completed sessions and anything dated before `now` count towards the
/// report. When none qualify but sessions exist, the template is built
/// from all of them and the LLM is skipped.
pub fn draft_patient_report(
    conn: &Connection,
    key: &FieldKey,
    user: &User,
    patient_id: &Uuid,
    now: NaiveDateTime,
) -> Result<ReportDraft, ReportError> {
    let patient = repository::get_patient(conn, key, &user.id, patient_id)?
        .ok_or(ReportError::PatientNotFound(*patient_id))?;

    let mut sessions = repository::list_patient_treatments(conn, patient_id)?;
    if sessions.is_empty() {
        return Err(ReportError::NoTreatments);
    }
    sessions.sort_by_key(|t| t.created_at);

    let relevant: Vec<Treatment> = sessions
        .iter()
        .filter(|t| t.status == TreatmentStatus::Completed || t.created_at < now)
        .cloned()
        .collect();

    if relevant.is_empty() {
        return Ok(ReportDraft {
            prompt: None,
            system: PATIENT_SYSTEM_PROMPT,
            fallback: patient_template(&patient, &sessions, user, now.date()),
            fallback_type: REPORT_TEMPLATE,
        });
    }

    Ok(ReportDraft {
        prompt: Some(patient_prompt(&patient, &relevant)),
        system: PATIENT_SYSTEM_PROMPT,
        fallback: patient_template(&patient, &relevant, user, now.date()),
        fallback_type: REPORT_TEMPLATE,
    })
}

pub fn save_patient_report(
    conn: &Connection,
    patient_id: &Uuid,
    written: WrittenReport,
) -> Result<PatientReport, ReportError> {
    let report = PatientReport {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        content: written.content,
        report_type: written.report_type,
        generated_at: chrono::Local::now().naive_local(),
    };
    repository::insert_patient_report(conn, &report)?;
    tracing::info!(report_id = %report.id, patient_id = %patient_id, kind = %report.report_type, "Patient report saved");
    Ok(report)
}

fn or_none(v: &Option<String>) -> &str {
    v.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or("None")
}

fn pain(t: &Treatment) -> String {
    t.pain_level
        .map(|p| format!("{p}/10"))
        .unwrap_or_else(|| "Not recorded".into())
}

fn patient_prompt(patient: &Patient, sessions: &[Treatment]) -> String {
    let mut prompt = format!(
        "Create a professional treatment progress report for the following patient.\n\n\
         Patient: {}\nDiagnosis: {}\nTreatment plan: {}\n\nSessions:\n",
        patient.name,
        or_none(&patient.diagnosis),
        or_none(&patient.treatment_plan),
    );
    for t in sessions {
        prompt.push_str(&format!(
            "- {} | {} | notes: {} | pain: {} | movement restriction: {} | status: {}\n",
            t.created_at.format("%Y-%m-%d"),
            t.treatment_type,
            or_none(&t.notes),
            pain(t),
            or_none(&t.movement_restriction),
            t.status,
        ));
    }
    prompt.push_str(
        "\nInclude a summary of the treatment course, key observations, an assessment of \
         pain and movement over time, and recommendations for further care. \
         Format the report in markdown.",
    );
    prompt
}

fn signature(user: &User) -> String {
    match user.clinic_name.as_deref().filter(|c| !c.is_empty()) {
        Some(clinic) => format!("{}, {}", user.display_name(), clinic),
        None => user.display_name(),
    }
}

fn patient_template(patient: &Patient, sessions: &[Treatment], user: &User, today: NaiveDate) -> String {
    let mut out = String::from("# Treatment Progress Report\n\n");
    out.push_str(&format!("**Patient:** {}\n", patient.name));
    out.push_str(&format!("**Diagnosis:** {}\n", or_none(&patient.diagnosis)));
    out.push_str(&format!("**Date:** {}\n\n", today.format("%Y-%m-%d")));

    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "{} session(s) recorded. Treatment plan: {}.\n\n",
        sessions.len(),
        or_none(&patient.treatment_plan),
    ));

    out.push_str("## Treatment History\n\n");
    for t in sessions {
        out.push_str(&format!("### Session on {}\n\n", t.created_at.format("%Y-%m-%d")));
        out.push_str(&format!("- **Treatment:** {}\n", t.treatment_type));
        out.push_str(&format!("- **Notes:** {}\n", or_none(&t.notes)));
        out.push_str(&format!("- **Pain level:** {}\n", pain(t)));
        out.push_str(&format!(
            "- **Movement restriction:** {}\n\n",
            or_none(&t.movement_restriction)
        ));
    }

    out.push_str("## Recommendations\n\n");
    out.push_str("Continue the current treatment plan and reassess at the next session.\n\n");
    out.push_str(&format!("_{}_\n", signature(user)));
    out
}

// ═══════════════════════════════════════════
// Practice report
// ═══════════════════════════════════════════

pub fn draft_practice_report(
    conn: &Connection,
    user: &User,
    today: NaiveDate,
) -> Result<ReportDraft, ReportError> {
    let stats = analytics::practice_stats(conn, &user.id, today)?;
    let year = finance::financial_year(conn, &user.id, today.year())?;
    Ok(ReportDraft {
        prompt: Some(practice_prompt(&stats, &year)),
        system: PRACTICE_SYSTEM_PROMPT,
        fallback: practice_template(&stats, &year, user, today),
        fallback_type: REPORT_TEMPLATE,
    })
}

pub fn save_practice_report(
    conn: &Connection,
    user_id: &Uuid,
    written: WrittenReport,
) -> Result<PracticeReport, ReportError> {
    let report = PracticeReport {
        id: Uuid::new_v4(),
        user_id: *user_id,
        content: written.content,
        report_type: written.report_type,
        generated_at: chrono::Local::now().naive_local(),
    };
    repository::insert_practice_report(conn, &report)?;
    tracing::info!(report_id = %report.id, kind = %report.report_type, "Practice report saved");
    Ok(report)
}

fn figure(f: Figure) -> String {
    match f.amount() {
        Some(v) => format!("{v:.2}"),
        None => crate::finance::NOT_AVAILABLE.to_string(),
    }
}

fn practice_prompt(stats: &PracticeStats, year: &YearReport) -> String {
    let diagnoses = stats
        .top_diagnoses
        .iter()
        .map(|d| format!("{} ({})", d.diagnosis, d.count))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Review this physiotherapy practice.\n\n\
         Patients: {} total, {} active, {} inactive\n\
         Treatments: {} total, {} completed ({}% completion)\n\
         Average treatments per patient: {}\n\
         Top diagnoses: {}\n\
         Year {}: {} sessions, gross {:.2}, net income {:.2}, contribution {}\n\n\
         Summarise activity, point out trends and suggest concrete improvements. \
         Format the report in markdown.",
        stats.total_patients,
        stats.active_patients,
        stats.inactive_patients,
        stats.total_treatments,
        stats.completed_treatments,
        stats.completion_rate,
        stats.avg_treatments_per_patient,
        if diagnoses.is_empty() { "None".to_string() } else { diagnoses },
        year.year,
        year.annual.session_count,
        year.annual.gross,
        year.annual.net_income,
        figure(year.annual.contribution),
    )
}

fn practice_template(stats: &PracticeStats, year: &YearReport, user: &User, today: NaiveDate) -> String {
    let mut out = String::from("# Practice Report\n\n");
    out.push_str(&format!("**Date:** {}\n\n", today.format("%Y-%m-%d")));

    out.push_str("## Patients\n\n");
    out.push_str(&format!(
        "- Total: {}\n- Active: {}\n- Inactive: {}\n\n",
        stats.total_patients, stats.active_patients, stats.inactive_patients
    ));

    out.push_str("## Treatments\n\n");
    out.push_str(&format!(
        "- Total: {}\n- Completed: {} ({}%)\n- Average per patient: {}\n\n",
        stats.total_treatments,
        stats.completed_treatments,
        stats.completion_rate,
        stats.avg_treatments_per_patient
    ));

    if !stats.top_diagnoses.is_empty() {
        out.push_str("## Top Diagnoses\n\n");
        for d in &stats.top_diagnoses {
            out.push_str(&format!("- {}: {}\n", d.diagnosis, d.count));
        }
        out.push('\n');
    }

    out.push_str(&format!("## Finances {}\n\n", year.year));
    out.push_str(&format!(
        "- Sessions: {}\n- Gross: {:.2}\n- Net income: {:.2}\n- Contribution: {}\n- Net after contribution: {}\n\n",
        year.annual.session_count,
        year.annual.gross,
        year.annual.net_income,
        figure(year.annual.contribution),
        figure(year.annual.net_after_contribution),
    ));

    out.push_str(&format!("_{}_\n", signature(user)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::integrations::llm::MockLlmClient;
    use crate::models::UserRole;

    fn setup() -> (Connection, FieldKey, User, Patient) {
        let conn = open_memory_database().unwrap();
        let key = FieldKey::from_bytes([5u8; 32]);
        let mut user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        user.first_name = Some("Dana".into());
        user.clinic_name = Some("Harbour Physio".into());
        repository::insert_user(&conn, &user).unwrap();
        let mut patient = Patient::new(user.id, "Ana Ruiz");
        patient.diagnosis = Some("Lumbar strain".into());
        repository::insert_patient(&conn, &key, &patient).unwrap();
        (conn, key, user, patient)
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn add_session(conn: &Connection, patient: &Patient, when: NaiveDateTime, status: TreatmentStatus) {
        let mut t = Treatment::new(patient.id, "Manual therapy", when);
        t.status = status;
        t.pain_level = Some(6);
        t.notes = Some("Stiff in the morning".into());
        repository::insert_treatment(conn, &t).unwrap();
    }

    #[test]
    fn patient_without_sessions_is_rejected() {
        let (conn, key, user, patient) = setup();
        let err = draft_patient_report(&conn, &key, &user, &patient.id, at(2024, 6, 1)).unwrap_err();
        assert!(matches!(err, ReportError::NoTreatments));
    }

    #[test]
    fn unknown_patient_is_not_found() {
        let (conn, key, user, _) = setup();
        let err = draft_patient_report(&conn, &key, &user, &Uuid::new_v4(), at(2024, 6, 1)).unwrap_err();
        assert!(matches!(err, ReportError::PatientNotFound(_)));
    }

    #[test]
    fn only_future_sessions_yield_template_without_prompt() {
        let (conn, key, user, patient) = setup();
        add_session(&conn, &patient, at(2024, 7, 1), TreatmentStatus::Scheduled);
        let draft = draft_patient_report(&conn, &key, &user, &patient.id, at(2024, 6, 1)).unwrap();
        assert!(draft.prompt.is_none());
        assert!(draft.fallback.contains("### Session on 2024-07-01"));
    }

    #[tokio::test]
    async fn llm_text_is_saved_as_ai_generated() {
        let (conn, key, user, patient) = setup();
        add_session(&conn, &patient, at(2024, 5, 1), TreatmentStatus::Completed);
        add_session(&conn, &patient, at(2024, 7, 1), TreatmentStatus::Scheduled);
        let draft = draft_patient_report(&conn, &key, &user, &patient.id, at(2024, 6, 1)).unwrap();

        let llm = MockLlmClient::new("## Progress\nImproving.");
        let written = write_report(Some(&llm), draft).await;
        assert_eq!(written.report_type, REPORT_AI);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("Ana Ruiz"));
        assert!(prompt.contains("Lumbar strain"));
        assert!(prompt.contains("2024-05-01"));
        assert!(!prompt.contains("2024-07-01"));

        let saved = save_patient_report(&conn, &patient.id, written).unwrap();
        let listed = repository::list_patient_reports(&conn, &user.id, &patient.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, saved.id);
    }

    #[tokio::test]
    async fn missing_client_falls_back_to_template() {
        let (conn, key, user, patient) = setup();
        add_session(&conn, &patient, at(2024, 5, 1), TreatmentStatus::Completed);
        let draft = draft_patient_report(&conn, &key, &user, &patient.id, at(2024, 6, 1)).unwrap();

        let written = write_report(None, draft).await;
        assert_eq!(written.report_type, REPORT_NO_KEY);
        assert!(written.content.starts_with("# Treatment Progress Report"));
        assert!(written.content.contains("## Recommendations"));
        assert!(written.content.contains("Dana, Harbour Physio"));
    }

    #[tokio::test]
    async fn llm_errors_map_to_fallback_labels() {
        let cases: [(fn() -> IntegrationError, &str); 4] = [
            (|| IntegrationError::Timeout(60), REPORT_TIMEOUT),
            (
                || IntegrationError::Status {
                    service: "DeepSeek",
                    status: 500,
                    body: String::new(),
                },
                REPORT_API_ERROR,
            ),
            (|| IntegrationError::ResponseParsing("bad".into()), REPORT_PARSE_ERROR),
            (|| IntegrationError::Http("refused".into()), REPORT_REQUEST_ERROR),
        ];
        for (make, expected) in cases {
            let draft = ReportDraft {
                prompt: Some("p".into()),
                system: PATIENT_SYSTEM_PROMPT,
                fallback: "template".into(),
                fallback_type: REPORT_TEMPLATE,
            };
            let llm = MockLlmClient::failing(make);
            let written = write_report(Some(&llm), draft).await;
            assert_eq!(written.report_type, expected);
            assert_eq!(written.content, "template");
        }
    }

    #[tokio::test]
    async fn practice_report_uses_stats_and_na_contribution() {
        let (conn, _key, user, patient) = setup();
        add_session(&conn, &patient, at(2024, 5, 1), TreatmentStatus::Completed);
        let draft = draft_practice_report(&conn, &user, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).unwrap();
        assert!(draft.prompt.as_deref().unwrap().contains("contribution N/A"));

        let written = write_report(None, draft).await;
        assert!(written.content.contains("# Practice Report"));
        assert!(written.content.contains("- Contribution: N/A"));

        save_practice_report(&conn, &user.id, written).unwrap();
        assert_eq!(repository::list_practice_reports(&conn, &user.id).unwrap().len(), 1);
    }
}
