use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientReport {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub content: String,
    pub report_type: String,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub report_type: String,
    pub generated_at: NaiveDateTime,
}
