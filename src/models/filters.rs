use chrono::NaiveDateTime;
use uuid::Uuid;

use super::enums::{PatientStatus, TreatmentStatus};

#[derive(Debug, Default)]
pub struct PatientFilter {
    pub status: Option<PatientStatus>,
    /// Applied after notes are decrypted.
    pub search: Option<String>,
}

#[derive(Debug, Default)]
pub struct TreatmentFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<TreatmentStatus>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}
