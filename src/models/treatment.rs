use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{PaymentMethod, TreatmentStatus, TriggerPointKind};

/// A concrete dated session. `created_at` is the session date and time and
/// is the key used to recognise materialized recurring occurrences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub treatment_type: String,
    pub assessment: Option<String>,
    pub notes: Option<String>,
    pub status: TreatmentStatus,
    pub provider: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub location_id: Option<Uuid>,
    pub visit_type: Option<String>,
    pub fee_charged: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub pain_level: Option<u8>,
    pub movement_restriction: Option<String>,
    pub evaluation_data: Option<serde_json::Value>,
    pub calendly_invitee_uri: Option<String>,
    pub recurring_id: Option<Uuid>,
    pub google_event_id: Option<String>,
}

impl Treatment {
    pub fn new(patient_id: Uuid, treatment_type: &str, scheduled_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            treatment_type: treatment_type.to_string(),
            assessment: None,
            notes: None,
            status: TreatmentStatus::Scheduled,
            provider: None,
            created_at: scheduled_at,
            updated_at: chrono::Local::now().naive_local(),
            location_id: None,
            visit_type: None,
            fee_charged: None,
            payment_method: None,
            pain_level: None,
            movement_restriction: None,
            evaluation_data: None,
            calendly_invitee_uri: None,
            recurring_id: None,
            google_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPoint {
    pub id: Uuid,
    pub treatment_id: Uuid,
    pub location_x: f64,
    pub location_y: f64,
    pub kind: Option<TriggerPointKind>,
    pub muscle: Option<String>,
    pub intensity: Option<u8>,
    pub symptoms: Option<String>,
    pub referral_pattern: Option<String>,
}

/// A treatment together with its body-chart trigger points.
#[derive(Debug, Clone, Serialize)]
pub struct TreatmentDetail {
    #[serde(flatten)]
    pub treatment: Treatment,
    pub trigger_points: Vec<TriggerPoint>,
}
