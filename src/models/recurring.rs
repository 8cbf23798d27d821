use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{PaymentMethod, RecurrenceType};

/// Generative template for a patient's repeating sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub recurrence_type: RecurrenceType,
    pub time_of_day: NaiveTime,
    pub treatment_type: String,
    pub notes: Option<String>,
    pub location_id: Option<Uuid>,
    pub provider: Option<String>,
    pub fee_charged: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl RecurringAppointment {
    pub fn new(
        patient_id: Uuid,
        start_date: NaiveDate,
        recurrence_type: RecurrenceType,
        time_of_day: NaiveTime,
        treatment_type: &str,
    ) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            start_date,
            end_date: None,
            recurrence_type,
            time_of_day,
            treatment_type: treatment_type.to_string(),
            notes: None,
            location_id: None,
            provider: None,
            fee_charged: None,
            payment_method: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
