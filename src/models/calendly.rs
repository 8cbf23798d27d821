use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::BookingStatus;

/// A Calendly booking that could not be tied to an existing patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedCalendlyBooking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub event_type: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub calendly_invitee_id: Option<String>,
    pub status: BookingStatus,
    pub matched_patient_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}
