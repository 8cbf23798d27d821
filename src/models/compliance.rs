use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConsent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub patient_id: Uuid,
    pub purpose: String,
    pub given_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub is_active: bool,
}

/// Append-only record of authentication and API events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: NaiveDateTime,
}
