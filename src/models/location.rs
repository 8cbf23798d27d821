use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::LocationType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub first_session_fee: Option<f64>,
    pub subsequent_session_fee: Option<f64>,
    pub fee_percentage: Option<f64>,
    pub location_type: LocationType,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}
