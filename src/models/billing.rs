use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::SubscriptionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub price_cents: i64,
    pub billing_interval: String,
    pub currency: String,
    /// `None` means unlimited.
    pub patient_limit: Option<i64>,
    pub practitioner_limit: Option<i64>,
    pub features: Vec<String>,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
    pub display_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub trial_starts_at: Option<NaiveDateTime>,
    pub trial_ends_at: Option<NaiveDateTime>,
    pub current_period_starts_at: Option<NaiveDateTime>,
    pub current_period_ends_at: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
