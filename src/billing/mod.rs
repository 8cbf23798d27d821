//! Subscription plans, patient and practitioner limits and the Stripe
//! integration.

pub mod plans;
pub mod stripe;

pub use plans::*;
pub use stripe::*;

use crate::db::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Patient limit of {limit} reached for the current plan")]
    PatientLimitReached { limit: i64 },

    #[error("Practitioner limit of {limit} reached for the current plan")]
    PractitionerLimitReached { limit: i64 },

    #[error("Stripe is not configured")]
    NotConfigured,

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Plan {0} has no Stripe price")]
    PlanNotPurchasable(String),

    #[error("No Stripe customer on file")]
    NoCustomer,

    #[error("Invalid webhook signature: {0}")]
    Signature(String),

    #[error("Malformed webhook payload: {0}")]
    Payload(String),

    #[error("Stripe request failed: {0}")]
    Http(String),

    #[error("Stripe returned {status}: {body}")]
    Stripe { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for BillingError {
    fn from(err: rusqlite::Error) -> Self {
        BillingError::Database(DatabaseError::from(err))
    }
}
