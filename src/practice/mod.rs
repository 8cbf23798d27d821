//! Practice records: patients, treatments, locations and ICD-10 diagnoses.
//!
//! Thin service layer over the repositories. It validates input, checks
//! ownership and plan limits, and wraps bulk operations in a single
//! transaction.

pub mod diagnoses;
pub mod locations;
pub mod patients;
pub mod treatments;

pub use diagnoses::*;
pub use locations::*;
pub use patients::*;
pub use treatments::*;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::billing::BillingError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PracticeError {
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for PracticeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

pub(crate) fn not_found(entity: &'static str, id: Uuid) -> PracticeError {
    PracticeError::NotFound { entity, id }
}

/// Result of a bulk operation. Ids that are unknown, foreign or fail are
/// skipped and counted; the rest commit together.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BulkOutcome {
    pub processed: usize,
    pub skipped: usize,
}

pub(crate) fn check_fee(name: &str, fee: Option<f64>) -> Result<(), PracticeError> {
    match fee {
        Some(v) if !(v.is_finite() && v >= 0.0) => {
            Err(PracticeError::Invalid(format!("{name} must not be negative")))
        }
        _ => Ok(()),
    }
}

pub(crate) fn check_name(name: &str) -> Result<(), PracticeError> {
    if name.trim().is_empty() {
        return Err(PracticeError::Invalid("name must not be empty".into()));
    }
    Ok(())
}

/// Empty strings from forms mean "no value".
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
