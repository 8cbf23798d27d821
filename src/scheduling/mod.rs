//! Recurring-appointment engine and calendar feed.
//!
//! Recurring rules are generative templates: they are expanded at query
//! time into candidate datetimes, and a candidate is considered already
//! materialized iff a treatment of the same patient has exactly that
//! `created_at`. No other linkage is consulted.

pub mod calendar;
pub mod recurrence;
pub mod rules;

pub use calendar::*;
pub use recurrence::*;
pub use rules::*;

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("End date {end} is before start date {start}")]
    InvalidDateRange { start: String, end: String },

    #[error("{0} is not an occurrence of this recurring appointment")]
    NotAnOccurrence(String),

    #[error("Recurring appointment not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for SchedulingError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}
