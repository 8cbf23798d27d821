//! Outbound integrations: Calendly, Google Calendar and the LLM used for
//! narrative reports.
//!
//! Every client is async `reqwest` with a fixed timeout. Callers must not
//! hold a database connection across these awaits.

pub mod calendly;
pub mod google_calendar;
pub mod llm;

use crate::crypto::CryptoError;
use crate::db::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response: {0}")]
    ResponseParsing(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<rusqlite::Error> for IntegrationError {
    fn from(err: rusqlite::Error) -> Self {
        IntegrationError::Database(DatabaseError::from(err))
    }
}

impl IntegrationError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            IntegrationError::Timeout(timeout_secs)
        } else {
            IntegrationError::Http(err.to_string())
        }
    }
}

/// Reject non-2xx responses, keeping the body for the log.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IntegrationError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}
