//! API error type with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::billing::BillingError;
use crate::clinic::ClinicError;
use crate::core_state::CoreError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::finance::FinanceError;
use crate::integrations::IntegrationError;
use crate::practice::PracticeError;
use crate::reports::ReportError;
use crate::scheduling::SchedulingError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Forbidden")]
    Forbidden,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Patient limit of {limit} reached")]
    PatientLimitReached { limit: i64 },
    #[error("Practitioner limit of {limit} reached")]
    PractitionerLimitReached { limit: i64 },
    #[error("{0} is not configured")]
    NotConfigured(String),
    #[error("Upstream error: {0}")]
    BadGateway(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid username or password".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "You do not have access to this resource".to_string(),
            ),
            ApiError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Rate limit exceeded. Retry after {retry_after}s"),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail.clone()),
            ApiError::PatientLimitReached { limit } => (
                StatusCode::FORBIDDEN,
                "PATIENT_LIMIT_REACHED",
                format!("Your plan allows {limit} patients. Upgrade to add more."),
            ),
            ApiError::PractitionerLimitReached { limit } => (
                StatusCode::FORBIDDEN,
                "PRACTITIONER_LIMIT_REACHED",
                format!("Your plan allows {limit} practitioners. Upgrade to add more."),
            ),
            ApiError::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                format!("{what} is not configured"),
            ),
            ApiError::BadGateway(detail) => {
                tracing::warn!(detail, "Upstream service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "An external service returned an error".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                ApiError::NotFound(format!("{entity_type} not found: {id}"))
            }
            DatabaseError::InvalidEnum { field, value } => {
                ApiError::BadRequest(format!("invalid {field}: {value}"))
            }
            DatabaseError::ConstraintViolation(detail) => ApiError::Conflict(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<PracticeError> for ApiError {
    fn from(err: PracticeError) -> Self {
        match err {
            PracticeError::Invalid(detail) => ApiError::BadRequest(detail),
            PracticeError::NotFound { entity, id } => ApiError::NotFound(format!("{entity} not found: {id}")),
            PracticeError::Billing(e) => e.into(),
            PracticeError::Database(e) => e.into(),
        }
    }
}

impl From<ClinicError> for ApiError {
    fn from(err: ClinicError) -> Self {
        match err {
            ClinicError::Invalid(detail) => ApiError::BadRequest(detail),
            ClinicError::NotInClinic | ClinicError::MemberNotFound(_) | ClinicError::InvitationInvalid => {
                ApiError::NotFound(err.to_string())
            }
            ClinicError::AlreadyInClinic => ApiError::Conflict(err.to_string()),
            ClinicError::Forbidden(permission) => {
                tracing::debug!(permission, "Clinic permission missing");
                ApiError::Forbidden
            }
            ClinicError::Billing(e) => e.into(),
            ClinicError::Database(e) => e.into(),
        }
    }
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::InvalidDateRange { .. } | SchedulingError::NotAnOccurrence(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SchedulingError::RuleNotFound(_) | SchedulingError::PatientNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            SchedulingError::Database(e) => e.into(),
        }
    }
}

impl From<FinanceError> for ApiError {
    fn from(err: FinanceError) -> Self {
        match err {
            FinanceError::Invalid(_) | FinanceError::InvalidYear(_) => ApiError::BadRequest(err.to_string()),
            FinanceError::Database(e) => e.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::PatientLimitReached { limit } => ApiError::PatientLimitReached { limit },
            BillingError::PractitionerLimitReached { limit } => ApiError::PractitionerLimitReached { limit },
            BillingError::NotConfigured => ApiError::NotConfigured("Stripe".into()),
            BillingError::UnknownPlan(slug) => ApiError::NotFound(format!("plan not found: {slug}")),
            BillingError::PlanNotPurchasable(_) | BillingError::NoCustomer => {
                ApiError::BadRequest(err.to_string())
            }
            BillingError::Signature(_) | BillingError::Payload(_) => ApiError::BadRequest(err.to_string()),
            BillingError::Http(_) | BillingError::Stripe { .. } => ApiError::BadGateway(err.to_string()),
            BillingError::Database(e) => e.into(),
        }
    }
}

impl From<IntegrationError> for ApiError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::NotConfigured(service) => ApiError::NotConfigured(service.to_string()),
            IntegrationError::Invalid(detail) => ApiError::BadRequest(detail),
            IntegrationError::NotFound(detail) => ApiError::NotFound(detail),
            IntegrationError::Http(_)
            | IntegrationError::Timeout(_)
            | IntegrationError::Status { .. }
            | IntegrationError::ResponseParsing(_) => ApiError::BadGateway(err.to_string()),
            IntegrationError::Database(e) => e.into(),
            IntegrationError::Crypto(e) => e.into(),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::PatientNotFound(_) => ApiError::NotFound(err.to_string()),
            ReportError::NoTreatments => ApiError::BadRequest(err.to_string()),
            ReportError::Database(e) => e.into(),
            ReportError::Finance(e) => e.into(),
        }
    }
}
