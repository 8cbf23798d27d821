use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::UserRole;

/// A practitioner account. Credentials and integration secrets never leave
/// the server: they are skipped when the struct is serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub clinic_name: Option<String>,
    pub language: String,
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub calendly_token_encrypted: Option<String>,
    pub calendly_user_uri: Option<String>,
    pub google_client_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub google_client_secret_encrypted: Option<String>,
    pub google_redirect_uri: Option<String>,
    #[serde(skip_serializing, default)]
    pub google_tokens_encrypted: Option<String>,
    pub google_calendar_enabled: bool,
    pub consent_given: bool,
    pub consent_date: Option<NaiveDateTime>,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
}

impl User {
    pub fn new(username: &str, email: &str, password_hash: String, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            first_name: None,
            last_name: None,
            clinic_name: None,
            language: "en".to_string(),
            stripe_customer_id: None,
            calendly_token_encrypted: None,
            calendly_user_uri: None,
            google_client_id: None,
            google_client_secret_encrypted: None,
            google_redirect_uri: None,
            google_tokens_encrypted: None,
            google_calendar_enabled: false,
            consent_given: false,
            consent_date: None,
            is_deleted: false,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Practice data is reserved to practitioners and admins.
    pub fn can_access_practice(&self) -> bool {
        matches!(self.role, UserRole::Physio | UserRole::Admin)
    }

    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }
}
