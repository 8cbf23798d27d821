//! Google Calendar: per-user OAuth client, token storage and event creation.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use reqwest::Url;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{check_status, IntegrationError};
use crate::crypto::FieldKey;
use crate::db::repository;
use crate::models::{Treatment, User};
use crate::scheduling::EVENT_DURATION_MINUTES;

const SERVICE: &str = "Google Calendar";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/calendar.events",
];

/// Seconds before expiry at which an access token is refreshed.
const EXPIRY_SKEW_SECS: i64 = 60;

// ═══════════════════════════════════════════════════════════
// Credentials and tokens
// ═══════════════════════════════════════════════════════════

/// A practitioner's own OAuth client, with the secret decrypted.
#[derive(Debug, Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl GoogleCredentials {
    pub fn for_user(user: &User, key: &FieldKey) -> Result<Self, IntegrationError> {
        let (Some(client_id), Some(secret), Some(redirect_uri)) = (
            user.google_client_id.as_deref(),
            user.google_client_secret_encrypted.as_deref(),
            user.google_redirect_uri.as_deref(),
        ) else {
            return Err(IntegrationError::NotConfigured(SERVICE));
        };
        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: key.decrypt_str(secret)?,
            redirect_uri: redirect_uri.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

impl GoogleTokens {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| now_unix + EXPIRY_SKEW_SECS >= exp)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_tokens(self, now_unix: i64, previous_refresh: Option<String>) -> GoogleTokens {
        GoogleTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|s| now_unix + s),
        }
    }
}

/// Store the OAuth client of a user. The secret is encrypted at rest.
pub fn save_client(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
) -> Result<(), IntegrationError> {
    if client_id.trim().is_empty() || client_secret.trim().is_empty() || redirect_uri.trim().is_empty() {
        return Err(IntegrationError::Invalid(
            "client_id, client_secret and redirect_uri are required".into(),
        ));
    }
    let sealed = key.encrypt_str(client_secret.trim())?;
    repository::set_google_client(conn, user_id, client_id.trim(), &sealed, redirect_uri.trim())?;
    Ok(())
}

pub fn store_tokens(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    tokens: &GoogleTokens,
) -> Result<(), IntegrationError> {
    let json = serde_json::to_string(tokens).map_err(|e| IntegrationError::Invalid(e.to_string()))?;
    let sealed = key.encrypt_str(&json)?;
    repository::set_google_tokens(conn, user_id, Some(&sealed))?;
    Ok(())
}

pub fn load_tokens(user: &User, key: &FieldKey) -> Result<Option<GoogleTokens>, IntegrationError> {
    let Some(sealed) = user.google_tokens_encrypted.as_deref() else {
        return Ok(None);
    };
    let json = key.decrypt_str(sealed)?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| IntegrationError::ResponseParsing(format!("stored tokens: {e}")))
}

pub fn disconnect(conn: &Connection, user_id: &Uuid) -> Result<(), IntegrationError> {
    repository::set_google_tokens(conn, user_id, None)?;
    tracing::info!(%user_id, "Google Calendar disconnected");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleStatus {
    pub configured: bool,
    pub connected: bool,
    pub enabled: bool,
    pub redirect_uri: Option<String>,
}

pub fn status(user: &User) -> GoogleStatus {
    GoogleStatus {
        configured: user.google_client_id.is_some() && user.google_client_secret_encrypted.is_some(),
        connected: user.google_tokens_encrypted.is_some(),
        enabled: user.google_calendar_enabled,
        redirect_uri: user.google_redirect_uri.clone(),
    }
}

/// Consent-screen URL. `state` carries the user id back to the callback.
pub fn authorization_url(creds: &GoogleCredentials, state: &Uuid) -> Result<String, IntegrationError> {
    let scope = SCOPES.join(" ");
    let state = state.to_string();
    let url = Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", creds.client_id.as_str()),
            ("redirect_uri", creds.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| IntegrationError::Invalid(e.to_string()))?;
    Ok(url.into())
}

// ═══════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    #[serde(rename = "htmlLink")]
    pub html_link: Option<String>,
}

/// Naive local wall time rendered with the server's UTC offset.
fn rfc3339_local(at: NaiveDateTime) -> String {
    match Local.from_local_datetime(&at).earliest() {
        Some(dt) => dt.to_rfc3339(),
        None => format!("{}Z", at.format("%Y-%m-%dT%H:%M:%S")),
    }
}

pub fn event_for_treatment(treatment: &Treatment, patient_name: &str, location: Option<&str>) -> EventRequest {
    let end = treatment.created_at + chrono::Duration::minutes(EVENT_DURATION_MINUTES);
    EventRequest {
        summary: format!("{patient_name} - {}", treatment.treatment_type),
        description: treatment.notes.clone(),
        location: location.map(str::to_string),
        start: EventTime {
            date_time: rfc3339_local(treatment.created_at),
        },
        end: EventTime {
            date_time: rfc3339_local(end),
        },
    }
}

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

pub struct GoogleCalendarClient {
    token_url: String,
    api_url: String,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new() -> Result<Self, IntegrationError> {
        Self::with_endpoints(TOKEN_URL, CALENDAR_API_URL)
    }

    pub fn with_endpoints(token_url: &str, api_url: &str) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IntegrationError::Http(e.to_string()))?;
        Ok(Self {
            token_url: token_url.to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, IntegrationError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(e, REQUEST_TIMEOUT_SECS))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::ResponseParsing(e.to_string()))
    }

    /// Exchange an authorization code from the OAuth callback.
    pub async fn exchange_code(
        &self,
        creds: &GoogleCredentials,
        code: &str,
        now_unix: i64,
    ) -> Result<GoogleTokens, IntegrationError> {
        let response = self
            .token_request(&[
                ("code", code),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("redirect_uri", creds.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await?;
        Ok(response.into_tokens(now_unix, None))
    }

    pub async fn refresh(
        &self,
        creds: &GoogleCredentials,
        tokens: &GoogleTokens,
        now_unix: i64,
    ) -> Result<GoogleTokens, IntegrationError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| IntegrationError::Invalid("no refresh token, reconnect Google Calendar".into()))?;
        let response = self
            .token_request(&[
                ("refresh_token", refresh_token),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        Ok(response.into_tokens(now_unix, tokens.refresh_token.clone()))
    }

    pub async fn create_event(
        &self,
        access_token: &str,
        event: &EventRequest,
    ) -> Result<CreatedEvent, IntegrationError> {
        let url = format!("{}/calendars/primary/events", self.api_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(e, REQUEST_TIMEOUT_SECS))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::ResponseParsing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::UserRole;
    use chrono::NaiveDate;

    fn creds() -> GoogleCredentials {
        GoogleCredentials {
            client_id: "client-123.apps.googleusercontent.com".into(),
            client_secret: "shh".into(),
            redirect_uri: "http://localhost:5000/api/google-calendar/callback".into(),
        }
    }

    #[test]
    fn authorization_url_requests_offline_consent() {
        let state = Uuid::new_v4();
        let url = authorization_url(&creds(), &state).unwrap();
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains(&format!("state={state}")));
        assert!(url.contains("client_id=client-123.apps.googleusercontent.com"));
    }

    #[test]
    fn client_and_tokens_are_stored_encrypted() {
        let conn = open_memory_database().unwrap();
        let key = FieldKey::generate();
        let user = User::new("physio", "p@example.com", "x".into(), UserRole::Physio);
        repository::insert_user(&conn, &user).unwrap();

        save_client(&conn, &key, &user.id, "cid", "secret", "http://cb").unwrap();
        let tokens = GoogleTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: Some(1_700_000_000),
        };
        store_tokens(&conn, &key, &user.id, &tokens).unwrap();

        let stored = repository::get_user(&conn, &user.id).unwrap().unwrap();
        assert_ne!(stored.google_client_secret_encrypted.as_deref(), Some("secret"));
        assert!(!stored.google_tokens_encrypted.as_deref().unwrap().contains("rt"));
        assert_eq!(GoogleCredentials::for_user(&stored, &key).unwrap().client_secret, "secret");
        assert_eq!(load_tokens(&stored, &key).unwrap(), Some(tokens));

        let st = status(&stored);
        assert!(st.configured && st.connected && st.enabled);

        disconnect(&conn, &user.id).unwrap();
        let stored = repository::get_user(&conn, &user.id).unwrap().unwrap();
        assert!(!status(&stored).connected);
        assert!(!stored.google_calendar_enabled);
    }

    #[test]
    fn missing_client_is_not_configured() {
        let user = User::new("physio", "p@example.com", "x".into(), UserRole::Physio);
        assert!(matches!(
            GoogleCredentials::for_user(&user, &FieldKey::generate()),
            Err(IntegrationError::NotConfigured(_))
        ));
    }

    #[test]
    fn token_expiry_uses_skew() {
        let tokens = GoogleTokens {
            access_token: "at".into(),
            refresh_token: None,
            expires_at: Some(1_000),
        };
        assert!(!tokens.is_expired(900));
        assert!(tokens.is_expired(950));
    }

    #[test]
    fn event_spans_one_hour() {
        let at = NaiveDate::from_ymd_opt(2025, 5, 2).unwrap().and_hms_opt(10, 30, 0).unwrap();
        let t = Treatment::new(Uuid::new_v4(), "Massage", at);
        let event = event_for_treatment(&t, "Ana", Some("Clinic"));
        assert_eq!(event.summary, "Ana - Massage");
        assert!(event.start.date_time.starts_with("2025-05-02T10:30:00"));
        assert!(event.end.date_time.starts_with("2025-05-02T11:30:00"));
    }
}
