//! Calendly booking import.
//!
//! The HTTP client only fetches bookings; everything that touches the
//! database works on already-fetched [`CalendlyBooking`]s so it can run
//! without the network.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{check_status, IntegrationError};
use crate::crypto::FieldKey;
use crate::db::repository;
use crate::models::{BookingStatus, Patient, PatientStatus, Treatment, UnmatchedCalendlyBooking, User};

const SERVICE: &str = "Calendly";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Sync window around "now".
pub const SYNC_PAST_DAYS: i64 = 30;
pub const SYNC_FUTURE_DAYS: i64 = 60;

// ═══════════════════════════════════════════════════════════
// Bookings
// ═══════════════════════════════════════════════════════════

/// One invitee of one scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendlyBooking {
    pub invitee_uri: String,
    pub name: String,
    pub email: String,
    pub event_type: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendlyBooking {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Calendly timestamps are UTC; sessions are stored in local wall time.
fn to_local(ts: DateTime<Utc>) -> NaiveDateTime {
    ts.with_timezone(&Local).naive_local()
}

fn parse_timestamp(value: Option<&Value>) -> Option<NaiveDateTime> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| to_local(dt.with_timezone(&Utc)))
}

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct UserEnvelope {
    resource: UserResource,
}

#[derive(Deserialize)]
struct UserResource {
    uri: String,
}

#[derive(Deserialize)]
struct Collection<T> {
    collection: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScheduledEvent {
    uri: String,
    name: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct Invitee {
    uri: String,
    name: String,
    email: String,
}

pub struct CalendlyClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl CalendlyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IntegrationError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    /// Build a client from the user's stored (encrypted) token.
    pub fn for_user(base_url: &str, user: &User, key: &FieldKey) -> Result<Self, IntegrationError> {
        let sealed = user
            .calendly_token_encrypted
            .as_deref()
            .ok_or(IntegrationError::NotConfigured(SERVICE))?;
        let token = key.decrypt_str(sealed)?;
        Self::new(base_url, &token)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, IntegrationError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(e, REQUEST_TIMEOUT_SECS))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::ResponseParsing(e.to_string()))
    }

    /// URI of the account the token belongs to.
    pub async fn current_user_uri(&self) -> Result<String, IntegrationError> {
        let url = format!("{}/users/me", self.base_url);
        let envelope: UserEnvelope = self.get(&url, &[]).await?;
        Ok(envelope.resource.uri)
    }

    /// Fetch every invitee of the active events in
    /// `[now - 30 days, now + 60 days]`. Events whose invitees cannot be
    /// fetched are skipped.
    pub async fn fetch_bookings(
        &self,
        user_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendlyBooking>, IntegrationError> {
        let min = now - chrono::Duration::days(SYNC_PAST_DAYS);
        let max = now + chrono::Duration::days(SYNC_FUTURE_DAYS);
        let url = format!("{}/scheduled_events", self.base_url);
        let events: Collection<ScheduledEvent> = self
            .get(
                &url,
                &[
                    ("user", user_uri.to_string()),
                    ("min_start_time", min.to_rfc3339()),
                    ("max_start_time", max.to_rfc3339()),
                    ("status", "active".to_string()),
                    ("count", "100".to_string()),
                ],
            )
            .await?;

        let mut bookings = Vec::new();
        for event in events.collection {
            let Some(event_uuid) = event.uri.rsplit('/').next() else {
                continue;
            };
            let url = format!("{}/scheduled_events/{event_uuid}/invitees", self.base_url);
            let invitees: Collection<Invitee> = match self.get(&url, &[]).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(event_uri = %event.uri, "Skipping event, invitees unavailable: {e}");
                    continue;
                }
            };
            for invitee in invitees.collection {
                bookings.push(CalendlyBooking {
                    invitee_uri: invitee.uri,
                    name: invitee.name,
                    email: invitee.email,
                    event_type: event.name.clone().unwrap_or_else(|| "Calendly booking".into()),
                    start: to_local(event.start_time),
                    end: to_local(event.end_time),
                });
            }
        }
        tracing::debug!(count = bookings.len(), "Fetched Calendly bookings");
        Ok(bookings)
    }
}

// ═══════════════════════════════════════════════════════════
// Applying bookings
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub already_present: usize,
    pub unmatched: usize,
}

/// Email match first, then case-insensitive full name.
pub fn match_patient(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    name: &str,
    email: &str,
) -> Result<Option<Patient>, IntegrationError> {
    if !email.trim().is_empty() {
        if let Some(p) = repository::find_patient_by_email(conn, key, user_id, email)? {
            return Ok(Some(p));
        }
    }
    if name.trim().is_empty() {
        return Ok(None);
    }
    Ok(repository::find_patient_by_name(conn, key, user_id, name)?)
}

/// Insert the session for a booking unless one already exists at the same
/// datetime or for the same invitee. Returns the new treatment, if any.
fn ensure_treatment(
    conn: &Connection,
    patient_id: &Uuid,
    booking: &CalendlyBooking,
    notes: String,
) -> Result<Option<Treatment>, IntegrationError> {
    if repository::find_treatment_by_invitee_uri(conn, &booking.invitee_uri)?.is_some()
        || repository::find_treatment_at(conn, patient_id, &booking.start)?.is_some()
    {
        return Ok(None);
    }
    let mut treatment = Treatment::new(*patient_id, &booking.event_type, booking.start);
    treatment.notes = Some(notes);
    treatment.calendly_invitee_uri = Some(booking.invitee_uri.clone());
    repository::insert_treatment(conn, &treatment)?;
    Ok(Some(treatment))
}

fn record_booking(
    conn: &Connection,
    user_id: &Uuid,
    booking: &CalendlyBooking,
    status: BookingStatus,
    patient_id: Option<Uuid>,
) -> Result<UnmatchedCalendlyBooking, IntegrationError> {
    let row = UnmatchedCalendlyBooking {
        id: Uuid::new_v4(),
        user_id: *user_id,
        name: booking.name.clone(),
        email: booking.email.clone(),
        event_type: Some(booking.event_type.clone()),
        start_time: Some(booking.start),
        end_time: Some(booking.end),
        calendly_invitee_id: Some(booking.invitee_uri.clone()),
        status,
        matched_patient_id: patient_id,
        created_at: Local::now().naive_local(),
    };
    repository::insert_booking(conn, &row)?;
    Ok(row)
}

fn placeholder_patient(user_id: Uuid, booking: &CalendlyBooking, today: &str) -> Patient {
    let mut patient = Patient::new(user_id, &booking.name);
    patient.email = Some(booking.email.clone()).filter(|e| !e.is_empty());
    patient.diagnosis = Some("To be updated (Calendly booking)".into());
    patient.treatment_plan = Some("To be determined".into());
    patient.notes = Some(format!(
        "Patient booked via Calendly on {today}. Needs review: partial information."
    ));
    patient.status = PatientStatus::PendingReview;
    patient
}

/// Apply fetched bookings in one transaction.
///
/// Unknown invitees become "Pending Review" patients plus a pending
/// booking for later review; every booking gets a Scheduled session unless
/// an identical one is already stored.
pub fn apply_bookings(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    bookings: &[CalendlyBooking],
) -> Result<SyncSummary, IntegrationError> {
    let today = Local::now().date_naive().to_string();
    let mut summary = SyncSummary::default();
    let tx = conn.unchecked_transaction()?;

    for booking in bookings {
        let patient = match match_patient(&tx, key, user_id, &booking.name, &booking.email)? {
            Some(p) => p,
            None => {
                let patient = placeholder_patient(*user_id, booking, &today);
                repository::insert_patient(&tx, key, &patient)?;
                if repository::find_booking_by_invitee(&tx, &booking.invitee_uri)?.is_none() {
                    record_booking(&tx, user_id, booking, BookingStatus::Pending, Some(patient.id))?;
                }
                summary.unmatched += 1;
                patient
            }
        };

        let notes = format!("Booked via Calendly. Duration: {} minutes.", booking.duration_minutes());
        match ensure_treatment(&tx, &patient.id, booking, notes)? {
            Some(_) => summary.synced += 1,
            None => summary.already_present += 1,
        }
    }

    tx.commit()?;
    tracing::info!(
        %user_id,
        synced = summary.synced,
        already_present = summary.already_present,
        unmatched = summary.unmatched,
        "Calendly sync applied"
    );
    Ok(summary)
}

// ═══════════════════════════════════════════════════════════
// Webhook
// ═══════════════════════════════════════════════════════════

/// An `invitee.created` delivery.
#[derive(Debug, Clone)]
pub struct InviteeCreated {
    pub booking: CalendlyBooking,
    /// Calendly users hosting the event, used to find the practitioner.
    pub host_uris: Vec<String>,
}

/// Parse a webhook body. Returns `Ok(None)` for events other than
/// `invitee.created`.
pub fn parse_webhook(body: &Value) -> Result<Option<InviteeCreated>, IntegrationError> {
    if body.get("event").and_then(Value::as_str) != Some("invitee.created") {
        return Ok(None);
    }
    let payload = body
        .get("payload")
        .ok_or_else(|| IntegrationError::Invalid("missing payload".into()))?;
    let invitee = payload.get("invitee").unwrap_or(payload);
    let event = payload
        .get("scheduled_event")
        .or_else(|| payload.get("event"))
        .unwrap_or(&Value::Null);

    let text = |v: &Value, k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let invitee_uri = invitee
        .get("uri")
        .or_else(|| invitee.get("uuid"))
        .and_then(Value::as_str)
        .ok_or_else(|| IntegrationError::Invalid("invitee without uri".into()))?
        .to_string();
    let start = parse_timestamp(event.get("start_time").or_else(|| invitee.get("start_time")))
        .ok_or_else(|| IntegrationError::Invalid("missing start_time".into()))?;
    let end = parse_timestamp(event.get("end_time").or_else(|| invitee.get("end_time")))
        .unwrap_or(start + chrono::Duration::minutes(crate::scheduling::EVENT_DURATION_MINUTES));

    let host_uris = event
        .get("event_memberships")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.get("user").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(InviteeCreated {
        booking: CalendlyBooking {
            invitee_uri,
            name: text(invitee, "name"),
            email: text(invitee, "email"),
            event_type: Some(text(event, "name"))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Calendly booking".into()),
            start,
            end,
        },
        host_uris,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookResult {
    AlreadyProcessed,
    Matched { patient_id: Uuid, booking_id: Uuid },
    Unmatched { booking_id: Uuid },
}

/// Store a webhook booking and match it automatically when possible.
pub fn apply_invitee_created(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    booking: &CalendlyBooking,
) -> Result<WebhookResult, IntegrationError> {
    if repository::find_booking_by_invitee(conn, &booking.invitee_uri)?.is_some()
        || repository::find_treatment_by_invitee_uri(conn, &booking.invitee_uri)?.is_some()
    {
        return Ok(WebhookResult::AlreadyProcessed);
    }

    let tx = conn.unchecked_transaction()?;
    let result = match match_patient(&tx, key, user_id, &booking.name, &booking.email)? {
        Some(patient) => {
            let row = record_booking(&tx, user_id, booking, BookingStatus::Matched, Some(patient.id))?;
            let notes = format!("Automatically matched from Calendly. Email: {}", booking.email);
            ensure_treatment(&tx, &patient.id, booking, notes)?;
            WebhookResult::Matched {
                patient_id: patient.id,
                booking_id: row.id,
            }
        }
        None => {
            let row = record_booking(&tx, user_id, booking, BookingStatus::Pending, None)?;
            WebhookResult::Unmatched { booking_id: row.id }
        }
    };
    tx.commit()?;
    tracing::info!(%user_id, ?result, "Calendly webhook booking stored");
    Ok(result)
}

// ═══════════════════════════════════════════════════════════
// Manual review
// ═══════════════════════════════════════════════════════════

fn booking_for(
    conn: &Connection,
    user_id: &Uuid,
    booking_id: &Uuid,
) -> Result<UnmatchedCalendlyBooking, IntegrationError> {
    repository::get_booking(conn, user_id, booking_id)?
        .ok_or_else(|| IntegrationError::NotFound(format!("booking {booking_id}")))
}

fn as_calendly_booking(row: &UnmatchedCalendlyBooking) -> Option<CalendlyBooking> {
    let start = row.start_time?;
    Some(CalendlyBooking {
        invitee_uri: row.calendly_invitee_id.clone().unwrap_or_else(|| row.id.to_string()),
        name: row.name.clone(),
        email: row.email.clone(),
        event_type: row.event_type.clone().unwrap_or_else(|| "Calendly booking".into()),
        start,
        end: row
            .end_time
            .unwrap_or(start + chrono::Duration::minutes(crate::scheduling::EVENT_DURATION_MINUTES)),
    })
}

/// Link a pending booking to an existing patient and make sure the session
/// exists.
pub fn match_booking(
    conn: &Connection,
    user_id: &Uuid,
    booking_id: &Uuid,
    patient_id: &Uuid,
) -> Result<Option<Treatment>, IntegrationError> {
    let row = booking_for(conn, user_id, booking_id)?;
    if !repository::patient_belongs_to(conn, user_id, patient_id)? {
        return Err(IntegrationError::NotFound(format!("patient {patient_id}")));
    }
    let tx = conn.unchecked_transaction()?;
    repository::set_booking_status(&tx, &row.id, BookingStatus::Matched, Some(patient_id))?;
    let created = match as_calendly_booking(&row) {
        Some(booking) => {
            let notes = format!("Booked via Calendly. Email: {}", row.email);
            ensure_treatment(&tx, patient_id, &booking, notes)?
        }
        None => None,
    };
    tx.commit()?;
    Ok(created)
}

/// Turn a booking into a real patient. A placeholder created during sync is
/// promoted to Active; otherwise a new patient is created.
pub fn create_patient_from_booking(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    booking_id: &Uuid,
) -> Result<Patient, IntegrationError> {
    let row = booking_for(conn, user_id, booking_id)?;
    let tx = conn.unchecked_transaction()?;

    let placeholder = match &row.matched_patient_id {
        Some(id) => repository::get_patient(&tx, key, user_id, id)?
            .filter(|p| p.status == PatientStatus::PendingReview),
        None => None,
    };
    let patient = match placeholder {
        Some(mut p) => {
            p.status = PatientStatus::Active;
            p.updated_at = Local::now().naive_local();
            repository::update_patient(&tx, key, &p)?;
            p
        }
        None => {
            let mut p = Patient::new(*user_id, &row.name);
            p.email = Some(row.email.clone()).filter(|e| !e.is_empty());
            p.diagnosis = Some("Created from Calendly booking".into());
            p.treatment_plan = Some("To be determined".into());
            p.notes = Some(format!(
                "Patient created from Calendly booking on {}",
                Local::now().date_naive()
            ));
            repository::insert_patient(&tx, key, &p)?;
            p
        }
    };

    repository::set_booking_status(&tx, &row.id, BookingStatus::Matched, Some(&patient.id))?;
    if let Some(booking) = as_calendly_booking(&row) {
        let notes = format!("Booked via Calendly. Email: {}", row.email);
        ensure_treatment(&tx, &patient.id, &booking, notes)?;
    }
    tx.commit()?;
    tracing::info!(%user_id, patient_id = %patient.id, "Patient created from Calendly booking");
    Ok(patient)
}

pub fn ignore_booking(conn: &Connection, user_id: &Uuid, booking_id: &Uuid) -> Result<(), IntegrationError> {
    let row = booking_for(conn, user_id, booking_id)?;
    repository::set_booking_status(conn, &row.id, BookingStatus::Ignored, row.matched_patient_id.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{TreatmentFilter, UserRole};
    use chrono::NaiveDate;
    use serde_json::json;

    fn setup() -> (Connection, FieldKey, User) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@example.com", "x".into(), UserRole::Physio);
        repository::insert_user(&conn, &user).unwrap();
        (conn, FieldKey::generate(), user)
    }

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 10).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn booking(uri: &str, name: &str, email: &str, hour: u32) -> CalendlyBooking {
        CalendlyBooking {
            invitee_uri: format!("https://api.calendly.com/scheduled_events/ev/invitees/{uri}"),
            name: name.into(),
            email: email.into(),
            event_type: "Initial assessment".into(),
            start: at(hour),
            end: at(hour + 1),
        }
    }

    fn treatments(conn: &Connection, user: &User) -> Vec<Treatment> {
        repository::list_treatments(conn, &user.id, &TreatmentFilter::default()).unwrap()
    }

    #[test]
    fn duration_is_derived_from_times() {
        assert_eq!(booking("I1", "A", "a@x.com", 9).duration_minutes(), 60);
    }

    #[test]
    fn sync_matches_existing_patient_by_email() {
        let (conn, key, user) = setup();
        let mut p = Patient::new(user.id, "Maria Lopez");
        p.email = Some("maria@example.com".into());
        repository::insert_patient(&conn, &key, &p).unwrap();

        let summary =
            apply_bookings(&conn, &key, &user.id, &[booking("I1", "M. Lopez", "MARIA@example.com", 9)]).unwrap();
        assert_eq!(summary, SyncSummary { synced: 1, already_present: 0, unmatched: 0 });

        let list = treatments(&conn, &user);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].patient_id, p.id);
        assert_eq!(list[0].created_at, at(9));
    }

    #[test]
    fn sync_falls_back_to_name_match() {
        let (conn, key, user) = setup();
        let p = Patient::new(user.id, "Jon Snow");
        repository::insert_patient(&conn, &key, &p).unwrap();

        apply_bookings(&conn, &key, &user.id, &[booking("I1", "jon snow", "other@example.com", 9)]).unwrap();
        assert_eq!(treatments(&conn, &user)[0].patient_id, p.id);
    }

    #[test]
    fn unknown_invitee_creates_pending_review_patient_and_booking() {
        let (conn, key, user) = setup();
        let summary =
            apply_bookings(&conn, &key, &user.id, &[booking("I1", "New Person", "new@example.com", 9)]).unwrap();
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.synced, 1);

        let pending = repository::count_patients(&conn, &user.id, Some(PatientStatus::PendingReview)).unwrap();
        assert_eq!(pending, 1);
        let bookings = repository::list_bookings(&conn, &user.id, Some(BookingStatus::Pending)).unwrap();
        assert_eq!(bookings.len(), 1);
        assert!(bookings[0].calendly_invitee_id.as_deref().unwrap().ends_with("/I1"));
    }

    #[test]
    fn resync_does_not_duplicate() {
        let (conn, key, user) = setup();
        let batch = [booking("I1", "New Person", "new@example.com", 9)];
        apply_bookings(&conn, &key, &user.id, &batch).unwrap();
        let second = apply_bookings(&conn, &key, &user.id, &batch).unwrap();

        assert_eq!(second.synced, 0);
        assert_eq!(second.already_present, 1);
        assert_eq!(second.unmatched, 0);
        assert_eq!(treatments(&conn, &user).len(), 1);
        assert_eq!(repository::count_patients(&conn, &user.id, None).unwrap(), 1);
    }

    #[test]
    fn existing_session_at_same_time_suppresses_import() {
        let (conn, key, user) = setup();
        let mut p = Patient::new(user.id, "Ana");
        p.email = Some("ana@example.com".into());
        repository::insert_patient(&conn, &key, &p).unwrap();
        repository::insert_treatment(&conn, &Treatment::new(p.id, "Manual", at(9))).unwrap();

        let summary = apply_bookings(&conn, &key, &user.id, &[booking("I1", "Ana", "ana@example.com", 9)]).unwrap();
        assert_eq!(summary.already_present, 1);
        assert_eq!(treatments(&conn, &user).len(), 1);
    }

    #[test]
    fn webhook_payload_parses_and_auto_matches() {
        let (conn, key, user) = setup();
        let mut p = Patient::new(user.id, "Ana");
        p.email = Some("ana@example.com".into());
        repository::insert_patient(&conn, &key, &p).unwrap();

        let body = json!({
            "event": "invitee.created",
            "payload": {
                "uri": "https://api.calendly.com/scheduled_events/E1/invitees/I9",
                "name": "Ana",
                "email": "ana@example.com",
                "scheduled_event": {
                    "name": "Follow-up",
                    "start_time": "2025-04-10T09:00:00Z",
                    "end_time": "2025-04-10T09:45:00Z",
                    "event_memberships": [{"user": "https://api.calendly.com/users/U1"}]
                }
            }
        });
        let parsed = parse_webhook(&body).unwrap().unwrap();
        assert_eq!(parsed.host_uris, vec!["https://api.calendly.com/users/U1".to_string()]);
        assert_eq!(parsed.booking.event_type, "Follow-up");
        assert_eq!(parsed.booking.duration_minutes(), 45);

        let result = apply_invitee_created(&conn, &key, &user.id, &parsed.booking).unwrap();
        assert!(matches!(result, WebhookResult::Matched { patient_id, .. } if patient_id == p.id));
        assert_eq!(treatments(&conn, &user).len(), 1);

        let again = apply_invitee_created(&conn, &key, &user.id, &parsed.booking).unwrap();
        assert_eq!(again, WebhookResult::AlreadyProcessed);
    }

    #[test]
    fn other_webhook_events_are_ignored() {
        let body = json!({"event": "invitee.canceled", "payload": {}});
        assert!(parse_webhook(&body).unwrap().is_none());
    }

    #[test]
    fn unmatched_webhook_booking_can_be_matched_manually() {
        let (conn, key, user) = setup();
        let result = apply_invitee_created(&conn, &key, &user.id, &booking("I1", "Ghost", "g@x.com", 10)).unwrap();
        let WebhookResult::Unmatched { booking_id } = result else {
            panic!("expected unmatched");
        };
        assert!(treatments(&conn, &user).is_empty());

        let p = Patient::new(user.id, "Casper");
        repository::insert_patient(&conn, &key, &p).unwrap();
        let created = match_booking(&conn, &user.id, &booking_id, &p.id).unwrap();
        assert!(created.is_some());

        let row = repository::get_booking(&conn, &user.id, &booking_id).unwrap().unwrap();
        assert_eq!(row.status, BookingStatus::Matched);
        assert_eq!(row.matched_patient_id, Some(p.id));
    }

    #[test]
    fn create_patient_promotes_placeholder() {
        let (conn, key, user) = setup();
        apply_bookings(&conn, &key, &user.id, &[booking("I1", "New Person", "new@example.com", 9)]).unwrap();
        let pending = repository::list_bookings(&conn, &user.id, Some(BookingStatus::Pending)).unwrap();

        let patient = create_patient_from_booking(&conn, &key, &user.id, &pending[0].id).unwrap();
        assert_eq!(patient.status, PatientStatus::Active);
        assert_eq!(repository::count_patients(&conn, &user.id, None).unwrap(), 1);
        assert_eq!(treatments(&conn, &user).len(), 1);
    }

    #[test]
    fn ignore_and_foreign_booking() {
        let (conn, key, user) = setup();
        let WebhookResult::Unmatched { booking_id } =
            apply_invitee_created(&conn, &key, &user.id, &booking("I1", "Ghost", "g@x.com", 10)).unwrap()
        else {
            panic!("expected unmatched");
        };
        let stranger = Uuid::new_v4();
        assert!(matches!(
            ignore_booking(&conn, &stranger, &booking_id),
            Err(IntegrationError::NotFound(_))
        ));
        ignore_booking(&conn, &user.id, &booking_id).unwrap();
        let row = repository::get_booking(&conn, &user.id, &booking_id).unwrap().unwrap();
        assert_eq!(row.status, BookingStatus::Ignored);
    }
}
