//! Stripe Checkout, Billing Portal and webhook processing.
//!
//! Outbound calls use form-encoded requests authenticated with the secret
//! key. Webhook payloads are verified against the `Stripe-Signature` header
//! before anything is parsed, then applied to the local subscription rows.

use std::time::Duration;

use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::BillingError;
use crate::config::AppConfig;
use crate::db::repository;
use crate::models::{Plan, SubscriptionStatus, UserSubscription};

/// Maximum age of a signed webhook timestamp.
pub const WEBHOOK_TOLERANCE_SECS: u64 = 300;

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct PortalSession {
    url: String,
}

pub struct StripeClient {
    base_url: String,
    secret_key: String,
    client: reqwest::Client,
}

impl StripeClient {
    pub fn new(base_url: &str, secret_key: &str) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BillingError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, BillingError> {
        let key = config
            .stripe_secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(BillingError::NotConfigured)?;
        Self::new(&config.stripe_base_url, key)
    }

    /// Start a subscription-mode Checkout Session for `plan`.
    pub async fn create_checkout_session(
        &self,
        user_id: &Uuid,
        customer: CheckoutCustomer<'_>,
        plan: &Plan,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, BillingError> {
        let price_id = plan
            .stripe_price_id
            .as_deref()
            .ok_or_else(|| BillingError::PlanNotPurchasable(plan.slug.clone()))?;

        let mut form = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("client_reference_id", user_id.to_string()),
            ("metadata[plan_slug]", plan.slug.clone()),
            ("success_url", success_url.to_string()),
            ("cancel_url", cancel_url.to_string()),
        ];
        match customer {
            CheckoutCustomer::Existing(id) => form.push(("customer", id.to_string())),
            CheckoutCustomer::Email(email) => form.push(("customer_email", email.to_string())),
        }

        let session: CheckoutSession = self.post_form("/v1/checkout/sessions", &form).await?;
        tracing::info!(%user_id, plan = %plan.slug, session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    /// Billing Portal URL for an existing customer.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError> {
        let form = vec![
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        let portal: PortalSession = self.post_form("/v1/billing_portal/sessions", &form).await?;
        Ok(portal.url)
    }

    /// Fetch a Checkout Session with its line items and subscription expanded.
    pub async fn retrieve_checkout_session(&self, session_id: &str) -> Result<Value, BillingError> {
        let url = format!("{}/v1/checkout/sessions/{session_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(&[
                ("expand[]", "line_items"),
                ("expand[]", "subscription"),
            ])
            .send()
            .await
            .map_err(|e| BillingError::Http(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, BillingError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BillingError::Http(format!("Request timed out after {REQUEST_TIMEOUT_SECS}s"))
                } else {
                    BillingError::Http(e.to_string())
                }
            })?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, BillingError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Stripe {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| BillingError::Payload(e.to_string()))
    }
}

/// How Checkout identifies the paying customer.
#[derive(Debug, Clone, Copy)]
pub enum CheckoutCustomer<'a> {
    Existing(&'a str),
    Email(&'a str),
}

// ═══════════════════════════════════════════════════════════
// Webhook signature
// ═══════════════════════════════════════════════════════════

fn hmac_hex(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, BillingError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Build a `Stripe-Signature` header value for `payload`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, BillingError> {
    Ok(format!("t={timestamp},v1={}", hmac_hex(secret, timestamp, payload)?))
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`).
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), BillingError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or_else(|| BillingError::Signature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(BillingError::Signature("no v1 signature".into()));
    }
    if now_unix.abs_diff(timestamp) > WEBHOOK_TOLERANCE_SECS {
        return Err(BillingError::Signature("timestamp outside tolerance".into()));
    }

    let expected = hmac_hex(secret, timestamp, payload)?;
    let matched = candidates
        .iter()
        .any(|c| bool::from(c.as_bytes().ct_eq(expected.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(BillingError::Signature("signature mismatch".into()))
    }
}

// ═══════════════════════════════════════════════════════════
// Webhook events
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

pub fn parse_event(payload: &[u8]) -> Result<StripeEvent, BillingError> {
    serde_json::from_slice(payload).map_err(|e| BillingError::Payload(e.to_string()))
}

/// Outcome of a processed webhook, echoed back to Stripe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    SubscriptionCreated { subscription_id: Uuid },
    SubscriptionUpdated { subscription_id: Uuid },
    UnknownSubscription,
    Ignored,
}

/// Either an id string or an expanded object carrying an `id`.
fn expandable_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn unix_to_naive(value: &Value) -> Option<NaiveDateTime> {
    value
        .as_i64()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.naive_utc())
}

/// The subscription fields mirrored into `user_subscriptions`.
#[derive(Debug, Clone)]
pub struct StripeSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Option<NaiveDateTime>,
    pub current_period_end: Option<NaiveDateTime>,
    pub trial_start: Option<NaiveDateTime>,
    pub trial_end: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
}

impl StripeSubscription {
    pub fn from_value(value: &Value) -> Result<Self, BillingError> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::Payload("subscription without id".into()))?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::Payload("subscription without status".into()))?
            .parse::<SubscriptionStatus>()
            .map_err(|e| BillingError::Payload(e.to_string()))?;
        let price_id = value
            .pointer("/items/data/0/price/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let field = |name: &str| value.get(name).and_then(unix_to_naive);
        Ok(Self {
            id: id.to_string(),
            status,
            price_id,
            current_period_start: field("current_period_start"),
            current_period_end: field("current_period_end"),
            trial_start: field("trial_start"),
            trial_end: field("trial_end"),
            cancel_at_period_end: value
                .get("cancel_at_period_end")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            canceled_at: field("canceled_at"),
            ended_at: field("ended_at"),
        })
    }

    fn apply_to(&self, row: &mut UserSubscription) {
        row.status = self.status;
        row.current_period_starts_at = self.current_period_start;
        row.current_period_ends_at = self.current_period_end;
        row.trial_starts_at = self.trial_start;
        row.trial_ends_at = self.trial_end;
        row.cancel_at_period_end = self.cancel_at_period_end;
        row.canceled_at = self.canceled_at;
        row.ended_at = self.ended_at;
    }
}

/// The parts of a completed Checkout Session needed to grant access.
#[derive(Debug, Clone)]
pub struct CheckoutCompletion {
    pub session_id: String,
    pub client_reference_id: Option<String>,
    pub customer_id: Option<String>,
    pub price_id: Option<String>,
    pub plan_slug: Option<String>,
    /// Present only when the session was retrieved with `subscription` expanded.
    pub subscription: Option<StripeSubscription>,
    pub subscription_id: Option<String>,
}

impl CheckoutCompletion {
    pub fn from_session(session: &Value) -> Result<Self, BillingError> {
        let session_id = session
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::Payload("checkout session without id".into()))?
            .to_string();
        let subscription_value = session.get("subscription").unwrap_or(&Value::Null);
        let subscription = match subscription_value {
            Value::Object(_) => Some(StripeSubscription::from_value(subscription_value)?),
            _ => None,
        };
        Ok(Self {
            session_id,
            client_reference_id: session
                .get("client_reference_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            customer_id: session.get("customer").and_then(expandable_id),
            price_id: session
                .pointer("/line_items/data/0/price/id")
                .and_then(Value::as_str)
                .map(str::to_string),
            plan_slug: session
                .pointer("/metadata/plan_slug")
                .and_then(Value::as_str)
                .map(str::to_string),
            subscription_id: expandable_id(subscription_value),
            subscription,
        })
    }

    /// Webhook deliveries carry the subscription only as an id; the full
    /// session has to be retrieved before it can be applied.
    pub fn needs_expansion(&self) -> bool {
        self.subscription.is_none() || (self.price_id.is_none() && self.plan_slug.is_none())
    }
}

fn resolve_plan(conn: &Connection, completion: &CheckoutCompletion) -> Result<Plan, BillingError> {
    if let Some(price_id) = completion.price_id.as_deref() {
        if let Some(plan) = repository::get_plan_by_stripe_price(conn, price_id)? {
            return Ok(plan);
        }
    }
    if let Some(slug) = completion.plan_slug.as_deref() {
        if let Some(plan) = repository::get_plan_by_slug(conn, slug)? {
            return Ok(plan);
        }
    }
    Err(BillingError::UnknownPlan(
        completion
            .price_id
            .clone()
            .or_else(|| completion.plan_slug.clone())
            .unwrap_or_default(),
    ))
}

/// Grant the purchased plan. Safe to replay: a subscription that was already
/// stored is updated instead of duplicated.
pub fn apply_checkout_completed(
    conn: &Connection,
    completion: &CheckoutCompletion,
    now: NaiveDateTime,
) -> Result<WebhookOutcome, BillingError> {
    let user_id = completion
        .client_reference_id
        .as_deref()
        .ok_or_else(|| BillingError::Payload("missing client_reference_id".into()))?
        .parse::<Uuid>()
        .map_err(|_| BillingError::Payload("invalid client_reference_id".into()))?;
    let user = repository::get_user(conn, &user_id)?
        .ok_or_else(|| BillingError::Payload(format!("unknown user {user_id}")))?;
    let stripe_sub = completion
        .subscription
        .as_ref()
        .ok_or_else(|| BillingError::Payload("checkout session without subscription".into()))?;
    let plan = resolve_plan(conn, completion)?;

    let tx = conn.unchecked_transaction()?;

    match completion.customer_id.as_deref() {
        Some(customer) if user.stripe_customer_id.as_deref() != Some(customer) => {
            if user.stripe_customer_id.is_some() {
                tracing::warn!(user_id = %user.id, "Replacing Stripe customer id");
            }
            repository::set_stripe_customer_id(&tx, &user.id, customer)?;
        }
        Some(_) => {}
        None => tracing::warn!(
            user_id = %user.id,
            session_id = %completion.session_id,
            "Checkout session has no customer, portal will be unavailable"
        ),
    }

    let outcome = match repository::get_subscription_by_stripe_id(&tx, &stripe_sub.id)? {
        Some(mut existing) => {
            stripe_sub.apply_to(&mut existing);
            existing.plan_id = plan.id;
            repository::update_subscription(&tx, &existing)?;
            repository::cancel_other_subscriptions(&tx, &user.id, &existing.id)?;
            WebhookOutcome::SubscriptionUpdated {
                subscription_id: existing.id,
            }
        }
        None => {
            let mut row = UserSubscription {
                id: Uuid::new_v4(),
                user_id: user.id,
                plan_id: plan.id,
                stripe_subscription_id: Some(stripe_sub.id.clone()),
                status: stripe_sub.status,
                trial_starts_at: None,
                trial_ends_at: None,
                current_period_starts_at: None,
                current_period_ends_at: None,
                cancel_at_period_end: false,
                canceled_at: None,
                ended_at: None,
                created_at: now,
                updated_at: now,
            };
            stripe_sub.apply_to(&mut row);
            repository::insert_subscription(&tx, &row)?;
            repository::cancel_other_subscriptions(&tx, &user.id, &row.id)?;
            WebhookOutcome::SubscriptionCreated {
                subscription_id: row.id,
            }
        }
    };
    tx.commit()?;

    tracing::info!(
        user_id = %user.id,
        plan = %plan.slug,
        stripe_subscription_id = %stripe_sub.id,
        status = %stripe_sub.status,
        "Checkout completed"
    );
    Ok(outcome)
}

/// Mirror a `customer.subscription.updated|deleted` event.
pub fn apply_subscription_change(
    conn: &Connection,
    subscription: &StripeSubscription,
    deleted: bool,
    now: NaiveDateTime,
) -> Result<WebhookOutcome, BillingError> {
    let Some(mut row) = repository::get_subscription_by_stripe_id(conn, &subscription.id)? else {
        tracing::warn!(stripe_subscription_id = %subscription.id, "Event for unknown subscription");
        return Ok(WebhookOutcome::UnknownSubscription);
    };
    subscription.apply_to(&mut row);
    if deleted {
        row.status = SubscriptionStatus::Canceled;
        row.ended_at = row.ended_at.or(Some(now));
    }
    if let Some(price_id) = subscription.price_id.as_deref() {
        if let Some(plan) = repository::get_plan_by_stripe_price(conn, price_id)? {
            row.plan_id = plan.id;
        }
    }
    repository::update_subscription(conn, &row)?;
    tracing::info!(
        stripe_subscription_id = %subscription.id,
        status = %row.status,
        deleted,
        "Subscription updated from webhook"
    );
    Ok(WebhookOutcome::SubscriptionUpdated {
        subscription_id: row.id,
    })
}

/// Dispatch an already-verified event whose payload is complete.
pub fn handle_event(
    conn: &Connection,
    event: &StripeEvent,
    now: NaiveDateTime,
) -> Result<WebhookOutcome, BillingError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let completion = CheckoutCompletion::from_session(&event.data.object)?;
            apply_checkout_completed(conn, &completion, now)
        }
        "customer.subscription.updated" | "customer.subscription.deleted" => {
            let subscription = StripeSubscription::from_value(&event.data.object)?;
            let deleted = event.event_type == "customer.subscription.deleted";
            apply_subscription_change(conn, &subscription, deleted, now)
        }
        other => {
            tracing::info!(event_id = %event.id, event_type = other, "Unhandled Stripe event");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::seed_plans;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{User, UserRole};
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn setup() -> (Connection, User) {
        let conn = open_memory_database().unwrap();
        seed_plans(&conn, Some("price_monthly"), Some("price_yearly"), None).unwrap();
        let user = User::new("physio", "physio@example.com", "x".into(), UserRole::Physio);
        repository::insert_user(&conn, &user).unwrap();
        (conn, user)
    }

    fn completed_session(user: &User, sub_id: &str, price: &str) -> Value {
        json!({
            "id": "cs_test_1",
            "client_reference_id": user.id.to_string(),
            "customer": {"id": "cus_123"},
            "metadata": {"plan_slug": "individual-monthly"},
            "line_items": {"data": [{"price": {"id": price}}]},
            "subscription": {
                "id": sub_id,
                "status": "active",
                "current_period_start": 1740830400,
                "current_period_end": 1743508800,
                "cancel_at_period_end": false
            }
        })
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(payload, SECRET, 1_700_000_000).unwrap();
        assert!(verify_webhook_signature(payload, &header, SECRET, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = signature_header(b"original", SECRET, 1_700_000_000).unwrap();
        let err = verify_webhook_signature(b"tampered", &header, SECRET, 1_700_000_000).unwrap_err();
        assert!(matches!(err, BillingError::Signature(_)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = signature_header(b"body", "whsec_other", 1_700_000_000).unwrap();
        assert!(verify_webhook_signature(b"body", &header, SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = signature_header(b"body", SECRET, 1_700_000_000).unwrap();
        assert!(verify_webhook_signature(b"body", &header, SECRET, 1_700_000_300).is_ok());
        assert!(verify_webhook_signature(b"body", &header, SECRET, 1_700_000_301).is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            let err = verify_webhook_signature(b"{}", &header, SECRET, 1_700_000_000).unwrap_err();
            assert!(matches!(err, BillingError::Signature(_)));
        }
    }

    #[test]
    fn header_without_signature_is_rejected() {
        assert!(verify_webhook_signature(b"body", "t=1700000000", SECRET, 1_700_000_000).is_err());
        assert!(verify_webhook_signature(b"body", "v1=abc", SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let good = signature_header(b"body", SECRET, 1_700_000_000).unwrap();
        let v1 = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v1={v1}");
        assert!(verify_webhook_signature(b"body", &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn checkout_completed_creates_subscription_and_stores_customer() {
        let (conn, user) = setup();
        let completion =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_1", "price_monthly")).unwrap();
        assert!(!completion.needs_expansion());

        let outcome = apply_checkout_completed(&conn, &completion, now()).unwrap();
        assert!(matches!(outcome, WebhookOutcome::SubscriptionCreated { .. }));

        let stored = repository::get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_123"));
        let active = repository::get_active_subscription(&conn, &user.id).unwrap().unwrap();
        assert_eq!(active.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert!(active.current_period_ends_at.is_some());
    }

    #[test]
    fn replayed_checkout_does_not_duplicate() {
        let (conn, user) = setup();
        let completion =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_1", "price_monthly")).unwrap();
        apply_checkout_completed(&conn, &completion, now()).unwrap();
        let outcome = apply_checkout_completed(&conn, &completion, now()).unwrap();

        assert!(matches!(outcome, WebhookOutcome::SubscriptionUpdated { .. }));
        assert_eq!(repository::list_subscriptions(&conn, &user.id).unwrap().len(), 1);
    }

    #[test]
    fn new_checkout_cancels_previous_subscription() {
        let (conn, user) = setup();
        let first =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_1", "price_monthly")).unwrap();
        apply_checkout_completed(&conn, &first, now()).unwrap();
        let second =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_2", "price_yearly")).unwrap();
        apply_checkout_completed(&conn, &second, now()).unwrap();

        let subs = repository::list_subscriptions(&conn, &user.id).unwrap();
        let granting: Vec<_> = subs.iter().filter(|s| s.status.grants_access()).collect();
        assert_eq!(granting.len(), 1);
        assert_eq!(granting[0].stripe_subscription_id.as_deref(), Some("sub_2"));
        let plan = repository::get_plan(&conn, &granting[0].plan_id).unwrap().unwrap();
        assert_eq!(plan.slug, "individual-yearly");
    }

    #[test]
    fn unexpanded_session_needs_retrieval() {
        let (_conn, user) = setup();
        let session = json!({
            "id": "cs_test_2",
            "client_reference_id": user.id.to_string(),
            "customer": "cus_9",
            "subscription": "sub_9"
        });
        let completion = CheckoutCompletion::from_session(&session).unwrap();
        assert!(completion.needs_expansion());
        assert_eq!(completion.subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(completion.customer_id.as_deref(), Some("cus_9"));
    }

    #[test]
    fn invalid_client_reference_is_rejected() {
        let (conn, user) = setup();
        let mut session = completed_session(&user, "sub_1", "price_monthly");
        session["client_reference_id"] = json!("42");
        let completion = CheckoutCompletion::from_session(&session).unwrap();
        assert!(matches!(
            apply_checkout_completed(&conn, &completion, now()),
            Err(BillingError::Payload(_))
        ));
    }

    #[test]
    fn subscription_deleted_event_revokes_access() {
        let (conn, user) = setup();
        let completion =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_1", "price_monthly")).unwrap();
        apply_checkout_completed(&conn, &completion, now()).unwrap();

        let payload = json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "status": "canceled", "cancel_at_period_end": false}}
        });
        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        handle_event(&conn, &event, now()).unwrap();

        assert!(repository::get_active_subscription(&conn, &user.id).unwrap().is_none());
        let subs = repository::list_subscriptions(&conn, &user.id).unwrap();
        assert!(subs[0].ended_at.is_some());
    }

    #[test]
    fn subscription_updated_tracks_status() {
        let (conn, user) = setup();
        let completion =
            CheckoutCompletion::from_session(&completed_session(&user, "sub_1", "price_monthly")).unwrap();
        apply_checkout_completed(&conn, &completion, now()).unwrap();

        let sub = StripeSubscription::from_value(&json!({
            "id": "sub_1",
            "status": "past_due",
            "cancel_at_period_end": true
        }))
        .unwrap();
        apply_subscription_change(&conn, &sub, false, now()).unwrap();

        let subs = repository::list_subscriptions(&conn, &user.id).unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::PastDue);
        assert!(subs[0].cancel_at_period_end);
    }

    #[test]
    fn unknown_subscription_and_event_types_are_tolerated() {
        let (conn, _user) = setup();
        let sub = StripeSubscription::from_value(&json!({"id": "sub_x", "status": "active"})).unwrap();
        assert_eq!(
            apply_subscription_change(&conn, &sub, false, now()).unwrap(),
            WebhookOutcome::UnknownSubscription
        );

        let event = parse_event(br#"{"id":"evt_3","type":"invoice.paid","data":{"object":{}}}"#).unwrap();
        assert_eq!(handle_event(&conn, &event, now()).unwrap(), WebhookOutcome::Ignored);
    }

    #[test]
    fn checkout_requires_a_price() {
        let plan = crate::billing::individual_plans(None, None).remove(0);
        let client = StripeClient::new("http://localhost:1", "sk_test").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let err = rt
            .block_on(client.create_checkout_session(
                &Uuid::new_v4(),
                CheckoutCustomer::Email("a@b.c"),
                &plan,
                "http://ok",
                "http://cancel",
            ))
            .unwrap_err();
        assert!(matches!(err, BillingError::PlanNotPurchasable(_)));
    }
}
