//! Plans, subscriptions and Stripe.
//!
//! - `GET  /api/billing/plans`: active plans
//! - `GET  /api/billing/subscription`: current plan, limit and usage
//! - `POST /api/billing/checkout`: start a Checkout Session for a plan
//! - `POST /api/billing/portal`: Billing Portal link
//! - `POST /webhooks/stripe`: Unprotected: signed Stripe events

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::billing::{self, CheckoutCompletion, CheckoutCustomer, CheckoutSession, StripeClient, SubscriptionOverview, WebhookOutcome};
use crate::db::repository;
use crate::models::Plan;

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub plan_slug: String,
}

#[derive(Serialize)]
pub struct PortalResponse {
    pub url: String,
}

/// `GET /api/billing/plans`
pub async fn plans(State(ctx): State<ApiContext>) -> Result<Json<Vec<Plan>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(repository::list_active_plans(&conn)?))
}

/// `GET /api/billing/subscription`
pub async fn subscription(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<SubscriptionOverview>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(billing::subscription_overview(&conn, &auth.user)?))
}

/// `POST /api/billing/checkout`
pub async fn checkout(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let client = StripeClient::from_config(ctx.core.config())?;
    let plan = {
        let conn = ctx.core.open_db()?;
        repository::get_plan_by_slug(&conn, &req.plan_slug)?
            .filter(|p| p.is_active)
            .ok_or_else(|| billing::BillingError::UnknownPlan(req.plan_slug.clone()))?
    };

    let base = &ctx.core.config().public_base_url;
    let success_url = format!("{base}/billing/success?session_id={{CHECKOUT_SESSION_ID}}");
    let cancel_url = format!("{base}/billing/cancel");
    let customer = match auth.user.stripe_customer_id.as_deref() {
        Some(id) => CheckoutCustomer::Existing(id),
        None => CheckoutCustomer::Email(&auth.user.email),
    };

    let session = client
        .create_checkout_session(&auth.user.id, customer, &plan, &success_url, &cancel_url)
        .await?;
    Ok(Json(session))
}

/// `POST /api/billing/portal`
pub async fn portal(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<PortalResponse>, ApiError> {
    let client = StripeClient::from_config(ctx.core.config())?;
    let customer_id = auth
        .user
        .stripe_customer_id
        .as_deref()
        .ok_or(billing::BillingError::NoCustomer)?;
    let return_url = format!("{}/billing", ctx.core.config().public_base_url);
    let url = client.create_portal_session(customer_id, &return_url).await?;
    Ok(Json(PortalResponse { url }))
}

/// `POST /webhooks/stripe`
///
/// The signature is checked against the raw body before anything is
/// parsed. Checkout completions arriving without line items or an expanded
/// subscription are re-fetched from Stripe first.
pub async fn webhook(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let secret = ctx
        .core
        .config()
        .stripe_webhook_secret
        .clone()
        .ok_or_else(|| ApiError::NotConfigured("Stripe webhook secret".into()))?;
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".into()))?;

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = billing::verify_webhook_signature(&body, signature, &secret, now) {
        tracing::warn!(error = %e, "Rejected Stripe webhook");
        return Err(e.into());
    }
    let event = billing::parse_event(&body)?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    let local_now = chrono::Local::now().naive_local();
    if event.event_type == "checkout.session.completed" {
        let mut completion = CheckoutCompletion::from_session(&event.data.object)?;
        if completion.needs_expansion() {
            match StripeClient::from_config(ctx.core.config()) {
                Ok(client) => {
                    let session = client.retrieve_checkout_session(&completion.session_id).await?;
                    completion = CheckoutCompletion::from_session(&session)?;
                }
                Err(e) => tracing::warn!(error = %e, "Cannot expand checkout session, applying as delivered"),
            }
        }
        let conn = ctx.core.open_db()?;
        return Ok(Json(billing::apply_checkout_completed(&conn, &completion, local_now)?));
    }

    let conn = ctx.core.open_db()?;
    Ok(Json(billing::handle_event(&conn, &event, local_now)?))
}
