//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Application routes are nested under `/api/`; Stripe posts to
//! `/webhooks/stripe`.
//!
//! Middleware stack (outermost → innermost):
//! 1. CORS → 2. Request filter → 3. Rate limiter → 4. Auth validator
//! → 5. Role guard → 6. Audit logger

use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::integrations::llm::LlmClient;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>, llm: Option<Arc<dyn LlmClient>>) -> Router {
    build_router(ApiContext::new(core, llm))
}

pub(crate) fn build_router(ctx: ApiContext) -> Router {
    // Layers are applied from bottom (innermost) to top (outermost).
    // Extension must be outermost so all middleware can access ApiContext.
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .route("/billing/plans", get(endpoints::billing::plans))
        .route("/calendly/webhook", post(endpoints::calendly::webhook))
        .route("/google-calendar/callback", get(endpoints::google_calendar::callback))
        .route("/legal/privacy", get(endpoints::legal::privacy))
        .route("/legal/terms", get(endpoints::legal::terms))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Any signed-in user, whatever the role.
    let account = Router::new()
        .route("/auth/logout", post(endpoints::auth::logout))
        .route("/auth/me", get(endpoints::auth::me).put(endpoints::auth::update_me))
        .route("/auth/password", post(endpoints::auth::change_password))
        .route("/account", delete(endpoints::account::delete_account))
        .route("/account/export", get(endpoints::account::export))
        .route("/billing/subscription", get(endpoints::billing::subscription))
        .route("/billing/checkout", post(endpoints::billing::checkout))
        .route("/billing/portal", post(endpoints::billing::portal))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::audit::log_access))
        .layer(from_fn(middleware::auth::require_auth))
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    let practice = Router::new()
        .route("/dashboard", get(endpoints::dashboard::overview))
        .route("/analytics", get(endpoints::dashboard::practice_stats))
        // Patients
        .route(
            "/patients",
            get(endpoints::patients::list).post(endpoints::patients::create),
        )
        .route("/patients/search", get(endpoints::patients::search))
        .route("/patients/bulk-status", post(endpoints::patients::bulk_status))
        .route("/patients/bulk-delete", post(endpoints::patients::bulk_delete))
        .route(
            "/patients/:id",
            get(endpoints::patients::detail)
                .put(endpoints::patients::update)
                .delete(endpoints::patients::delete),
        )
        .route("/patients/:id/status", put(endpoints::patients::set_status))
        .route("/patients/:id/treatments", get(endpoints::patients::treatments))
        .route(
            "/patients/:id/mark-past-completed",
            post(endpoints::patients::mark_past_completed),
        )
        .route(
            "/patients/:id/reports",
            get(endpoints::reports::list_patient).post(endpoints::reports::generate_patient),
        )
        // Treatments
        .route(
            "/treatments",
            get(endpoints::treatments::list).post(endpoints::treatments::create),
        )
        .route("/treatments/bulk-update", post(endpoints::treatments::bulk_update))
        .route(
            "/treatments/:id",
            get(endpoints::treatments::detail)
                .put(endpoints::treatments::update)
                .delete(endpoints::treatments::delete),
        )
        .route("/treatments/:id/status", put(endpoints::treatments::set_status))
        // Recurring rules and the calendar feed
        .route(
            "/recurring",
            get(endpoints::recurring::list).post(endpoints::recurring::create),
        )
        .route(
            "/recurring/:id",
            get(endpoints::recurring::detail)
                .put(endpoints::recurring::update)
                .delete(endpoints::recurring::delete),
        )
        .route("/recurring/:id/deactivate", post(endpoints::recurring::deactivate))
        .route("/recurring/:id/next", get(endpoints::recurring::next))
        .route("/recurring/:id/materialize", post(endpoints::recurring::materialize))
        .route("/appointments", get(endpoints::appointments::feed))
        // Locations
        .route(
            "/locations",
            get(endpoints::locations::list_active).post(endpoints::locations::create),
        )
        .route("/locations/all", get(endpoints::locations::list_all))
        .route(
            "/locations/:id",
            get(endpoints::locations::detail)
                .put(endpoints::locations::update)
                .delete(endpoints::locations::remove),
        )
        // Finance
        .route(
            "/finance/settings",
            get(endpoints::finance::settings).put(endpoints::finance::save_settings),
        )
        .route("/finance/brackets", put(endpoints::finance::save_brackets))
        .route(
            "/finance/fixed-costs",
            get(endpoints::finance::fixed_costs).post(endpoints::finance::add_fixed_cost),
        )
        .route("/finance/fixed-costs/:id", delete(endpoints::finance::delete_fixed_cost))
        .route("/finance/report", get(endpoints::finance::report))
        // Reports
        .route(
            "/reports/practice",
            get(endpoints::reports::list_practice).post(endpoints::reports::generate_practice),
        )
        .route(
            "/reports/:id",
            get(endpoints::reports::detail).delete(endpoints::reports::delete),
        )
        // Calendly
        .route(
            "/calendly/token",
            put(endpoints::calendly::save_token).delete(endpoints::calendly::disconnect),
        )
        .route("/calendly/sync", post(endpoints::calendly::sync))
        .route("/calendly/bookings", get(endpoints::calendly::bookings))
        .route("/calendly/bookings/:id/match", post(endpoints::calendly::match_booking))
        .route(
            "/calendly/bookings/:id/create-patient",
            post(endpoints::calendly::create_patient),
        )
        .route("/calendly/bookings/:id/ignore", post(endpoints::calendly::ignore))
        // Google Calendar
        .route("/google-calendar", delete(endpoints::google_calendar::disconnect))
        .route("/google-calendar/client", put(endpoints::google_calendar::save_client))
        .route("/google-calendar/auth-url", get(endpoints::google_calendar::auth_url))
        .route("/google-calendar/status", get(endpoints::google_calendar::status))
        .route(
            "/google-calendar/events/:treatment_id",
            post(endpoints::google_calendar::create_event),
        )
        // Consent records
        .route(
            "/account/consents",
            get(endpoints::account::consents).post(endpoints::account::give_consent),
        )
        .route("/account/consents/:id", delete(endpoints::account::revoke_consent))
        // ICD-10 diagnoses
        .route("/icd10/search", get(endpoints::diagnoses::search))
        .route("/icd10/categories", get(endpoints::diagnoses::categories))
        .route("/icd10/templates", get(endpoints::diagnoses::templates))
        .route(
            "/patients/:id/diagnoses",
            get(endpoints::diagnoses::list).post(endpoints::diagnoses::create),
        )
        .route(
            "/patients/:id/diagnoses/:diagnosis_id",
            get(endpoints::diagnoses::detail)
                .put(endpoints::diagnoses::update)
                .delete(endpoints::diagnoses::remove),
        )
        .route(
            "/diagnosis-templates/:template_id/apply/:patient_id",
            post(endpoints::diagnoses::apply_template),
        )
        .route("/analytics/diagnoses", get(endpoints::diagnoses::analytics))
        // Clinic
        .route(
            "/clinic",
            get(endpoints::clinic::overview)
                .post(endpoints::clinic::create)
                .put(endpoints::clinic::update),
        )
        .route("/clinic/invitations", post(endpoints::clinic::invite))
        .route("/clinic/join", post(endpoints::clinic::join))
        .route("/clinic/leave", post(endpoints::clinic::leave))
        .route(
            "/clinic/members/:id/permissions",
            put(endpoints::clinic::update_permissions),
        )
        .route("/clinic/members/:id", delete(endpoints::clinic::remove_member))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::audit::log_access))
        .layer(from_fn(middleware::auth::require_practitioner))
        .layer(from_fn(middleware::auth::require_auth))
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    let admin = Router::new()
        .route("/admin/users", get(endpoints::admin::users))
        .route("/admin/users/:id/role", put(endpoints::admin::set_role))
        .route("/admin/security-log", get(endpoints::admin::security_log))
        .route("/admin/diagnosis-templates", post(endpoints::diagnoses::create_template))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::audit::log_access))
        .layer(from_fn(middleware::auth::require_admin))
        .layer(from_fn(middleware::auth::require_auth))
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Stripe authenticates itself through the signature header.
    let webhooks = Router::new()
        .route("/webhooks/stripe", post(endpoints::billing::webhook))
        .with_state(ctx.clone())
        .layer(axum::Extension(ctx.clone()));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .nest("/api", public.merge(account).merge(practice).merge(admin))
        .merge(webhooks)
        .layer(from_fn(middleware::filter::block_scanners))
        .layer(cors)
        .layer(axum::Extension(ctx))
}
