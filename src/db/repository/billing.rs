use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row::{self, fmt_datetime, fmt_opt_datetime};
use crate::db::DatabaseError;
use crate::models::{Plan, UserSubscription};

const PLAN_COLUMNS: &str = "id, name, slug, price_cents, billing_interval, currency, patient_limit,
     practitioner_limit, features, stripe_price_id, is_active, display_order";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, stripe_subscription_id, status,
     trial_starts_at, trial_ends_at, current_period_starts_at, current_period_ends_at,
     cancel_at_period_end, canceled_at, ended_at, created_at, updated_at";

/// Insert a plan, or refresh the existing one with the same slug. Returns
/// the stored plan id.
pub fn upsert_plan(conn: &Connection, plan: &Plan) -> Result<Uuid, DatabaseError> {
    let features = serde_json::to_string(&plan.features)
        .map_err(|e| DatabaseError::Corrupted(format!("plan features: {e}")))?;
    conn.execute(
        "INSERT INTO plans (id, name, slug, price_cents, billing_interval, currency,
         patient_limit, practitioner_limit, features, stripe_price_id, is_active, display_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(slug) DO UPDATE SET
             name = excluded.name,
             price_cents = excluded.price_cents,
             billing_interval = excluded.billing_interval,
             currency = excluded.currency,
             patient_limit = excluded.patient_limit,
             practitioner_limit = excluded.practitioner_limit,
             features = excluded.features,
             stripe_price_id = COALESCE(excluded.stripe_price_id, plans.stripe_price_id),
             is_active = excluded.is_active,
             display_order = excluded.display_order",
        params![
            plan.id.to_string(),
            plan.name,
            plan.slug,
            plan.price_cents,
            plan.billing_interval,
            plan.currency,
            plan.patient_limit,
            plan.practitioner_limit,
            features,
            plan.stripe_price_id,
            plan.is_active,
            plan.display_order,
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM plans WHERE slug = ?1",
        params![plan.slug],
        |r| row::uuid(r, 0),
    )?;
    Ok(id)
}

pub fn deactivate_all_plans(conn: &Connection) -> Result<usize, DatabaseError> {
    Ok(conn.execute("UPDATE plans SET is_active = 0", [])?)
}

pub fn list_active_plans(conn: &Connection) -> Result<Vec<Plan>, DatabaseError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE is_active = 1 ORDER BY display_order ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_plan)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn get_plan(conn: &Connection, id: &Uuid) -> Result<Option<Plan>, DatabaseError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], row_to_plan)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn get_plan_by_slug(conn: &Connection, slug: &str) -> Result<Option<Plan>, DatabaseError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE slug = ?1");
    conn.query_row(&sql, params![slug], row_to_plan)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn get_plan_by_stripe_price(conn: &Connection, price_id: &str) -> Result<Option<Plan>, DatabaseError> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE stripe_price_id = ?1");
    conn.query_row(&sql, params![price_id], row_to_plan)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn insert_subscription(conn: &Connection, s: &UserSubscription) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO user_subscriptions (id, user_id, plan_id, stripe_subscription_id, status,
         trial_starts_at, trial_ends_at, current_period_starts_at, current_period_ends_at,
         cancel_at_period_end, canceled_at, ended_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            s.id.to_string(),
            s.user_id.to_string(),
            s.plan_id.to_string(),
            s.stripe_subscription_id,
            s.status.as_str(),
            fmt_opt_datetime(&s.trial_starts_at),
            fmt_opt_datetime(&s.trial_ends_at),
            fmt_opt_datetime(&s.current_period_starts_at),
            fmt_opt_datetime(&s.current_period_ends_at),
            s.cancel_at_period_end,
            fmt_opt_datetime(&s.canceled_at),
            fmt_opt_datetime(&s.ended_at),
            fmt_datetime(&s.created_at),
            fmt_datetime(&s.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_subscription(conn: &Connection, s: &UserSubscription) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE user_subscriptions SET plan_id = ?2, status = ?3, trial_starts_at = ?4,
         trial_ends_at = ?5, current_period_starts_at = ?6, current_period_ends_at = ?7,
         cancel_at_period_end = ?8, canceled_at = ?9, ended_at = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            s.id.to_string(),
            s.plan_id.to_string(),
            s.status.as_str(),
            fmt_opt_datetime(&s.trial_starts_at),
            fmt_opt_datetime(&s.trial_ends_at),
            fmt_opt_datetime(&s.current_period_starts_at),
            fmt_opt_datetime(&s.current_period_ends_at),
            s.cancel_at_period_end,
            fmt_opt_datetime(&s.canceled_at),
            fmt_opt_datetime(&s.ended_at),
            fmt_datetime(&chrono::Local::now().naive_local()),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("subscription", s.id));
    }
    Ok(())
}

pub fn get_subscription_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<UserSubscription>, DatabaseError> {
    let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE stripe_subscription_id = ?1");
    conn.query_row(&sql, params![stripe_subscription_id], row_to_subscription)
        .optional()
        .map_err(DatabaseError::from)
}

/// The user's most recent subscription in an access-granting status.
pub fn get_active_subscription(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Option<UserSubscription>, DatabaseError> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions
         WHERE user_id = ?1 AND status IN ('active', 'trialing')
         ORDER BY created_at DESC LIMIT 1"
    );
    conn.query_row(&sql, params![user_id.to_string()], row_to_subscription)
        .optional()
        .map_err(DatabaseError::from)
}

pub fn list_subscriptions(conn: &Connection, user_id: &Uuid) -> Result<Vec<UserSubscription>, DatabaseError> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions
         WHERE user_id = ?1 ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string()], row_to_subscription)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Cancel every other access-granting subscription of the user.
pub fn cancel_other_subscriptions(
    conn: &Connection,
    user_id: &Uuid,
    keep_id: &Uuid,
) -> Result<usize, DatabaseError> {
    let now = fmt_datetime(&chrono::Local::now().naive_local());
    let affected = conn.execute(
        "UPDATE user_subscriptions SET status = 'canceled', canceled_at = ?3, ended_at = ?3,
         updated_at = ?3
         WHERE user_id = ?1 AND id <> ?2 AND status IN ('active', 'trialing')",
        params![user_id.to_string(), keep_id.to_string(), now],
    )?;
    Ok(affected)
}

fn row_to_plan(row: &rusqlite::Row) -> Result<Plan, rusqlite::Error> {
    let features: Option<String> = row.get(8)?;
    Ok(Plan {
        id: row::uuid(row, 0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        price_cents: row.get(3)?,
        billing_interval: row.get(4)?,
        currency: row.get(5)?,
        patient_limit: row.get(6)?,
        practitioner_limit: row.get(7)?,
        features: features
            .and_then(|f| serde_json::from_str(&f).ok())
            .unwrap_or_default(),
        stripe_price_id: row.get(9)?,
        is_active: row.get(10)?,
        display_order: row.get(11)?,
    })
}

fn row_to_subscription(row: &rusqlite::Row) -> Result<UserSubscription, rusqlite::Error> {
    Ok(UserSubscription {
        id: row::uuid(row, 0)?,
        user_id: row::uuid(row, 1)?,
        plan_id: row::uuid(row, 2)?,
        stripe_subscription_id: row.get(3)?,
        status: row::enumeration(row, 4)?,
        trial_starts_at: row::opt_datetime(row, 5)?,
        trial_ends_at: row::opt_datetime(row, 6)?,
        current_period_starts_at: row::opt_datetime(row, 7)?,
        current_period_ends_at: row::opt_datetime(row, 8)?,
        cancel_at_period_end: row.get(9)?,
        canceled_at: row::opt_datetime(row, 10)?,
        ended_at: row::opt_datetime(row, 11)?,
        created_at: row::datetime(row, 12)?,
        updated_at: row::datetime(row, 13)?,
    })
}
