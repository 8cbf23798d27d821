use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::BillingError;
use crate::db::repository;
use crate::models::{Plan, User, UserSubscription};

/// Patients a practitioner may keep without a paid subscription.
pub const FREE_PATIENT_LIMIT: i64 = 10;

/// Patient limit of the two individual plans.
pub const INDIVIDUAL_PATIENT_LIMIT: i64 = 50;

/// Practitioner seats in a clinic whose owner has no paid subscription.
pub const FREE_PRACTITIONER_LIMIT: i64 = 1;

// ═══════════════════════════════════════════════════════════
// Patient limits
// ═══════════════════════════════════════════════════════════

/// Resolve the patient limit for a user. `None` means unlimited.
///
/// Admins are never limited. Otherwise the plan of the latest active or
/// trialing subscription applies, falling back to the free tier.
pub fn patient_limit_for(conn: &Connection, user: &User) -> Result<Option<i64>, BillingError> {
    if user.is_admin() {
        return Ok(None);
    }
    let Some(subscription) = repository::get_active_subscription(conn, &user.id)? else {
        return Ok(Some(FREE_PATIENT_LIMIT));
    };
    match repository::get_plan(conn, &subscription.plan_id)? {
        Some(plan) => Ok(plan.patient_limit),
        None => {
            tracing::warn!(
                user_id = %user.id,
                plan_id = %subscription.plan_id,
                "Subscription references a missing plan, applying free tier"
            );
            Ok(Some(FREE_PATIENT_LIMIT))
        }
    }
}

/// Fail with `PatientLimitReached` when one more patient would exceed the
/// user's limit.
pub fn ensure_can_add_patient(conn: &Connection, user: &User) -> Result<(), BillingError> {
    let Some(limit) = patient_limit_for(conn, user)? else {
        return Ok(());
    };
    let current = repository::count_patients(conn, &user.id, None)?;
    if current >= limit {
        tracing::info!(user_id = %user.id, current, limit, "Patient limit reached");
        return Err(BillingError::PatientLimitReached { limit });
    }
    Ok(())
}

/// Resolve how many practitioner seats a clinic owner pays for. `None`
/// means unlimited.
pub fn practitioner_limit_for(conn: &Connection, owner: &User) -> Result<Option<i64>, BillingError> {
    if owner.is_admin() {
        return Ok(None);
    }
    let Some(subscription) = repository::get_active_subscription(conn, &owner.id)? else {
        return Ok(Some(FREE_PRACTITIONER_LIMIT));
    };
    Ok(repository::get_plan(conn, &subscription.plan_id)?
        .map(|plan| plan.practitioner_limit)
        .unwrap_or(Some(FREE_PRACTITIONER_LIMIT)))
}

/// Fail with `PractitionerLimitReached` when one more seat would exceed the
/// owner's limit.
pub fn ensure_can_add_practitioner(conn: &Connection, owner: &User, seats_used: i64) -> Result<(), BillingError> {
    let Some(limit) = practitioner_limit_for(conn, owner)? else {
        return Ok(());
    };
    if seats_used >= limit {
        tracing::info!(owner_id = %owner.id, seats_used, limit, "Practitioner limit reached");
        return Err(BillingError::PractitionerLimitReached { limit });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOverview {
    pub subscription: Option<UserSubscription>,
    pub plan: Option<Plan>,
    pub patient_limit: Option<i64>,
    pub patient_count: i64,
    pub practitioner_limit: Option<i64>,
    pub has_customer: bool,
}

pub fn subscription_overview(conn: &Connection, user: &User) -> Result<SubscriptionOverview, BillingError> {
    let subscription = repository::get_active_subscription(conn, &user.id)?;
    let plan = match &subscription {
        Some(s) => repository::get_plan(conn, &s.plan_id)?,
        None => None,
    };
    Ok(SubscriptionOverview {
        patient_limit: patient_limit_for(conn, user)?,
        patient_count: repository::count_patients(conn, &user.id, None)?,
        practitioner_limit: practitioner_limit_for(conn, user)?,
        has_customer: user.stripe_customer_id.is_some(),
        subscription,
        plan,
    })
}

// ═══════════════════════════════════════════════════════════
// Plan seeding
// ═══════════════════════════════════════════════════════════

/// The individual monthly and yearly plans offered to solo practitioners.
pub fn individual_plans(monthly_price_id: Option<&str>, yearly_price_id: Option<&str>) -> Vec<Plan> {
    let features = || {
        vec![
            "Up to 50 patients".to_string(),
            "1 practitioner".to_string(),
            "calendly_integration".to_string(),
            "email_support".to_string(),
        ]
    };
    vec![
        Plan {
            id: Uuid::new_v4(),
            name: "Individual Monthly".into(),
            slug: "individual-monthly".into(),
            price_cents: 1500,
            billing_interval: "month".into(),
            currency: "usd".into(),
            patient_limit: Some(INDIVIDUAL_PATIENT_LIMIT),
            practitioner_limit: Some(1),
            features: features(),
            stripe_price_id: monthly_price_id.map(str::to_string),
            is_active: true,
            display_order: 1,
        },
        Plan {
            id: Uuid::new_v4(),
            name: "Individual Yearly".into(),
            slug: "individual-yearly".into(),
            price_cents: 15000,
            billing_interval: "year".into(),
            currency: "usd".into(),
            patient_limit: Some(INDIVIDUAL_PATIENT_LIMIT),
            practitioner_limit: Some(1),
            features: features(),
            stripe_price_id: yearly_price_id.map(str::to_string),
            is_active: true,
            display_order: 2,
        },
    ]
}

/// The monthly plan for multi-practitioner clinics: no patient or seat cap.
pub fn clinic_plan(price_id: Option<&str>) -> Plan {
    Plan {
        id: Uuid::new_v4(),
        name: "Clinic Monthly".into(),
        slug: "clinic-monthly".into(),
        price_cents: 4000,
        billing_interval: "month".into(),
        currency: "usd".into(),
        patient_limit: None,
        practitioner_limit: None,
        features: vec![
            "Unlimited patients".to_string(),
            "Unlimited practitioners".to_string(),
            "calendly_integration".to_string(),
            "priority_support".to_string(),
        ],
        stripe_price_id: price_id.map(str::to_string),
        is_active: true,
        display_order: 3,
    }
}

/// Deactivate every existing plan, then insert or refresh the individual
/// and clinic plans. Existing Stripe price ids survive when none is given.
pub fn seed_plans(
    conn: &Connection,
    monthly_price_id: Option<&str>,
    yearly_price_id: Option<&str>,
    clinic_price_id: Option<&str>,
) -> Result<Vec<Plan>, BillingError> {
    let tx = conn.unchecked_transaction()?;
    let deactivated = repository::deactivate_all_plans(&tx)?;
    let mut seeded = Vec::new();
    let mut plans = individual_plans(monthly_price_id, yearly_price_id);
    plans.push(clinic_plan(clinic_price_id));
    for plan in plans {
        let id = repository::upsert_plan(&tx, &plan)?;
        if let Some(stored) = repository::get_plan(&tx, &id)? {
            seeded.push(stored);
        }
    }
    tx.commit()?;
    tracing::info!(deactivated, seeded = seeded.len(), "Plans seeded");
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, SubscriptionStatus, UserRole};
    use crate::crypto::FieldKey;

    fn practitioner(conn: &Connection) -> User {
        let user = User::new("physio1", "p1@example.com", "x".into(), UserRole::Physio);
        repository::insert_user(conn, &user).unwrap();
        user
    }

    fn add_patients(conn: &Connection, user: &User, n: usize) {
        let key = FieldKey::generate();
        for i in 0..n {
            let p = Patient::new(user.id, &format!("Patient {i}"));
            repository::insert_patient(conn, &key, &p).unwrap();
        }
    }

    fn subscribe(conn: &Connection, user: &User, plan: &Plan, status: SubscriptionStatus) {
        let now = chrono::Local::now().naive_local();
        let sub = UserSubscription {
            id: Uuid::new_v4(),
            user_id: user.id,
            plan_id: plan.id,
            stripe_subscription_id: Some("sub_test".into()),
            status,
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
        repository::insert_subscription(conn, &sub).unwrap();
    }

    #[test]
    fn free_tier_blocks_the_eleventh_patient() {
        let conn = open_memory_database().unwrap();
        let user = practitioner(&conn);
        add_patients(&conn, &user, 9);
        assert!(ensure_can_add_patient(&conn, &user).is_ok());

        add_patients(&conn, &user, 1);
        let err = ensure_can_add_patient(&conn, &user).unwrap_err();
        assert!(matches!(err, BillingError::PatientLimitReached { limit: 10 }));
    }

    #[test]
    fn admin_is_unlimited() {
        let conn = open_memory_database().unwrap();
        let admin = User::new("root", "root@example.com", "x".into(), UserRole::Admin);
        repository::insert_user(&conn, &admin).unwrap();
        add_patients(&conn, &admin, 12);
        assert_eq!(patient_limit_for(&conn, &admin).unwrap(), None);
        assert!(ensure_can_add_patient(&conn, &admin).is_ok());
    }

    #[test]
    fn active_subscription_raises_the_limit() {
        let conn = open_memory_database().unwrap();
        let user = practitioner(&conn);
        let plans = seed_plans(&conn, Some("price_m"), Some("price_y"), None).unwrap();
        subscribe(&conn, &user, &plans[0], SubscriptionStatus::Active);
        add_patients(&conn, &user, 10);

        assert_eq!(patient_limit_for(&conn, &user).unwrap(), Some(50));
        assert!(ensure_can_add_patient(&conn, &user).is_ok());
    }

    #[test]
    fn canceled_subscription_falls_back_to_free_tier() {
        let conn = open_memory_database().unwrap();
        let user = practitioner(&conn);
        let plans = seed_plans(&conn, None, None, None).unwrap();
        subscribe(&conn, &user, &plans[1], SubscriptionStatus::Canceled);
        assert_eq!(patient_limit_for(&conn, &user).unwrap(), Some(FREE_PATIENT_LIMIT));
    }

    #[test]
    fn seeding_twice_keeps_three_active_plans_and_price_ids() {
        let conn = open_memory_database().unwrap();
        seed_plans(&conn, Some("price_m"), Some("price_y"), None).unwrap();
        let again = seed_plans(&conn, None, None, None).unwrap();

        assert_eq!(again.len(), 3);
        let active = repository::list_active_plans(&conn).unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].slug, "individual-monthly");
        assert_eq!(active[0].stripe_price_id.as_deref(), Some("price_m"));
        assert_eq!(active[1].price_cents, 15000);
    }

    #[test]
    fn seeding_retires_unknown_plans() {
        let conn = open_memory_database().unwrap();
        let mut legacy = individual_plans(None, None).remove(0);
        legacy.slug = "legacy".into();
        repository::upsert_plan(&conn, &legacy).unwrap();

        seed_plans(&conn, None, None, None).unwrap();
        let active = repository::list_active_plans(&conn).unwrap();
        assert!(active.iter().all(|p| p.slug != "legacy"));
    }

    #[test]
    fn overview_reports_count_and_limit() {
        let conn = open_memory_database().unwrap();
        let user = practitioner(&conn);
        add_patients(&conn, &user, 3);
        let overview = subscription_overview(&conn, &user).unwrap();
        assert_eq!(overview.patient_count, 3);
        assert_eq!(overview.patient_limit, Some(FREE_PATIENT_LIMIT));
        assert_eq!(overview.practitioner_limit, Some(FREE_PRACTITIONER_LIMIT));
        assert!(overview.subscription.is_none());
        assert!(!overview.has_customer);
    }

    #[test]
    fn clinic_plan_lifts_the_seat_limit() {
        let conn = open_memory_database().unwrap();
        let owner = practitioner(&conn);
        assert!(ensure_can_add_practitioner(&conn, &owner, 0).is_ok());
        let err = ensure_can_add_practitioner(&conn, &owner, 1).unwrap_err();
        assert!(matches!(err, BillingError::PractitionerLimitReached { limit: 1 }));

        let plans = seed_plans(&conn, None, None, Some("price_c")).unwrap();
        let clinic = plans.iter().find(|p| p.slug == "clinic-monthly").unwrap();
        assert_eq!(clinic.stripe_price_id.as_deref(), Some("price_c"));
        subscribe(&conn, &owner, clinic, SubscriptionStatus::Active);
        assert_eq!(practitioner_limit_for(&conn, &owner).unwrap(), None);
        assert!(ensure_can_add_practitioner(&conn, &owner, 25).is_ok());
    }

    #[test]
    fn individual_plan_keeps_one_seat() {
        let conn = open_memory_database().unwrap();
        let owner = practitioner(&conn);
        let plans = seed_plans(&conn, None, None, None).unwrap();
        subscribe(&conn, &owner, &plans[0], SubscriptionStatus::Active);
        assert_eq!(practitioner_limit_for(&conn, &owner).unwrap(), Some(1));
    }
}
