use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use super::recurrence::{expand_occurrences, occurs_on};
use super::SchedulingError;
use crate::db::repository;
use crate::models::{RecurringAppointment, Treatment};

/// Structural checks shared by create and update.
pub fn validate_rule(rule: &RecurringAppointment) -> Result<(), SchedulingError> {
    if let Some(end) = rule.end_date {
        if end < rule.start_date {
            return Err(SchedulingError::InvalidDateRange {
                start: rule.start_date.to_string(),
                end: end.to_string(),
            });
        }
    }
    Ok(())
}

pub fn create_rule(
    conn: &Connection,
    user_id: &Uuid,
    rule: &RecurringAppointment,
) -> Result<(), SchedulingError> {
    validate_rule(rule)?;
    if !repository::patient_belongs_to(conn, user_id, &rule.patient_id)? {
        return Err(SchedulingError::PatientNotFound(rule.patient_id));
    }
    repository::insert_recurring(conn, rule)?;
    tracing::info!(rule_id = %rule.id, patient_id = %rule.patient_id, kind = rule.recurrence_type.as_str(), "Recurring appointment created");
    Ok(())
}

pub fn update_rule(
    conn: &Connection,
    user_id: &Uuid,
    rule: &RecurringAppointment,
) -> Result<(), SchedulingError> {
    validate_rule(rule)?;
    let current = repository::get_recurring(conn, user_id, &rule.id)?
        .ok_or(SchedulingError::RuleNotFound(rule.id))?;
    if current.patient_id != rule.patient_id
        && !repository::patient_belongs_to(conn, user_id, &rule.patient_id)?
    {
        return Err(SchedulingError::PatientNotFound(rule.patient_id));
    }
    repository::update_recurring(conn, rule)?;
    Ok(())
}

/// Stop generating occurrences. Already materialized treatments stay.
pub fn deactivate_rule(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<(), SchedulingError> {
    let mut rule = repository::get_recurring(conn, user_id, id)?
        .ok_or(SchedulingError::RuleNotFound(*id))?;
    rule.is_active = false;
    repository::update_recurring(conn, &rule)?;
    Ok(())
}

pub fn delete_rule(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<(), SchedulingError> {
    if !repository::delete_recurring(conn, user_id, id)? {
        return Err(SchedulingError::RuleNotFound(*id));
    }
    Ok(())
}

/// First occurrence at or after `from`, looking one week ahead.
pub fn next_occurrence(rule: &RecurringAppointment, from: NaiveDateTime) -> Option<NaiveDateTime> {
    expand_occurrences(rule, from, from + Duration::days(8))
        .into_iter()
        .find(|at| *at >= from)
}

/// Turn one occurrence of a rule into a real treatment.
///
/// Returns the existing treatment when one already sits at exactly that
/// datetime, otherwise inserts a Scheduled treatment copied from the rule.
/// The boolean is true when a row was created.
pub fn materialize_occurrence(
    conn: &Connection,
    user_id: &Uuid,
    rule_id: &Uuid,
    at: NaiveDateTime,
) -> Result<(Treatment, bool), SchedulingError> {
    let rule = repository::get_recurring(conn, user_id, rule_id)?
        .ok_or(SchedulingError::RuleNotFound(*rule_id))?;

    if !occurs_on(&rule, at.date()) || at.time() != rule.time_of_day {
        return Err(SchedulingError::NotAnOccurrence(at.to_string()));
    }

    if let Some(existing) = repository::find_treatment_at(conn, &rule.patient_id, &at)? {
        return Ok((existing, false));
    }

    let mut treatment = Treatment::new(rule.patient_id, &rule.treatment_type, at);
    treatment.notes = rule.notes.clone();
    treatment.location_id = rule.location_id;
    treatment.provider = rule.provider.clone();
    treatment.fee_charged = rule.fee_charged;
    treatment.payment_method = rule.payment_method;
    treatment.recurring_id = Some(rule.id);
    repository::insert_treatment(conn, &treatment)?;

    tracing::info!(rule_id = %rule.id, treatment_id = %treatment.id, at = %at, "Materialized recurring occurrence");
    Ok((treatment, true))
}
