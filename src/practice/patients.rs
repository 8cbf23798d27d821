use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use super::{check_name, clean, not_found, BulkOutcome, PracticeError};
use crate::billing;
use crate::crypto::FieldKey;
use crate::db::repository;
use crate::models::{Patient, PatientStatus, User};

/// Patient fields accepted from clients on create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientInput {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub status: Option<PatientStatus>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub preferred_location: Option<String>,
}

impl PatientInput {
    fn apply(self, p: &mut Patient) {
        p.name = self.name.trim().to_string();
        p.email = clean(self.email);
        p.phone = clean(self.phone);
        p.date_of_birth = self.date_of_birth;
        p.diagnosis = clean(self.diagnosis);
        p.treatment_plan = clean(self.treatment_plan);
        p.notes = clean(self.notes);
        if let Some(status) = self.status {
            p.status = status;
        }
        p.address_line1 = clean(self.address_line1);
        p.address_line2 = clean(self.address_line2);
        p.city = clean(self.city);
        p.postcode = clean(self.postcode);
        p.preferred_location = clean(self.preferred_location);
    }
}

/// Create a patient for `user`, enforcing the plan's patient limit.
pub fn create_patient(
    conn: &Connection,
    key: &FieldKey,
    user: &User,
    input: PatientInput,
) -> Result<Patient, PracticeError> {
    check_name(&input.name)?;
    billing::ensure_can_add_patient(conn, user)?;

    let mut patient = Patient::new(user.id, &input.name);
    input.apply(&mut patient);
    repository::insert_patient(conn, key, &patient)?;
    tracing::info!(patient_id = %patient.id, user_id = %user.id, "Patient created");
    Ok(patient)
}

pub fn update_patient(
    conn: &Connection,
    key: &FieldKey,
    user_id: &Uuid,
    id: &Uuid,
    input: PatientInput,
) -> Result<Patient, PracticeError> {
    check_name(&input.name)?;
    let mut patient = repository::get_patient(conn, key, user_id, id)?.ok_or(not_found("patient", *id))?;
    input.apply(&mut patient);
    repository::update_patient(conn, key, &patient)?;
    Ok(patient)
}

pub fn set_patient_status(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    status: PatientStatus,
) -> Result<(), PracticeError> {
    if !repository::update_patient_status(conn, user_id, id, status)? {
        return Err(not_found("patient", *id));
    }
    Ok(())
}

pub fn bulk_update_patient_status(
    conn: &Connection,
    user_id: &Uuid,
    ids: &[Uuid],
    status: PatientStatus,
) -> Result<BulkOutcome, PracticeError> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = BulkOutcome::default();
    for id in ids {
        match repository::update_patient_status(&tx, user_id, id, status) {
            Ok(true) => outcome.processed += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                tracing::warn!(patient_id = %id, error = %e, "Bulk status update failed for patient");
                outcome.skipped += 1;
            }
        }
    }
    tx.commit()?;
    tracing::info!(processed = outcome.processed, skipped = outcome.skipped, status = %status, "Bulk patient status update");
    Ok(outcome)
}

pub fn delete_patient(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<(), PracticeError> {
    let tx = conn.unchecked_transaction()?;
    if !repository::delete_patient_cascade(&tx, user_id, id)? {
        return Err(not_found("patient", *id));
    }
    tx.commit()?;
    tracing::info!(patient_id = %id, "Patient deleted");
    Ok(())
}

/// Delete many patients and everything attached to them in one
/// transaction.
pub fn bulk_delete_patients(conn: &Connection, user_id: &Uuid, ids: &[Uuid]) -> Result<BulkOutcome, PracticeError> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = BulkOutcome::default();
    for id in ids {
        match repository::delete_patient_cascade(&tx, user_id, id) {
            Ok(true) => outcome.processed += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                tracing::warn!(patient_id = %id, error = %e, "Bulk delete failed for patient");
                outcome.skipped += 1;
            }
        }
    }
    tx.commit()?;
    tracing::info!(deleted = outcome.processed, skipped = outcome.skipped, "Bulk patient delete");
    Ok(outcome)
}

/// Scheduled sessions of one patient dated before `now` become Completed.
pub fn mark_patient_past_completed(
    conn: &Connection,
    user_id: &Uuid,
    patient_id: &Uuid,
    now: NaiveDateTime,
) -> Result<usize, PracticeError> {
    if !repository::patient_belongs_to(conn, user_id, patient_id)? {
        return Err(not_found("patient", *patient_id));
    }
    Ok(repository::complete_past_patient_treatments(conn, patient_id, &now)?)
}
