use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use super::{check_fee, clean, not_found, BulkOutcome, PracticeError};
use crate::db::repository;
use crate::models::{PaymentMethod, Treatment, TreatmentDetail, TreatmentStatus, TriggerPoint, TriggerPointKind};

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerPointInput {
    pub location_x: f64,
    pub location_y: f64,
    pub kind: Option<TriggerPointKind>,
    pub muscle: Option<String>,
    pub intensity: Option<u8>,
    pub symptoms: Option<String>,
    pub referral_pattern: Option<String>,
}

impl TriggerPointInput {
    fn into_point(self, treatment_id: Uuid) -> TriggerPoint {
        TriggerPoint {
            id: Uuid::new_v4(),
            treatment_id,
            location_x: self.location_x,
            location_y: self.location_y,
            kind: self.kind,
            muscle: clean(self.muscle),
            intensity: self.intensity,
            symptoms: clean(self.symptoms),
            referral_pattern: clean(self.referral_pattern),
        }
    }
}

/// Treatment fields accepted from clients. `trigger_points` replaces the
/// stored set on update only when present.
#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentInput {
    pub patient_id: Uuid,
    pub treatment_type: String,
    #[serde(alias = "date")]
    pub scheduled_at: NaiveDateTime,
    pub assessment: Option<String>,
    pub notes: Option<String>,
    pub status: Option<TreatmentStatus>,
    pub provider: Option<String>,
    pub location_id: Option<Uuid>,
    pub visit_type: Option<String>,
    pub fee_charged: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub pain_level: Option<u8>,
    pub movement_restriction: Option<String>,
    pub evaluation_data: Option<serde_json::Value>,
    pub trigger_points: Option<Vec<TriggerPointInput>>,
}

impl TreatmentInput {
    fn validate(&self) -> Result<(), PracticeError> {
        if self.treatment_type.trim().is_empty() {
            return Err(PracticeError::Invalid("treatment_type must not be empty".into()));
        }
        if self.pain_level.is_some_and(|p| p > 10) {
            return Err(PracticeError::Invalid("pain_level must be between 0 and 10".into()));
        }
        check_fee("fee_charged", self.fee_charged)?;
        for tp in self.trigger_points.iter().flatten() {
            if tp.intensity.is_some_and(|i| !(1..=10).contains(&i)) {
                return Err(PracticeError::Invalid("intensity must be between 1 and 10".into()));
            }
        }
        Ok(())
    }

    fn apply(&mut self, t: &mut Treatment) {
        t.treatment_type = self.treatment_type.trim().to_string();
        t.created_at = self.scheduled_at;
        t.assessment = clean(self.assessment.take());
        t.notes = clean(self.notes.take());
        if let Some(status) = self.status {
            t.status = status;
        }
        t.provider = clean(self.provider.take());
        t.location_id = self.location_id;
        t.visit_type = clean(self.visit_type.take());
        t.fee_charged = self.fee_charged;
        t.payment_method = self.payment_method;
        t.pain_level = self.pain_level;
        t.movement_restriction = clean(self.movement_restriction.take());
        t.evaluation_data = self.evaluation_data.take();
    }
}

fn check_location(conn: &Connection, user_id: &Uuid, location_id: Option<Uuid>) -> Result<(), PracticeError> {
    if let Some(id) = location_id {
        if repository::get_location(conn, user_id, &id)?.is_none() {
            return Err(not_found("location", id));
        }
    }
    Ok(())
}

pub fn create_treatment(
    conn: &Connection,
    user_id: &Uuid,
    mut input: TreatmentInput,
) -> Result<TreatmentDetail, PracticeError> {
    input.validate()?;
    if !repository::patient_belongs_to(conn, user_id, &input.patient_id)? {
        return Err(not_found("patient", input.patient_id));
    }
    check_location(conn, user_id, input.location_id)?;

    let mut treatment = Treatment::new(input.patient_id, &input.treatment_type, input.scheduled_at);
    input.apply(&mut treatment);
    let points: Vec<TriggerPoint> = input
        .trigger_points
        .take()
        .unwrap_or_default()
        .into_iter()
        .map(|tp| tp.into_point(treatment.id))
        .collect();

    let tx = conn.unchecked_transaction()?;
    repository::insert_treatment(&tx, &treatment)?;
    for tp in &points {
        repository::insert_trigger_point(&tx, tp)?;
    }
    tx.commit()?;

    tracing::info!(treatment_id = %treatment.id, patient_id = %treatment.patient_id, "Treatment created");
    Ok(TreatmentDetail {
        treatment,
        trigger_points: points,
    })
}

pub fn get_treatment_detail(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<TreatmentDetail, PracticeError> {
    let treatment = repository::get_treatment(conn, user_id, id)?.ok_or(not_found("treatment", *id))?;
    let trigger_points = repository::list_trigger_points(conn, id)?;
    Ok(TreatmentDetail {
        treatment,
        trigger_points,
    })
}

/// The owning patient of a treatment never changes.
pub fn update_treatment(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    mut input: TreatmentInput,
) -> Result<TreatmentDetail, PracticeError> {
    input.validate()?;
    let mut treatment = repository::get_treatment(conn, user_id, id)?.ok_or(not_found("treatment", *id))?;
    check_location(conn, user_id, input.location_id)?;
    input.apply(&mut treatment);

    let tx = conn.unchecked_transaction()?;
    repository::update_treatment(&tx, &treatment)?;
    if let Some(points) = input.trigger_points.take() {
        let points: Vec<TriggerPoint> = points.into_iter().map(|tp| tp.into_point(*id)).collect();
        repository::replace_trigger_points(&tx, id, &points)?;
    }
    tx.commit()?;

    get_treatment_detail(conn, user_id, id)
}

pub fn delete_treatment(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<(), PracticeError> {
    let tx = conn.unchecked_transaction()?;
    if !repository::delete_treatment(&tx, user_id, id)? {
        return Err(not_found("treatment", *id));
    }
    tx.commit()?;
    Ok(())
}

pub fn set_treatment_status(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    status: TreatmentStatus,
) -> Result<(), PracticeError> {
    if !repository::update_treatment_status(conn, user_id, id, status)? {
        return Err(not_found("treatment", *id));
    }
    Ok(())
}

/// Fields a bulk edit may set. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreatmentPatch {
    pub status: Option<TreatmentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub fee_charged: Option<f64>,
    pub location_id: Option<Uuid>,
}

impl TreatmentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payment_method.is_none()
            && self.fee_charged.is_none()
            && self.location_id.is_none()
    }
}

pub fn bulk_update_treatments(
    conn: &Connection,
    user_id: &Uuid,
    ids: &[Uuid],
    patch: &TreatmentPatch,
) -> Result<BulkOutcome, PracticeError> {
    if patch.is_empty() {
        return Err(PracticeError::Invalid("no fields to update".into()));
    }
    check_fee("fee_charged", patch.fee_charged)?;
    check_location(conn, user_id, patch.location_id)?;

    let tx = conn.unchecked_transaction()?;
    let mut outcome = BulkOutcome::default();
    for id in ids {
        let mut treatment = match repository::get_treatment(&tx, user_id, id) {
            Ok(Some(t)) => t,
            Ok(None) => {
                outcome.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(treatment_id = %id, error = %e, "Bulk update lookup failed");
                outcome.skipped += 1;
                continue;
            }
        };
        if let Some(status) = patch.status {
            treatment.status = status;
        }
        if let Some(method) = patch.payment_method {
            treatment.payment_method = Some(method);
        }
        if let Some(fee) = patch.fee_charged {
            treatment.fee_charged = Some(fee);
        }
        if let Some(location) = patch.location_id {
            treatment.location_id = Some(location);
        }
        match repository::update_treatment(&tx, &treatment) {
            Ok(()) => outcome.processed += 1,
            Err(e) => {
                tracing::warn!(treatment_id = %id, error = %e, "Bulk update failed for treatment");
                outcome.skipped += 1;
            }
        }
    }
    tx.commit()?;
    tracing::info!(updated = outcome.processed, skipped = outcome.skipped, "Bulk treatment update");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Location, LocationType, Patient, User, UserRole};
    use chrono::NaiveDate;

    fn setup() -> (Connection, User, Patient) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        repository::insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Iker");
        repository::insert_patient(&conn, &FieldKey::from_bytes([9u8; 32]), &patient).unwrap();
        (conn, user, patient)
    }

    fn input(patient_id: Uuid) -> TreatmentInput {
        TreatmentInput {
            patient_id,
            treatment_type: "Dry needling".into(),
            scheduled_at: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap().and_hms_opt(11, 0, 0).unwrap(),
            assessment: None,
            notes: Some("Upper trapezius".into()),
            status: None,
            provider: None,
            location_id: None,
            visit_type: None,
            fee_charged: Some(50.0),
            payment_method: Some(PaymentMethod::Cash),
            pain_level: Some(7),
            movement_restriction: None,
            evaluation_data: None,
            trigger_points: Some(vec![TriggerPointInput {
                location_x: 0.4,
                location_y: 0.2,
                kind: Some(TriggerPointKind::Active),
                muscle: Some("Trapezius".into()),
                intensity: Some(8),
                symptoms: None,
                referral_pattern: None,
            }]),
        }
    }

    #[test]
    fn create_stores_trigger_points() {
        let (conn, user, patient) = setup();
        let created = create_treatment(&conn, &user.id, input(patient.id)).unwrap();
        assert_eq!(created.treatment.status, TreatmentStatus::Scheduled);

        let detail = get_treatment_detail(&conn, &user.id, &created.treatment.id).unwrap();
        assert_eq!(detail.trigger_points.len(), 1);
        assert_eq!(detail.trigger_points[0].muscle.as_deref(), Some("Trapezius"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let (conn, user, patient) = setup();

        let mut bad_pain = input(patient.id);
        bad_pain.pain_level = Some(11);
        assert!(matches!(create_treatment(&conn, &user.id, bad_pain), Err(PracticeError::Invalid(_))));

        let mut bad_fee = input(patient.id);
        bad_fee.fee_charged = Some(-1.0);
        assert!(matches!(create_treatment(&conn, &user.id, bad_fee), Err(PracticeError::Invalid(_))));

        let mut bad_intensity = input(patient.id);
        if let Some(points) = bad_intensity.trigger_points.as_mut() {
            points[0].intensity = Some(0);
        }
        assert!(matches!(
            create_treatment(&conn, &user.id, bad_intensity),
            Err(PracticeError::Invalid(_))
        ));
    }

    #[test]
    fn foreign_patient_is_not_found() {
        let (conn, _user, patient) = setup();
        let stranger = Uuid::new_v4();
        let err = create_treatment(&conn, &stranger, input(patient.id)).unwrap_err();
        assert!(matches!(err, PracticeError::NotFound { entity: "patient", .. }));
    }

    #[test]
    fn update_replaces_points_only_when_given() {
        let (conn, user, patient) = setup();
        let created = create_treatment(&conn, &user.id, input(patient.id)).unwrap();
        let id = created.treatment.id;

        let mut keep = input(patient.id);
        keep.trigger_points = None;
        keep.notes = Some("Better".into());
        let updated = update_treatment(&conn, &user.id, &id, keep).unwrap();
        assert_eq!(updated.trigger_points.len(), 1);
        assert_eq!(updated.treatment.notes.as_deref(), Some("Better"));

        let mut clear = input(patient.id);
        clear.trigger_points = Some(Vec::new());
        let updated = update_treatment(&conn, &user.id, &id, clear).unwrap();
        assert!(updated.trigger_points.is_empty());
    }

    #[test]
    fn delete_removes_trigger_points() {
        let (conn, user, patient) = setup();
        let created = create_treatment(&conn, &user.id, input(patient.id)).unwrap();
        delete_treatment(&conn, &user.id, &created.treatment.id).unwrap();
        assert!(repository::list_trigger_points(&conn, &created.treatment.id).unwrap().is_empty());
        assert!(matches!(
            delete_treatment(&conn, &user.id, &created.treatment.id),
            Err(PracticeError::NotFound { .. })
        ));
    }

    #[test]
    fn bulk_patch_sets_only_given_fields() {
        let (conn, user, patient) = setup();
        let a = create_treatment(&conn, &user.id, input(patient.id)).unwrap().treatment;
        let b = create_treatment(&conn, &user.id, input(patient.id)).unwrap().treatment;
        let location = Location {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Centro".into(),
            address: None,
            phone: None,
            email: None,
            first_session_fee: None,
            subsequent_session_fee: None,
            fee_percentage: Some(30.0),
            location_type: LocationType::Clinic,
            is_active: true,
            created_at: a.created_at,
        };
        repository::insert_location(&conn, &location).unwrap();

        let patch = TreatmentPatch {
            payment_method: Some(PaymentMethod::Card),
            location_id: Some(location.id),
            ..Default::default()
        };
        let outcome = bulk_update_treatments(&conn, &user.id, &[a.id, b.id, Uuid::new_v4()], &patch).unwrap();
        assert_eq!(outcome, BulkOutcome { processed: 2, skipped: 1 });

        let stored = repository::get_treatment(&conn, &user.id, &a.id).unwrap().unwrap();
        assert_eq!(stored.payment_method, Some(PaymentMethod::Card));
        assert_eq!(stored.location_id, Some(location.id));
        assert_eq!(stored.fee_charged, Some(50.0));
        assert_eq!(stored.status, TreatmentStatus::Scheduled);
    }

    #[test]
    fn empty_patch_is_rejected() {
        let (conn, user, _patient) = setup();
        let err = bulk_update_treatments(&conn, &user.id, &[], &TreatmentPatch::default()).unwrap_err();
        assert!(matches!(err, PracticeError::Invalid(_)));
    }
}
