use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{check_fee, check_name, clean, not_found, PracticeError};
use crate::db::repository;
use crate::models::{Location, LocationType};

#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub first_session_fee: Option<f64>,
    pub subsequent_session_fee: Option<f64>,
    pub fee_percentage: Option<f64>,
    pub location_type: LocationType,
    pub is_active: Option<bool>,
}

impl LocationInput {
    fn validate(&self) -> Result<(), PracticeError> {
        check_name(&self.name)?;
        check_fee("first_session_fee", self.first_session_fee)?;
        check_fee("subsequent_session_fee", self.subsequent_session_fee)?;
        if self.fee_percentage.is_some_and(|p| !(0.0..=100.0).contains(&p)) {
            return Err(PracticeError::Invalid("fee_percentage must be between 0 and 100".into()));
        }
        Ok(())
    }

    fn apply(self, l: &mut Location) {
        l.name = self.name.trim().to_string();
        l.address = clean(self.address);
        l.phone = clean(self.phone);
        l.email = clean(self.email);
        l.first_session_fee = self.first_session_fee;
        l.subsequent_session_fee = self.subsequent_session_fee;
        l.fee_percentage = self.fee_percentage;
        l.location_type = self.location_type;
        if let Some(active) = self.is_active {
            l.is_active = active;
        }
    }
}

/// What `remove_location` actually did.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationRemoval {
    Deleted,
    Deactivated,
}

pub fn create_location(conn: &Connection, user_id: &Uuid, input: LocationInput) -> Result<Location, PracticeError> {
    input.validate()?;
    let mut location = Location {
        id: Uuid::new_v4(),
        user_id: *user_id,
        name: String::new(),
        address: None,
        phone: None,
        email: None,
        first_session_fee: None,
        subsequent_session_fee: None,
        fee_percentage: None,
        location_type: input.location_type,
        is_active: true,
        created_at: chrono::Local::now().naive_local(),
    };
    input.apply(&mut location);
    repository::insert_location(conn, &location)?;
    Ok(location)
}

pub fn update_location(
    conn: &Connection,
    user_id: &Uuid,
    id: &Uuid,
    input: LocationInput,
) -> Result<Location, PracticeError> {
    input.validate()?;
    let mut location = repository::get_location(conn, user_id, id)?.ok_or(not_found("location", *id))?;
    input.apply(&mut location);
    repository::update_location(conn, &location)?;
    Ok(location)
}

/// Delete a location, or only deactivate it while sessions, recurring
/// rules or the finance settings still point at it.
pub fn remove_location(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<LocationRemoval, PracticeError> {
    if repository::get_location(conn, user_id, id)?.is_none() {
        return Err(not_found("location", *id));
    }
    if repository::location_usage(conn, id)? > 0 {
        repository::deactivate_location(conn, id)?;
        tracing::info!(location_id = %id, "Location in use, deactivated instead of deleted");
        return Ok(LocationRemoval::Deactivated);
    }
    repository::delete_location(conn, id)?;
    Ok(LocationRemoval::Deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, Treatment, User, UserRole};
    use chrono::NaiveDate;

    fn input(name: &str) -> LocationInput {
        LocationInput {
            name: name.into(),
            address: Some("Calle Mayor 1".into()),
            phone: None,
            email: None,
            first_session_fee: Some(60.0),
            subsequent_session_fee: Some(50.0),
            fee_percentage: Some(30.0),
            location_type: LocationType::Clinic,
            is_active: None,
        }
    }

    fn setup() -> (Connection, User) {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        repository::insert_user(&conn, &user).unwrap();
        (conn, user)
    }

    #[test]
    fn unused_location_is_deleted() {
        let (conn, user) = setup();
        let l = create_location(&conn, &user.id, input("Centro")).unwrap();
        assert_eq!(remove_location(&conn, &user.id, &l.id).unwrap(), LocationRemoval::Deleted);
        assert!(repository::get_location(&conn, &user.id, &l.id).unwrap().is_none());
    }

    #[test]
    fn referenced_location_is_deactivated() {
        let (conn, user) = setup();
        let l = create_location(&conn, &user.id, input("Centro")).unwrap();
        let patient = Patient::new(user.id, "Lia");
        repository::insert_patient(&conn, &FieldKey::from_bytes([1u8; 32]), &patient).unwrap();
        let mut t = Treatment::new(
            patient.id,
            "Massage",
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        );
        t.location_id = Some(l.id);
        repository::insert_treatment(&conn, &t).unwrap();

        assert_eq!(remove_location(&conn, &user.id, &l.id).unwrap(), LocationRemoval::Deactivated);
        let stored = repository::get_location(&conn, &user.id, &l.id).unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(repository::list_locations(&conn, &user.id, true).unwrap().is_empty());
    }

    #[test]
    fn percentage_out_of_range_is_rejected() {
        let (conn, user) = setup();
        let mut bad = input("Centro");
        bad.fee_percentage = Some(120.0);
        assert!(matches!(create_location(&conn, &user.id, bad), Err(PracticeError::Invalid(_))));
    }

    #[test]
    fn other_users_location_is_not_found() {
        let (conn, user) = setup();
        let l = create_location(&conn, &user.id, input("Centro")).unwrap();
        let err = update_location(&conn, &Uuid::new_v4(), &l.id, input("Mine")).unwrap_err();
        assert!(matches!(err, PracticeError::NotFound { entity: "location", .. }));
    }
}
