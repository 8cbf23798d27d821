use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::PatientStatus;

/// A patient record. `notes` holds the decrypted clinical notes; the
/// repository encrypts them before they reach the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
    pub status: PatientStatus,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub preferred_location: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Patient {
    pub fn new(user_id: Uuid, name: &str) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            email: None,
            phone: None,
            date_of_birth: None,
            diagnosis: None,
            treatment_plan: None,
            notes: None,
            status: PatientStatus::Active,
            address_line1: None,
            address_line2: None,
            city: None,
            postcode: None,
            preferred_location: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive match over name, diagnosis and (decrypted) notes.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        let hit = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&needle))
        };
        self.name.to_lowercase().contains(&needle) || hit(&self.diagnosis) || hit(&self.notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_covers_notes_and_diagnosis() {
        let mut p = Patient::new(Uuid::new_v4(), "Ana Ruiz");
        p.diagnosis = Some("Lumbar strain".into());
        p.notes = Some("Prefers morning sessions".into());
        assert!(p.matches_search("ana"));
        assert!(p.matches_search("LUMBAR"));
        assert!(p.matches_search("morning"));
        assert!(!p.matches_search("shoulder"));
    }
}
