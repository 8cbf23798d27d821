use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ClinicRole;

/// A practice shared by several practitioners. The owner's plan pays for
/// the practitioner seats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub first_session_fee: Option<f64>,
    pub subsequent_session_fee: Option<f64>,
    pub percentage_agreement: bool,
    pub percentage_amount: Option<f64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClinicPermissions {
    pub can_manage_patients: bool,
    pub can_view_reports: bool,
    pub can_manage_billing: bool,
    pub can_manage_practitioners: bool,
    pub can_manage_settings: bool,
}

impl ClinicPermissions {
    pub fn for_role(role: ClinicRole) -> Self {
        match role {
            ClinicRole::Admin => Self {
                can_manage_patients: true,
                can_view_reports: true,
                can_manage_billing: true,
                can_manage_practitioners: true,
                can_manage_settings: true,
            },
            ClinicRole::Practitioner => Self {
                can_manage_patients: true,
                can_view_reports: true,
                ..Self::default()
            },
            ClinicRole::Assistant => Self {
                can_manage_patients: true,
                ..Self::default()
            },
        }
    }
}

/// Membership of a user in a clinic. While an invitation is pending
/// `is_active` is false and `user_id` may be unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicMembership {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: Option<Uuid>,
    pub invited_email: Option<String>,
    pub role: ClinicRole,
    pub is_active: bool,
    #[serde(flatten)]
    pub permissions: ClinicPermissions,
    #[serde(skip_serializing)]
    pub invitation_token_hash: Option<String>,
    pub invitation_expires_at: Option<NaiveDateTime>,
    pub invited_by: Option<Uuid>,
    pub invited_at: Option<NaiveDateTime>,
    pub joined_at: Option<NaiveDateTime>,
    pub left_at: Option<NaiveDateTime>,
}

impl ClinicMembership {
    pub fn is_pending(&self, now: NaiveDateTime) -> bool {
        !self.is_active
            && self.left_at.is_none()
            && self.invitation_token_hash.is_some()
            && self.invitation_expires_at.is_some_and(|at| at > now)
    }
}
