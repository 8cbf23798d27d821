//! Multi-practitioner clinics.
//!
//! A clinic is owned by the practitioner who created it; that owner's plan
//! decides how many practitioner seats the clinic may fill. Members join
//! through single-use invitation tokens of which only the SHA-256 digest is
//! stored. Patient records stay with the practitioner who created them.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::billing::{self, BillingError};
use crate::crypto;
use crate::db::{repository, DatabaseError};
use crate::models::{Clinic, ClinicMembership, ClinicPermissions, ClinicRole, User};

/// How long an invitation token stays valid.
pub const INVITATION_TTL_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Not a member of any clinic")]
    NotInClinic,

    #[error("User already belongs to a clinic")]
    AlreadyInClinic,

    #[error("Missing clinic permission: {0}")]
    Forbidden(&'static str),

    #[error("Clinic member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("Invitation not found or expired")]
    InvitationInvalid,

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ClinicError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClinicInput {
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub first_session_fee: Option<f64>,
    pub subsequent_session_fee: Option<f64>,
    #[serde(default)]
    pub percentage_agreement: bool,
    pub percentage_amount: Option<f64>,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ClinicInput {
    fn validate(&self) -> Result<(), ClinicError> {
        if self.name.trim().is_empty() {
            return Err(ClinicError::Invalid("name must not be empty".into()));
        }
        for (name, fee) in [
            ("first_session_fee", self.first_session_fee),
            ("subsequent_session_fee", self.subsequent_session_fee),
        ] {
            if fee.is_some_and(|v| !(v.is_finite() && v >= 0.0)) {
                return Err(ClinicError::Invalid(format!("{name} must not be negative")));
            }
        }
        if self.percentage_amount.is_some_and(|p| !(0.0..=100.0).contains(&p)) {
            return Err(ClinicError::Invalid("percentage_amount must be between 0 and 100".into()));
        }
        Ok(())
    }

    fn apply(self, c: &mut Clinic) {
        c.name = self.name.trim().to_string();
        c.description = clean(self.description);
        c.address = clean(self.address);
        c.phone = clean(self.phone);
        c.email = clean(self.email);
        c.website = clean(self.website);
        c.first_session_fee = self.first_session_fee;
        c.subsequent_session_fee = self.subsequent_session_fee;
        c.percentage_agreement = self.percentage_agreement;
        c.percentage_amount = self.percentage_amount;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationRequest {
    pub email: String,
    pub role: ClinicRole,
}

/// A freshly issued invitation. The token is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub membership: ClinicMembership,
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionUpdate {
    pub can_manage_patients: Option<bool>,
    pub can_view_reports: Option<bool>,
    pub can_manage_billing: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClinicOverview {
    pub clinic: Clinic,
    pub membership: ClinicMembership,
    pub members: Vec<ClinicMembership>,
    pub pending_invitations: Vec<ClinicMembership>,
    pub practitioner_limit: Option<i64>,
    pub seats_used: i64,
}

fn membership_of(conn: &Connection, user_id: &Uuid) -> Result<ClinicMembership, ClinicError> {
    repository::active_membership_for(conn, user_id)?.ok_or(ClinicError::NotInClinic)
}

fn load_clinic(conn: &Connection, id: &Uuid) -> Result<Clinic, ClinicError> {
    Ok(repository::get_clinic(conn, id)?.ok_or_else(|| DatabaseError::not_found("clinic", id))?)
}

fn owner_of(conn: &Connection, clinic: &Clinic) -> Result<User, ClinicError> {
    Ok(repository::get_user(conn, &clinic.owner_id)?
        .ok_or_else(|| DatabaseError::not_found("user", clinic.owner_id))?)
}

/// Fail unless one more seat fits under the owner's plan. `already_counted`
/// excludes a pending invitation that is being refreshed or accepted.
fn ensure_seat(
    conn: &Connection,
    clinic: &Clinic,
    already_counted: bool,
    now: NaiveDateTime,
) -> Result<(), ClinicError> {
    let owner = owner_of(conn, clinic)?;
    let mut seats = repository::count_seats(conn, &clinic.id, now)?;
    if already_counted {
        seats -= 1;
    }
    billing::ensure_can_add_practitioner(conn, &owner, seats)?;
    Ok(())
}

pub fn create_clinic(
    conn: &Connection,
    user: &User,
    input: ClinicInput,
    now: NaiveDateTime,
) -> Result<ClinicOverview, ClinicError> {
    input.validate()?;
    if repository::active_membership_for(conn, &user.id)?.is_some() {
        return Err(ClinicError::AlreadyInClinic);
    }
    let mut clinic = Clinic {
        id: Uuid::new_v4(),
        owner_id: user.id,
        name: String::new(),
        description: None,
        address: None,
        phone: None,
        email: None,
        website: None,
        first_session_fee: None,
        subsequent_session_fee: None,
        percentage_agreement: false,
        percentage_amount: None,
        created_at: now,
    };
    input.apply(&mut clinic);
    let admin = ClinicMembership {
        id: Uuid::new_v4(),
        clinic_id: clinic.id,
        user_id: Some(user.id),
        invited_email: None,
        role: ClinicRole::Admin,
        is_active: true,
        permissions: ClinicPermissions::for_role(ClinicRole::Admin),
        invitation_token_hash: None,
        invitation_expires_at: None,
        invited_by: None,
        invited_at: None,
        joined_at: Some(now),
        left_at: None,
    };

    let tx = conn.unchecked_transaction()?;
    repository::insert_clinic(&tx, &clinic)?;
    repository::insert_membership(&tx, &admin)?;
    tx.commit()?;

    tracing::info!(clinic_id = %clinic.id, owner_id = %user.id, "Clinic created");
    clinic_overview(conn, user, now)
}

pub fn clinic_overview(conn: &Connection, user: &User, now: NaiveDateTime) -> Result<ClinicOverview, ClinicError> {
    let membership = membership_of(conn, &user.id)?;
    let clinic = load_clinic(conn, &membership.clinic_id)?;
    let owner = owner_of(conn, &clinic)?;
    Ok(ClinicOverview {
        members: repository::list_active_members(conn, &clinic.id)?,
        pending_invitations: repository::list_pending_invitations(conn, &clinic.id, now)?,
        practitioner_limit: billing::practitioner_limit_for(conn, &owner)?,
        seats_used: repository::count_seats(conn, &clinic.id, now)?,
        membership,
        clinic,
    })
}

pub fn update_clinic(conn: &Connection, user: &User, input: ClinicInput) -> Result<Clinic, ClinicError> {
    input.validate()?;
    let membership = membership_of(conn, &user.id)?;
    if !membership.permissions.can_manage_settings {
        return Err(ClinicError::Forbidden("can_manage_settings"));
    }
    let mut clinic = load_clinic(conn, &membership.clinic_id)?;
    input.apply(&mut clinic);
    repository::update_clinic(conn, &clinic)?;
    Ok(clinic)
}

/// Invite a practitioner or assistant by email. Re-inviting refreshes the
/// open invitation instead of adding a second one.
pub fn invite(
    conn: &Connection,
    user: &User,
    req: InvitationRequest,
    now: NaiveDateTime,
) -> Result<Invitation, ClinicError> {
    let membership = membership_of(conn, &user.id)?;
    if !membership.permissions.can_manage_practitioners {
        return Err(ClinicError::Forbidden("can_manage_practitioners"));
    }
    if req.role == ClinicRole::Admin {
        return Err(ClinicError::Invalid("role must be practitioner or assistant".into()));
    }
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ClinicError::Invalid("a valid email is required".into()));
    }
    let clinic = load_clinic(conn, &membership.clinic_id)?;

    let invitee = repository::find_user_by_email(conn, &email)?;
    if let Some(invitee) = &invitee {
        if repository::active_membership_for(conn, &invitee.id)?.is_some() {
            return Err(ClinicError::AlreadyInClinic);
        }
    }

    let existing = repository::find_open_invitation(conn, &clinic.id, invitee.as_ref().map(|u| &u.id), &email)?;
    if req.role.takes_seat() {
        let counted = existing
            .as_ref()
            .is_some_and(|m| m.role.takes_seat() && m.is_pending(now));
        ensure_seat(conn, &clinic, counted, now)?;
    }

    let token = crypto::generate_invitation_token();
    let mut invitation = existing.unwrap_or_else(|| ClinicMembership {
        id: Uuid::new_v4(),
        clinic_id: clinic.id,
        user_id: None,
        invited_email: None,
        role: req.role,
        is_active: false,
        permissions: ClinicPermissions::default(),
        invitation_token_hash: None,
        invitation_expires_at: None,
        invited_by: None,
        invited_at: None,
        joined_at: None,
        left_at: None,
    });
    let is_new = invitation.invited_at.is_none();
    invitation.user_id = invitee.map(|u| u.id);
    invitation.invited_email = Some(email);
    invitation.role = req.role;
    invitation.permissions = ClinicPermissions::for_role(req.role);
    invitation.invitation_token_hash = Some(crypto::hash_token(&token));
    invitation.invitation_expires_at = Some(now + Duration::days(INVITATION_TTL_DAYS));
    invitation.invited_by = Some(user.id);
    invitation.invited_at = Some(now);

    if is_new {
        repository::insert_membership(conn, &invitation)?;
    } else {
        repository::update_membership(conn, &invitation)?;
    }
    tracing::info!(clinic_id = %clinic.id, membership_id = %invitation.id, role = %req.role, "Clinic invitation issued");
    Ok(Invitation {
        membership: invitation,
        token,
    })
}

/// Join the clinic behind `token`. The invitation must be addressed to
/// `user`, either by id or, for invitations sent before the user
/// registered, by email.
pub fn accept_invitation(
    conn: &Connection,
    user: &User,
    token: &str,
    now: NaiveDateTime,
) -> Result<ClinicMembership, ClinicError> {
    let mut invitation = repository::find_membership_by_token_hash(conn, &crypto::hash_token(token.trim()))?
        .filter(|m| m.is_pending(now))
        .ok_or(ClinicError::InvitationInvalid)?;
    let addressed = match invitation.user_id {
        Some(id) => id == user.id,
        None => invitation
            .invited_email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(&user.email)),
    };
    if !addressed {
        return Err(ClinicError::InvitationInvalid);
    }
    if repository::active_membership_for(conn, &user.id)?.is_some() {
        return Err(ClinicError::AlreadyInClinic);
    }
    let clinic = load_clinic(conn, &invitation.clinic_id)?;
    if invitation.role.takes_seat() {
        ensure_seat(conn, &clinic, true, now)?;
    }

    invitation.user_id = Some(user.id);
    invitation.is_active = true;
    invitation.joined_at = Some(now);
    invitation.invitation_token_hash = None;
    invitation.invitation_expires_at = None;
    repository::update_membership(conn, &invitation)?;
    tracing::info!(clinic_id = %clinic.id, user_id = %user.id, "Clinic invitation accepted");
    Ok(invitation)
}

pub fn update_permissions(
    conn: &Connection,
    user: &User,
    member_id: &Uuid,
    update: PermissionUpdate,
) -> Result<ClinicMembership, ClinicError> {
    let membership = membership_of(conn, &user.id)?;
    if !membership.permissions.can_manage_practitioners {
        return Err(ClinicError::Forbidden("can_manage_practitioners"));
    }
    let mut member = repository::get_membership(conn, &membership.clinic_id, member_id)?
        .filter(|m| m.is_active)
        .ok_or(ClinicError::MemberNotFound(*member_id))?;
    if member.role == ClinicRole::Admin {
        return Err(ClinicError::Invalid("admin permissions cannot be changed".into()));
    }
    let p = &mut member.permissions;
    if let Some(v) = update.can_manage_patients {
        p.can_manage_patients = v;
    }
    if let Some(v) = update.can_view_reports {
        p.can_view_reports = v;
    }
    if let Some(v) = update.can_manage_billing {
        p.can_manage_billing = v;
    }
    repository::update_membership(conn, &member)?;
    Ok(member)
}

fn retire(conn: &Connection, mut m: ClinicMembership, now: NaiveDateTime) -> Result<(), ClinicError> {
    m.is_active = false;
    m.left_at = Some(now);
    m.invitation_token_hash = None;
    m.invitation_expires_at = None;
    repository::update_membership(conn, &m)?;
    Ok(())
}

/// Remove a member or withdraw a pending invitation.
pub fn remove_member(conn: &Connection, user: &User, member_id: &Uuid, now: NaiveDateTime) -> Result<(), ClinicError> {
    let membership = membership_of(conn, &user.id)?;
    if !membership.permissions.can_manage_practitioners {
        return Err(ClinicError::Forbidden("can_manage_practitioners"));
    }
    let member = repository::get_membership(conn, &membership.clinic_id, member_id)?
        .filter(|m| m.left_at.is_none())
        .ok_or(ClinicError::MemberNotFound(*member_id))?;
    if member.id == membership.id {
        return Err(ClinicError::Invalid("leave the clinic instead of removing yourself".into()));
    }
    if member.is_active && member.role == ClinicRole::Admin && repository::count_active_admins(conn, &member.clinic_id)? <= 1 {
        return Err(ClinicError::Invalid("cannot remove the last admin".into()));
    }
    tracing::info!(clinic_id = %member.clinic_id, membership_id = %member.id, "Clinic member removed");
    retire(conn, member, now)
}

pub fn leave(conn: &Connection, user: &User, now: NaiveDateTime) -> Result<(), ClinicError> {
    let membership = membership_of(conn, &user.id)?;
    if membership.role == ClinicRole::Admin && repository::count_active_admins(conn, &membership.clinic_id)? <= 1 {
        return Err(ClinicError::Invalid("the last admin cannot leave the clinic".into()));
    }
    tracing::info!(clinic_id = %membership.clinic_id, user_id = %user.id, "Left clinic");
    retire(conn, membership, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{SubscriptionStatus, UserRole, UserSubscription};
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn user(conn: &Connection, name: &str) -> User {
        let u = User::new(name, &format!("{name}@example.com"), "x".into(), UserRole::Physio);
        repository::insert_user(conn, &u).unwrap();
        u
    }

    fn subscribe_to_clinic_plan(conn: &Connection, owner: &User) {
        let plans = billing::seed_plans(conn, None, None, None).unwrap();
        let plan = plans.iter().find(|p| p.slug == "clinic-monthly").unwrap();
        let ts = now();
        repository::insert_subscription(
            conn,
            &UserSubscription {
                id: Uuid::new_v4(),
                user_id: owner.id,
                plan_id: plan.id,
                stripe_subscription_id: Some("sub_clinic".into()),
                status: SubscriptionStatus::Active,
                trial_starts_at: None,
                trial_ends_at: None,
                current_period_starts_at: None,
                current_period_ends_at: None,
                cancel_at_period_end: false,
                canceled_at: None,
                ended_at: None,
                created_at: ts,
                updated_at: ts,
            },
        )
        .unwrap();
    }

    fn clinic_input(name: &str) -> ClinicInput {
        ClinicInput {
            name: name.into(),
            ..ClinicInput::default()
        }
    }

    fn invite_as(conn: &Connection, by: &User, email: &str, role: ClinicRole) -> Result<Invitation, ClinicError> {
        invite(
            conn,
            by,
            InvitationRequest {
                email: email.into(),
                role,
            },
            now(),
        )
    }

    #[test]
    fn creator_becomes_the_only_admin() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        let overview = create_clinic(&conn, &owner, clinic_input("Fisio Centro"), now()).unwrap();
        assert_eq!(overview.membership.role, ClinicRole::Admin);
        assert!(overview.membership.permissions.can_manage_settings);
        assert_eq!(overview.members.len(), 1);
        assert_eq!(overview.seats_used, 1);
        assert_eq!(overview.practitioner_limit, Some(billing::FREE_PRACTITIONER_LIMIT));

        let err = create_clinic(&conn, &owner, clinic_input("Second"), now()).unwrap_err();
        assert!(matches!(err, ClinicError::AlreadyInClinic));
    }

    #[test]
    fn free_owner_cannot_invite_a_second_practitioner() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        create_clinic(&conn, &owner, clinic_input("Solo"), now()).unwrap();

        let err = invite_as(&conn, &owner, "colleague@example.com", ClinicRole::Practitioner).unwrap_err();
        assert!(matches!(
            err,
            ClinicError::Billing(BillingError::PractitionerLimitReached { limit: 1 })
        ));

        // Assistants take no seat.
        assert!(invite_as(&conn, &owner, "frontdesk@example.com", ClinicRole::Assistant).is_ok());
    }

    #[test]
    fn invited_practitioner_joins_with_the_token() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        subscribe_to_clinic_plan(&conn, &owner);
        create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();
        let colleague = user(&conn, "colleague");

        let invitation = invite_as(&conn, &owner, "Colleague@Example.com", ClinicRole::Practitioner).unwrap();
        assert_eq!(invitation.token.len(), 32);
        assert_eq!(
            invitation.membership.invitation_token_hash.as_deref(),
            Some(crypto::hash_token(&invitation.token).as_str())
        );

        let stranger = user(&conn, "stranger");
        assert!(matches!(
            accept_invitation(&conn, &stranger, &invitation.token, now()).unwrap_err(),
            ClinicError::InvitationInvalid
        ));

        let joined = accept_invitation(&conn, &colleague, &invitation.token, now()).unwrap();
        assert!(joined.is_active);
        assert!(joined.permissions.can_view_reports);
        assert!(!joined.permissions.can_manage_settings);
        assert!(joined.invitation_token_hash.is_none());

        let overview = clinic_overview(&conn, &owner, now()).unwrap();
        assert_eq!(overview.members.len(), 2);
        assert_eq!(overview.practitioner_limit, None);

        assert!(matches!(
            accept_invitation(&conn, &colleague, &invitation.token, now()).unwrap_err(),
            ClinicError::InvitationInvalid
        ));
    }

    #[test]
    fn invitation_for_an_unregistered_email_matches_after_signup() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        subscribe_to_clinic_plan(&conn, &owner);
        create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();

        let invitation = invite_as(&conn, &owner, "later@example.com", ClinicRole::Practitioner).unwrap();
        assert!(invitation.membership.user_id.is_none());
        let later = user(&conn, "later");
        let joined = accept_invitation(&conn, &later, &invitation.token, now()).unwrap();
        assert_eq!(joined.user_id, Some(later.id));
    }

    #[test]
    fn reinviting_refreshes_the_token_without_a_second_seat() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        subscribe_to_clinic_plan(&conn, &owner);
        create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();

        let first = invite_as(&conn, &owner, "pat@example.com", ClinicRole::Practitioner).unwrap();
        let second = invite_as(&conn, &owner, "pat@example.com", ClinicRole::Practitioner).unwrap();
        assert_eq!(first.membership.id, second.membership.id);
        assert_ne!(first.token, second.token);

        let overview = clinic_overview(&conn, &owner, now()).unwrap();
        assert_eq!(overview.pending_invitations.len(), 1);
        assert_eq!(overview.seats_used, 2);
    }

    #[test]
    fn expired_invitations_cannot_be_used_and_free_their_seat() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        subscribe_to_clinic_plan(&conn, &owner);
        create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();
        let colleague = user(&conn, "colleague");
        let invitation = invite_as(&conn, &owner, "colleague@example.com", ClinicRole::Practitioner).unwrap();

        let later = now() + Duration::days(INVITATION_TTL_DAYS + 1);
        assert!(matches!(
            accept_invitation(&conn, &colleague, &invitation.token, later).unwrap_err(),
            ClinicError::InvitationInvalid
        ));
        assert_eq!(repository::count_seats(&conn, &invitation.membership.clinic_id, later).unwrap(), 1);
    }

    #[test]
    fn members_of_another_clinic_cannot_be_invited() {
        let conn = open_memory_database().unwrap();
        let a = user(&conn, "alpha");
        let b = user(&conn, "beta");
        subscribe_to_clinic_plan(&conn, &a);
        create_clinic(&conn, &a, clinic_input("A"), now()).unwrap();
        create_clinic(&conn, &b, clinic_input("B"), now()).unwrap();
        let err = invite_as(&conn, &a, "beta@example.com", ClinicRole::Practitioner).unwrap_err();
        assert!(matches!(err, ClinicError::AlreadyInClinic));
    }

    #[test]
    fn last_admin_stays_and_members_can_be_removed() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        subscribe_to_clinic_plan(&conn, &owner);
        let overview = create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();
        let colleague = user(&conn, "colleague");
        let invitation = invite_as(&conn, &owner, "colleague@example.com", ClinicRole::Practitioner).unwrap();
        let member = accept_invitation(&conn, &colleague, &invitation.token, now()).unwrap();

        assert!(matches!(leave(&conn, &owner, now()).unwrap_err(), ClinicError::Invalid(_)));
        assert!(matches!(
            remove_member(&conn, &owner, &overview.membership.id, now()).unwrap_err(),
            ClinicError::Invalid(_)
        ));
        assert!(matches!(
            remove_member(&conn, &colleague, &overview.membership.id, now()).unwrap_err(),
            ClinicError::Forbidden(_)
        ));

        remove_member(&conn, &owner, &member.id, now()).unwrap();
        assert!(matches!(clinic_overview(&conn, &colleague, now()).unwrap_err(), ClinicError::NotInClinic));
        // A removed member may start their own clinic.
        assert!(create_clinic(&conn, &colleague, clinic_input("Own"), now()).is_ok());
    }

    #[test]
    fn admin_permissions_are_fixed_and_others_editable() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        let overview = create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();
        let assistant = user(&conn, "assistant");
        let invitation = invite_as(&conn, &owner, "assistant@example.com", ClinicRole::Assistant).unwrap();
        let member = accept_invitation(&conn, &assistant, &invitation.token, now()).unwrap();
        assert!(!member.permissions.can_view_reports);

        let updated = update_permissions(
            &conn,
            &owner,
            &member.id,
            PermissionUpdate {
                can_view_reports: Some(true),
                ..PermissionUpdate::default()
            },
        )
        .unwrap();
        assert!(updated.permissions.can_view_reports);
        assert!(updated.permissions.can_manage_patients);

        let err = update_permissions(&conn, &owner, &overview.membership.id, PermissionUpdate::default()).unwrap_err();
        assert!(matches!(err, ClinicError::Invalid(_)));
    }

    #[test]
    fn settings_need_the_settings_permission() {
        let conn = open_memory_database().unwrap();
        let owner = user(&conn, "owner");
        create_clinic(&conn, &owner, clinic_input("Team"), now()).unwrap();
        let assistant = user(&conn, "assistant");
        let invitation = invite_as(&conn, &owner, "assistant@example.com", ClinicRole::Assistant).unwrap();
        accept_invitation(&conn, &assistant, &invitation.token, now()).unwrap();

        let mut input = clinic_input("Renamed");
        input.percentage_agreement = true;
        input.percentage_amount = Some(30.0);
        assert!(matches!(
            update_clinic(&conn, &assistant, input.clone()).unwrap_err(),
            ClinicError::Forbidden("can_manage_settings")
        ));
        let clinic = update_clinic(&conn, &owner, input).unwrap();
        assert_eq!(clinic.name, "Renamed");
        assert_eq!(clinic.percentage_amount, Some(30.0));

        let mut bad = clinic_input("Team");
        bad.percentage_amount = Some(130.0);
        assert!(matches!(update_clinic(&conn, &owner, bad).unwrap_err(), ClinicError::Invalid(_)));
    }
}
