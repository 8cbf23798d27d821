use chrono::NaiveTime;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use super::report::{compute_year, year_bounds, YearReport};
use crate::db::{repository, DatabaseError};
use crate::models::{ContributionBracket, FinancialSettings, FixedCost, TreatmentFilter, TreatmentStatus};

#[derive(Error, Debug)]
pub enum FinanceError {
    #[error("Invalid financial settings: {0}")]
    Invalid(String),

    #[error("Year out of range: {0}")]
    InvalidYear(i32),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

fn check_percentage(name: &str, value: Option<f64>) -> Result<(), FinanceError> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => {
            Err(FinanceError::Invalid(format!("{name} must be between 0 and 100")))
        }
        _ => Ok(()),
    }
}

pub fn validate_settings(s: &FinancialSettings) -> Result<(), FinanceError> {
    check_percentage("contribution_rate", s.contribution_rate)?;
    check_percentage("card_tax_rate", s.card_tax_rate)?;
    check_percentage("clinic_fee_percentage", s.clinic_fee_percentage)?;
    if s.fixed_contribution_base.is_some_and(|b| b < 0.0) {
        return Err(FinanceError::Invalid("fixed_contribution_base must not be negative".into()));
    }
    Ok(())
}

/// Brackets must have non-negative bases and `lower < upper`, and must not
/// overlap once sorted.
pub fn validate_brackets(brackets: &[ContributionBracket]) -> Result<(), FinanceError> {
    let mut sorted: Vec<&ContributionBracket> = brackets.iter().collect();
    sorted.sort_by(|a, b| a.lower_bound.total_cmp(&b.lower_bound));
    for (i, b) in sorted.iter().enumerate() {
        if b.base < 0.0 || b.lower_bound < 0.0 {
            return Err(FinanceError::Invalid("bracket values must not be negative".into()));
        }
        if b.upper_bound.is_some_and(|u| u <= b.lower_bound) {
            return Err(FinanceError::Invalid(format!(
                "bracket starting at {} has upper bound below its lower bound",
                b.lower_bound
            )));
        }
        if let Some(next) = sorted.get(i + 1) {
            match b.upper_bound {
                None => {
                    return Err(FinanceError::Invalid("only the last bracket may be open-ended".into()))
                }
                Some(u) if u > next.lower_bound => {
                    return Err(FinanceError::Invalid(format!("brackets overlap at {}", next.lower_bound)))
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Save settings; a clinic location must belong to the user.
pub fn save_settings(conn: &Connection, user_id: &Uuid, settings: &FinancialSettings) -> Result<(), FinanceError> {
    validate_settings(settings)?;
    if let Some(location_id) = settings.clinic_location_id {
        if repository::get_location(conn, user_id, &location_id)?.is_none() {
            return Err(FinanceError::Invalid("clinic location not found".into()));
        }
    }
    repository::upsert_financial_settings(conn, user_id, settings)?;
    Ok(())
}

pub fn save_brackets(conn: &Connection, user_id: &Uuid, brackets: &[ContributionBracket]) -> Result<(), FinanceError> {
    validate_brackets(brackets)?;
    repository::replace_brackets(conn, user_id, brackets)?;
    Ok(())
}

pub fn add_fixed_cost(
    conn: &Connection,
    user_id: &Uuid,
    description: &str,
    monthly_amount: f64,
) -> Result<FixedCost, FinanceError> {
    if description.trim().is_empty() {
        return Err(FinanceError::Invalid("description is required".into()));
    }
    if !monthly_amount.is_finite() || monthly_amount < 0.0 {
        return Err(FinanceError::Invalid("monthly_amount must not be negative".into()));
    }
    let cost = FixedCost {
        id: Uuid::new_v4(),
        user_id: *user_id,
        description: description.trim().to_string(),
        monthly_amount,
    };
    repository::insert_fixed_cost(conn, &cost)?;
    Ok(cost)
}

/// Load a practitioner's year and aggregate it.
pub fn financial_year(conn: &Connection, user_id: &Uuid, year: i32) -> Result<YearReport, FinanceError> {
    let (first, next) = year_bounds(year).ok_or(FinanceError::InvalidYear(year))?;
    let filter = TreatmentFilter {
        status: Some(TreatmentStatus::Completed),
        from: Some(first.and_time(NaiveTime::MIN)),
        to: Some(next.and_time(NaiveTime::MIN)),
        ..Default::default()
    };
    let treatments = repository::list_treatments(conn, user_id, &filter)?;
    let fixed_costs = repository::list_fixed_costs(conn, user_id)?;
    let settings = repository::get_financial_settings(conn, user_id)?;
    let brackets = repository::list_brackets(conn, user_id)?;
    Ok(compute_year(&treatments, &fixed_costs, &settings, &brackets, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::repository::{insert_patient, insert_treatment, insert_user};
    use crate::db::sqlite::open_memory_database;
    use crate::finance::Figure;
    use crate::models::{Patient, Treatment, User, UserRole};
    use chrono::NaiveDate;

    #[test]
    fn overlapping_brackets_are_rejected() {
        let b = |lower: f64, upper: Option<f64>| ContributionBracket {
            id: Uuid::new_v4(),
            lower_bound: lower,
            upper_bound: upper,
            base: 800.0,
        };
        assert!(validate_brackets(&[b(0.0, Some(1000.0)), b(1000.0, None)]).is_ok());
        assert!(validate_brackets(&[b(0.0, Some(1200.0)), b(1000.0, None)]).is_err());
        assert!(validate_brackets(&[b(0.0, None), b(1000.0, None)]).is_err());
        assert!(validate_brackets(&[b(500.0, Some(100.0))]).is_err());
    }

    #[test]
    fn percentages_are_bounded() {
        let bad = FinancialSettings {
            card_tax_rate: Some(120.0),
            ..Default::default()
        };
        assert!(validate_settings(&bad).is_err());
        assert!(validate_settings(&FinancialSettings::default()).is_ok());
    }

    #[test]
    fn financial_year_reads_completed_sessions() {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();
        let patient = Patient::new(user.id, "Ona");
        insert_patient(&conn, &FieldKey::from_bytes([1u8; 32]), &patient).unwrap();

        let at = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let mut done = Treatment::new(patient.id, "Physio", at);
        done.status = TreatmentStatus::Completed;
        done.fee_charged = Some(60.0);
        insert_treatment(&conn, &done).unwrap();
        let mut pending = Treatment::new(patient.id, "Physio", at + chrono::Duration::days(1));
        pending.fee_charged = Some(60.0);
        insert_treatment(&conn, &pending).unwrap();

        add_fixed_cost(&conn, &user.id, "Insurance", 20.0).unwrap();
        save_settings(
            &conn,
            &user.id,
            &FinancialSettings {
                contribution_rate: Some(10.0),
                fixed_contribution_base: Some(300.0),
                ..Default::default()
            },
        )
        .unwrap();

        let report = financial_year(&conn, &user.id, 2024).unwrap();
        let feb = &report.months[1].totals;
        assert_eq!(feb.gross, 60.0);
        assert_eq!(feb.net_income, 40.0);
        assert_eq!(feb.contribution, Figure::Amount(30.0));
        assert_eq!(report.annual.fixed_costs, 240.0);
    }
}
