use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::row;
use crate::db::DatabaseError;
use crate::models::{ContributionBracket, FinancialSettings, FixedCost};

/// Settings row for a user, or all-empty settings when none was saved yet.
pub fn get_financial_settings(conn: &Connection, user_id: &Uuid) -> Result<FinancialSettings, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT fixed_contribution_base, contribution_rate, card_tax_rate,
             clinic_location_id, clinic_fee_percentage
             FROM financial_settings WHERE user_id = ?1",
            params![user_id.to_string()],
            |r| {
                Ok(FinancialSettings {
                    fixed_contribution_base: r.get(0)?,
                    contribution_rate: r.get(1)?,
                    card_tax_rate: r.get(2)?,
                    clinic_location_id: row::opt_uuid(r, 3)?,
                    clinic_fee_percentage: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

pub fn upsert_financial_settings(
    conn: &Connection,
    user_id: &Uuid,
    s: &FinancialSettings,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO financial_settings (user_id, fixed_contribution_base, contribution_rate,
         card_tax_rate, clinic_location_id, clinic_fee_percentage)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
             fixed_contribution_base = excluded.fixed_contribution_base,
             contribution_rate = excluded.contribution_rate,
             card_tax_rate = excluded.card_tax_rate,
             clinic_location_id = excluded.clinic_location_id,
             clinic_fee_percentage = excluded.clinic_fee_percentage",
        params![
            user_id.to_string(),
            s.fixed_contribution_base,
            s.contribution_rate,
            s.card_tax_rate,
            s.clinic_location_id.map(|id| id.to_string()),
            s.clinic_fee_percentage,
        ],
    )?;
    Ok(())
}

/// Brackets ordered by lower bound.
pub fn list_brackets(conn: &Connection, user_id: &Uuid) -> Result<Vec<ContributionBracket>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, lower_bound, upper_bound, base FROM contribution_brackets
         WHERE user_id = ?1 ORDER BY lower_bound ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |r| {
        Ok(ContributionBracket {
            id: row::uuid(r, 0)?,
            lower_bound: r.get(1)?,
            upper_bound: r.get(2)?,
            base: r.get(3)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn replace_brackets(
    conn: &Connection,
    user_id: &Uuid,
    brackets: &[ContributionBracket],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM contribution_brackets WHERE user_id = ?1",
        params![user_id.to_string()],
    )?;
    for b in brackets {
        conn.execute(
            "INSERT INTO contribution_brackets (id, user_id, lower_bound, upper_bound, base)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![b.id.to_string(), user_id.to_string(), b.lower_bound, b.upper_bound, b.base],
        )?;
    }
    Ok(())
}

pub fn insert_fixed_cost(conn: &Connection, c: &FixedCost) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO fixed_costs (id, user_id, description, monthly_amount) VALUES (?1, ?2, ?3, ?4)",
        params![c.id.to_string(), c.user_id.to_string(), c.description, c.monthly_amount],
    )?;
    Ok(())
}

pub fn list_fixed_costs(conn: &Connection, user_id: &Uuid) -> Result<Vec<FixedCost>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, description, monthly_amount FROM fixed_costs
         WHERE user_id = ?1 ORDER BY description ASC",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |r| {
        Ok(FixedCost {
            id: row::uuid(r, 0)?,
            user_id: row::uuid(r, 1)?,
            description: r.get(2)?,
            monthly_amount: r.get(3)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn delete_fixed_cost(conn: &Connection, user_id: &Uuid, id: &Uuid) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM fixed_costs WHERE id = ?1 AND user_id = ?2",
        params![id.to_string(), user_id.to_string()],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_user;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{User, UserRole};

    #[test]
    fn settings_default_then_upsert() {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();

        assert!(get_financial_settings(&conn, &user.id).unwrap().contribution_rate.is_none());

        let settings = FinancialSettings {
            contribution_rate: Some(30.6),
            card_tax_rate: Some(1.5),
            ..Default::default()
        };
        upsert_financial_settings(&conn, &user.id, &settings).unwrap();
        upsert_financial_settings(&conn, &user.id, &settings).unwrap();
        let loaded = get_financial_settings(&conn, &user.id).unwrap();
        assert_eq!(loaded.contribution_rate, Some(30.6));
        assert_eq!(loaded.card_tax_rate, Some(1.5));
    }

    #[test]
    fn brackets_are_replaced_and_ordered() {
        let conn = open_memory_database().unwrap();
        let user = User::new("physio", "physio@test", "h".into(), UserRole::Physio);
        insert_user(&conn, &user).unwrap();

        let bracket = |lower: f64, upper: Option<f64>, base: f64| ContributionBracket {
            id: Uuid::new_v4(),
            lower_bound: lower,
            upper_bound: upper,
            base,
        };
        replace_brackets(&conn, &user.id, &[bracket(1000.0, None, 1000.0), bracket(0.0, Some(1000.0), 800.0)]).unwrap();
        replace_brackets(&conn, &user.id, &[bracket(670.0, None, 950.0), bracket(0.0, Some(670.0), 750.0)]).unwrap();

        let loaded = list_brackets(&conn, &user.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].lower_bound, 0.0);
        assert_eq!(loaded[1].base, 950.0);
    }
}
