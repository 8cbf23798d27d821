//! Command-line interface: the server plus the maintenance jobs meant for
//! cron.

use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};

use crate::api::ServerError;
use crate::billing::{self, BillingError};
use crate::config::{AppConfig, ConfigError};
use crate::core_state::{CoreError, CoreState};
use crate::crypto::{self, FieldKey};
use crate::db::{self, repository, DatabaseError};
use crate::integrations::llm::{DeepSeekClient, LlmClient};
use crate::integrations::IntegrationError;
use crate::maintenance;
use crate::models::{User, UserRole};

#[derive(Parser, Debug)]
#[command(name = "physiodesk", version, about = "Physiotherapy practice manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    #[command(about = "Run the HTTP API")]
    Serve,
    #[command(about = "Mark past Scheduled sessions as Completed")]
    UpdateTreatmentStatuses,
    #[command(about = "Mark patients without a session in 60 days as Inactive")]
    UpdatePatientStatuses,
    #[command(about = "Run both status jobs")]
    Maintenance,
    #[command(about = "Create an administrator account")]
    CreateAdmin {
        username: String,
        email: String,
        password: String,
    },
    #[command(about = "Insert or refresh the subscription plans")]
    SeedPlans {
        #[arg(long, env = "STRIPE_MONTHLY_PRICE_ID")]
        monthly_price_id: Option<String>,
        #[arg(long, env = "STRIPE_YEARLY_PRICE_ID")]
        yearly_price_id: Option<String>,
        #[arg(long, env = "STRIPE_CLINIC_PRICE_ID")]
        clinic_price_id: Option<String>,
    },
    #[command(about = "Print a new FIELD_ENCRYPTION_KEY")]
    GenerateKey,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("{0}")]
    Invalid(String),
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    if cli.command == Command::GenerateKey {
        println!("{}", FieldKey::generate().to_base64());
        return Ok(());
    }

    let config = AppConfig::from_env()?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Serve => {
            let llm: Option<Arc<dyn LlmClient>> = match DeepSeekClient::from_config(&config)? {
                Some(client) => Some(Arc::new(client) as Arc<dyn LlmClient>),
                None => {
                    tracing::warn!("DEEPSEEK_API_KEY not set, reports will use templates");
                    None
                }
            };
            let core = Arc::new(CoreState::from_config(config)?);
            crate::api::serve(core, llm).await?;
        }
        Command::UpdateTreatmentStatuses => {
            let conn = db::open_database(&config.database_path)?;
            let count = maintenance::mark_past_treatments_as_completed(&conn, None, today)?;
            println!("Updated {count} treatments to Completed");
        }
        Command::UpdatePatientStatuses => {
            let conn = db::open_database(&config.database_path)?;
            let count = maintenance::mark_inactive_patients(&conn, None, today)?;
            println!("Updated {count} patients to Inactive");
        }
        Command::Maintenance => {
            let conn = db::open_database(&config.database_path)?;
            let summary = maintenance::run_maintenance(&conn, None, today)?;
            println!(
                "Updated {} treatments to Completed, {} patients to Inactive",
                summary.treatments_completed, summary.patients_inactivated
            );
        }
        Command::CreateAdmin {
            username,
            email,
            password,
        } => {
            let conn = db::open_database(&config.database_path)?;
            let user = create_admin(&conn, &username, &email, &password)?;
            println!("Created admin {} ({})", user.username, user.id);
        }
        Command::SeedPlans {
            monthly_price_id,
            yearly_price_id,
            clinic_price_id,
        } => {
            let conn = db::open_database(&config.database_path)?;
            let plans = billing::seed_plans(
                &conn,
                monthly_price_id.as_deref(),
                yearly_price_id.as_deref(),
                clinic_price_id.as_deref(),
            )?;
            for plan in plans {
                println!(
                    "{:<24} {:>6}.{:02} {} {}",
                    plan.slug,
                    plan.price_cents / 100,
                    plan.price_cents % 100,
                    plan.currency,
                    plan.billing_interval
                );
            }
        }
        Command::GenerateKey => {}
    }
    Ok(())
}

pub fn create_admin(
    conn: &rusqlite::Connection,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, CliError> {
    if username.trim().len() < 3 || password.len() < 6 {
        return Err(CliError::Invalid(
            "username needs 3 characters and password 6".into(),
        ));
    }
    if repository::username_or_email_taken(conn, username, email)? {
        return Err(CliError::Invalid(format!("{username} or {email} is already registered")));
    }
    let user = User::new(username.trim(), email.trim(), crypto::hash_password(password), UserRole::Admin);
    repository::insert_user(conn, &user)?;
    tracing::info!(user_id = %user.id, "Admin created");
    Ok(user)
}
