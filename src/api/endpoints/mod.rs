//! HTTP endpoint handlers.
//!
//! Each module covers one area of the practice. Handlers stay thin: they
//! open a connection, call into the domain modules and map the result.

pub mod account;
pub mod admin;
pub mod appointments;
pub mod auth;
pub mod billing;
pub mod calendly;
pub mod clinic;
pub mod dashboard;
pub mod diagnoses;
pub mod finance;
pub mod google_calendar;
pub mod health;
pub mod legal;
pub mod locations;
pub mod patients;
pub mod recurring;
pub mod reports;
pub mod treatments;
