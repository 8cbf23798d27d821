//! `GET /api/legal/privacy` and `GET /api/legal/terms`: Unprotected.

use axum::Json;
use serde::Serialize;

const LEGAL_VERSION: &str = "2024-01";

#[derive(Serialize)]
pub struct LegalDocument {
    pub title: &'static str,
    pub version: &'static str,
    pub sections: Vec<LegalSection>,
}

#[derive(Serialize)]
pub struct LegalSection {
    pub heading: &'static str,
    pub body: &'static str,
}

fn section(heading: &'static str, body: &'static str) -> LegalSection {
    LegalSection { heading, body }
}

pub async fn privacy() -> Json<LegalDocument> {
    Json(LegalDocument {
        title: "Privacy Policy",
        version: LEGAL_VERSION,
        sections: vec![
            section(
                "Data we process",
                "Account details of practitioners and the patient records they enter: \
                 names, contact details, diagnoses, session notes and billing data.",
            ),
            section(
                "Purpose",
                "Patient data is processed only to run the practitioner's practice. \
                 Practitioners act as controllers for their patients' data.",
            ),
            section(
                "Protection",
                "Passwords are stored as salted PBKDF2 hashes. Clinical notes and \
                 third-party credentials are encrypted at rest with AES-256-GCM.",
            ),
            section(
                "Third parties",
                "Stripe for payments, Calendly and Google Calendar when connected, and \
                 the configured language-model provider when a report is generated.",
            ),
            section(
                "Your rights",
                "You can export all of your data as JSON and delete your account at any \
                 time from the account settings.",
            ),
        ],
    })
}

pub async fn terms() -> Json<LegalDocument> {
    Json(LegalDocument {
        title: "Terms and Conditions",
        version: LEGAL_VERSION,
        sections: vec![
            section(
                "Service",
                "The service provides patient, appointment and finance management for \
                 physiotherapy practices.",
            ),
            section(
                "Plans",
                "The free tier is limited to 10 patients. Paid plans raise the limit and \
                 renew until cancelled through the billing portal.",
            ),
            section(
                "Responsibility",
                "Generated reports are drafts. The practitioner remains responsible for \
                 every clinical and tax decision.",
            ),
        ],
    })
}
