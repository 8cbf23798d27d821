use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The stored string doubles as the JSON representation.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(UserRole {
    Physio => "physio",
    Admin => "admin",
    Patient => "patient",
});

str_enum!(PatientStatus {
    Active => "Active",
    Inactive => "Inactive",
    Completed => "Completed",
    PendingReview => "Pending Review",
});

str_enum!(TreatmentStatus {
    Scheduled => "Scheduled",
    Completed => "Completed",
    Cancelled => "Cancelled",
});

str_enum!(PaymentMethod {
    Cash => "cash",
    Card => "card",
    Transfer => "transfer",
    Other => "other",
});

str_enum!(RecurrenceType {
    Weekly => "weekly",
    DailyMonFri => "daily_mon_fri",
});

str_enum!(TriggerPointKind {
    Active => "active",
    Latent => "latent",
    Satellite => "satellite",
});

str_enum!(LocationType {
    Clinic => "clinic",
    HomeVisit => "home_visit",
    OwnPractice => "own_practice",
    Online => "online",
});

str_enum!(BookingStatus {
    Pending => "Pending",
    Matched => "Matched",
    Ignored => "Ignored",
});

str_enum!(SubscriptionStatus {
    Active => "active",
    Trialing => "trialing",
    PastDue => "past_due",
    Canceled => "canceled",
    Incomplete => "incomplete",
    IncompleteExpired => "incomplete_expired",
    Unpaid => "unpaid",
    Paused => "paused",
});

str_enum!(DiagnosisType {
    Primary => "primary",
    Secondary => "secondary",
    Differential => "differential",
});

str_enum!(DiagnosisStatus {
    Active => "active",
    Resolved => "resolved",
    Chronic => "chronic",
    RuledOut => "ruled_out",
});

str_enum!(ConfidenceLevel {
    Confirmed => "confirmed",
    Probable => "probable",
    Suspected => "suspected",
});

str_enum!(Severity {
    Mild => "mild",
    Moderate => "moderate",
    Severe => "severe",
});

str_enum!(ClinicRole {
    Admin => "admin",
    Practitioner => "practitioner",
    Assistant => "assistant",
});

impl ClinicRole {
    /// Assistants do not occupy a practitioner seat.
    pub fn takes_seat(&self) -> bool {
        !matches!(self, Self::Assistant)
    }
}

impl SubscriptionStatus {
    /// Statuses that grant access to the plan's features and limits.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn patient_status_round_trip() {
        for (variant, s) in [
            (PatientStatus::Active, "Active"),
            (PatientStatus::Inactive, "Inactive"),
            (PatientStatus::Completed, "Completed"),
            (PatientStatus::PendingReview, "Pending Review"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(PatientStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn diagnosis_status_uses_snake_case() {
        assert_eq!(DiagnosisStatus::RuledOut.as_str(), "ruled_out");
        assert_eq!(DiagnosisStatus::from_str("chronic").unwrap(), DiagnosisStatus::Chronic);
        assert!(Severity::from_str("Severe").is_err());
        assert!(!ClinicRole::Assistant.takes_seat());
        assert!(ClinicRole::Admin.takes_seat());
    }

    #[test]
    fn recurrence_type_round_trip() {
        for (variant, s) in [
            (RecurrenceType::Weekly, "weekly"),
            (RecurrenceType::DailyMonFri, "daily_mon_fri"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(RecurrenceType::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn invalid_enum_value_reports_field() {
        let err = TreatmentStatus::from_str("Done").unwrap_err();
        match err {
            DatabaseError::InvalidEnum { field, value } => {
                assert_eq!(field, "TreatmentStatus");
                assert_eq!(value, "Done");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn serde_uses_stored_strings() {
        let json = serde_json::to_string(&PatientStatus::PendingReview).unwrap();
        assert_eq!(json, "\"Pending Review\"");
        let parsed: PaymentMethod = serde_json::from_str("\"card\"").unwrap();
        assert_eq!(parsed, PaymentMethod::Card);
    }

    #[test]
    fn only_active_and_trialing_grant_access() {
        assert!(SubscriptionStatus::Active.grants_access());
        assert!(SubscriptionStatus::Trialing.grants_access());
        assert!(!SubscriptionStatus::PastDue.grants_access());
        assert!(!SubscriptionStatus::Canceled.grants_access());
    }
}
