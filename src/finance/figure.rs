use serde::{Serialize, Serializer};

/// Wire representation of a figure that cannot be computed.
pub const NOT_AVAILABLE: &str = "N/A";

/// A monetary amount that may be unavailable because the practitioner's tax
/// configuration is incomplete. Serialized as a number rounded to cents, or
/// the string `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Figure {
    Amount(f64),
    NotAvailable,
}

impl Figure {
    pub fn zero() -> Self {
        Self::Amount(0.0)
    }

    pub fn amount(&self) -> Option<f64> {
        match self {
            Self::Amount(v) => Some(*v),
            Self::NotAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Amount(_))
    }
}

impl std::ops::Add for Figure {
    type Output = Figure;

    /// Unavailability is contagious.
    fn add(self, rhs: Figure) -> Figure {
        match (self, rhs) {
            (Self::Amount(a), Self::Amount(b)) => Self::Amount(a + b),
            _ => Self::NotAvailable,
        }
    }
}

impl Serialize for Figure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Amount(v) => serializer.serialize_f64(round_cents(*v)),
            Self::NotAvailable => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `serialize_with` helper for plain amounts.
pub fn serialize_cents<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_cents(*v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_available_serializes_as_sentinel() {
        assert_eq!(serde_json::to_string(&Figure::NotAvailable).unwrap(), "\"N/A\"");
        assert_eq!(serde_json::to_string(&Figure::Amount(10.456)).unwrap(), "10.46");
    }

    #[test]
    fn addition_propagates_unavailability() {
        assert_eq!(Figure::Amount(1.0) + Figure::Amount(2.5), Figure::Amount(3.5));
        assert_eq!(Figure::Amount(1.0) + Figure::NotAvailable, Figure::NotAvailable);
        assert!(!(Figure::NotAvailable + Figure::zero()).is_available());
    }
}
