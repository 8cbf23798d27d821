use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-practitioner tax and fee configuration. Every field is optional; the
/// aggregator reports contribution figures as unavailable when the tax part
/// is incomplete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialSettings {
    pub fixed_contribution_base: Option<f64>,
    pub contribution_rate: Option<f64>,
    pub card_tax_rate: Option<f64>,
    pub clinic_location_id: Option<Uuid>,
    pub clinic_fee_percentage: Option<f64>,
}

/// One row of the self-employment contribution table. `upper_bound = None`
/// is open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionBracket {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub lower_bound: f64,
    pub upper_bound: Option<f64>,
    pub base: f64,
}

impl ContributionBracket {
    pub fn contains(&self, amount: f64) -> bool {
        amount >= self.lower_bound && self.upper_bound.map_or(true, |upper| amount < upper)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedCost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub monthly_amount: f64,
}
