use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::figure::{serialize_cents, Figure};
use crate::models::{ContributionBracket, FinancialSettings, FixedCost, PaymentMethod, Treatment, TreatmentStatus};

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

/// Tax parameters resolved from the practitioner's settings. `None` when
/// the configuration is incomplete.
#[derive(Debug, Clone)]
pub struct TaxConfig {
    pub contribution_rate: f64,
    pub fixed_base: Option<f64>,
    /// Sorted by lower bound.
    pub brackets: Vec<ContributionBracket>,
}

impl TaxConfig {
    /// Present when a contribution rate is set and either a fixed base or at
    /// least one bracket exists.
    pub fn resolve(settings: &FinancialSettings, brackets: &[ContributionBracket]) -> Option<Self> {
        let rate = settings.contribution_rate?;
        if settings.fixed_contribution_base.is_none() && brackets.is_empty() {
            return None;
        }
        let mut sorted = brackets.to_vec();
        sorted.sort_by(|a, b| a.lower_bound.total_cmp(&b.lower_bound));
        Some(Self {
            contribution_rate: rate,
            fixed_base: settings.fixed_contribution_base,
            brackets: sorted,
        })
    }

    /// Contribution base for a month's net income.
    pub fn base_for(&self, net_income: f64) -> Option<f64> {
        if let Some(base) = self.fixed_base {
            return Some(base);
        }
        lookup_bracket(&self.brackets, net_income).map(|b| b.base)
    }
}

/// Bracket containing `amount`. Below the first bracket the first applies,
/// above every bracket the last applies.
pub fn lookup_bracket(brackets: &[ContributionBracket], amount: f64) -> Option<&ContributionBracket> {
    if let Some(hit) = brackets.iter().find(|b| b.contains(amount)) {
        return Some(hit);
    }
    let first = brackets.first()?;
    if amount < first.lower_bound {
        Some(first)
    } else {
        brackets.last()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialTotals {
    pub session_count: u32,
    #[serde(serialize_with = "serialize_cents")]
    pub gross: f64,
    #[serde(serialize_with = "serialize_cents")]
    pub clinic_fees: f64,
    #[serde(serialize_with = "serialize_cents")]
    pub card_tax: f64,
    #[serde(serialize_with = "serialize_cents")]
    pub fixed_costs: f64,
    #[serde(serialize_with = "serialize_cents")]
    pub net_income: f64,
    pub contribution_base: Figure,
    pub contribution: Figure,
    pub net_after_contribution: Figure,
}

impl FinancialTotals {
    fn empty(tax_configured: bool) -> Self {
        let start = if tax_configured { Figure::zero() } else { Figure::NotAvailable };
        Self {
            session_count: 0,
            gross: 0.0,
            clinic_fees: 0.0,
            card_tax: 0.0,
            fixed_costs: 0.0,
            net_income: 0.0,
            contribution_base: start,
            contribution: start,
            net_after_contribution: start,
        }
    }

    fn accumulate(&mut self, other: &FinancialTotals) {
        self.session_count += other.session_count;
        self.gross += other.gross;
        self.clinic_fees += other.clinic_fees;
        self.card_tax += other.card_tax;
        self.fixed_costs += other.fixed_costs;
        self.net_income += other.net_income;
        self.contribution_base = self.contribution_base + other.contribution_base;
        self.contribution = self.contribution + other.contribution;
        self.net_after_contribution = self.net_after_contribution + other.net_after_contribution;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthReport {
    pub month: u32,
    pub name: &'static str,
    #[serde(flatten)]
    pub totals: FinancialTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarterReport {
    pub quarter: u32,
    pub label: String,
    #[serde(flatten)]
    pub totals: FinancialTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearReport {
    pub year: i32,
    pub tax_configured: bool,
    pub months: Vec<MonthReport>,
    pub quarters: Vec<QuarterReport>,
    pub annual: FinancialTotals,
}

fn compute_month(
    treatments: &[&Treatment],
    monthly_fixed: f64,
    settings: &FinancialSettings,
    tax: Option<&TaxConfig>,
) -> FinancialTotals {
    let mut totals = FinancialTotals::empty(tax.is_some());
    let clinic_pct = settings.clinic_fee_percentage.unwrap_or(0.0);
    let card_pct = settings.card_tax_rate.unwrap_or(0.0);

    for t in treatments {
        let fee = t.fee_charged.unwrap_or(0.0);
        totals.session_count += 1;
        totals.gross += fee;
        if settings.clinic_location_id.is_some() && t.location_id == settings.clinic_location_id {
            totals.clinic_fees += fee * clinic_pct / 100.0;
        }
        if t.payment_method == Some(PaymentMethod::Card) {
            totals.card_tax += fee * card_pct / 100.0;
        }
    }
    totals.fixed_costs = monthly_fixed;
    totals.net_income = totals.gross - totals.clinic_fees - totals.card_tax - totals.fixed_costs;

    if let Some((base, rate)) = tax.and_then(|t| Some((t.base_for(totals.net_income)?, t.contribution_rate))) {
        let contribution = base * rate / 100.0;
        totals.contribution_base = Figure::Amount(base);
        totals.contribution = Figure::Amount(contribution);
        totals.net_after_contribution = Figure::Amount(totals.net_income - contribution);
    }
    totals
}

/// Aggregate a year of completed sessions.
///
/// Only Completed treatments dated in `year` count. Fixed costs are charged
/// every month. Quarters and the annual total are sums of their months.
pub fn compute_year(
    treatments: &[Treatment],
    fixed_costs: &[FixedCost],
    settings: &FinancialSettings,
    brackets: &[ContributionBracket],
    year: i32,
) -> YearReport {
    let tax = TaxConfig::resolve(settings, brackets);
    let monthly_fixed: f64 = fixed_costs.iter().map(|c| c.monthly_amount).sum();

    let months: Vec<MonthReport> = (1..=12u32)
        .map(|month| {
            let in_month: Vec<&Treatment> = treatments
                .iter()
                .filter(|t| {
                    t.status == TreatmentStatus::Completed
                        && t.created_at.year() == year
                        && t.created_at.month() == month
                })
                .collect();
            MonthReport {
                month,
                name: MONTH_NAMES[(month - 1) as usize],
                totals: compute_month(&in_month, monthly_fixed, settings, tax.as_ref()),
            }
        })
        .collect();

    let quarters: Vec<QuarterReport> = (1..=4u32)
        .map(|q| {
            let mut totals = FinancialTotals::empty(tax.is_some());
            for m in &months[((q - 1) * 3) as usize..(q * 3) as usize] {
                totals.accumulate(&m.totals);
            }
            QuarterReport {
                quarter: q,
                label: format!("Q{q}"),
                totals,
            }
        })
        .collect();

    let mut annual = FinancialTotals::empty(tax.is_some());
    for q in &quarters {
        annual.accumulate(&q.totals);
    }

    YearReport {
        year,
        tax_configured: tax.is_some(),
        months,
        quarters,
        annual,
    }
}

/// First and one-past-last day of a year, for loading its treatments.
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
    ))
}
